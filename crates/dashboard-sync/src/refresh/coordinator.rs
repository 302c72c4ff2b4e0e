//! Cache-first, network-always refresh coordination

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::rules::RefreshRule;
use crate::cache::CacheStore;
use crate::connection::MessageSink;
use crate::dispatcher::EventDispatcher;
use crate::event::{ClientEvent, DataSource, DataType};
use crate::protocol::ClientMessage;

/// What happened to the network side of a refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDispatch {
    /// `dashboard.request_refresh` was sent
    Sent,
    /// The session is not ready; the intent is queued until it is
    Queued,
    /// A refresh for the type was issued too recently
    Throttled,
}

/// Result of [`RefreshCoordinator::request_refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// A fresh cached value was dispatched immediately
    pub served_from_cache: bool,
    /// Network side of the request
    pub dispatch: RefreshDispatch,
}

impl RefreshOutcome {
    fn throttled() -> Self {
        Self {
            served_from_cache: false,
            dispatch: RefreshDispatch::Throttled,
        }
    }
}

#[derive(Debug, Default)]
struct RefreshState {
    pending: BTreeSet<DataType>,
    last_issued: HashMap<DataType, Instant>,
}

/// Turns refresh intents into `dashboard.request_refresh` messages.
///
/// A request first serves any fresh cached value, then always asks the
/// server for a recomputation. Offline intents are kept as a set per data
/// type and flushed once the session is ready.
pub struct RefreshCoordinator {
    cache: Arc<CacheStore>,
    dispatcher: Arc<EventDispatcher>,
    sink: Arc<dyn MessageSink>,
    rules: Vec<RefreshRule>,
    state: Mutex<RefreshState>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("rules", &self.rules.len())
            .field("pending", &self.pending())
            .finish()
    }
}

impl RefreshCoordinator {
    /// Create a coordinator with the given domain rules
    pub fn new(
        cache: Arc<CacheStore>,
        dispatcher: Arc<EventDispatcher>,
        sink: Arc<dyn MessageSink>,
        rules: Vec<RefreshRule>,
    ) -> Self {
        Self {
            cache,
            dispatcher,
            sink,
            rules,
            state: Mutex::new(RefreshState::default()),
        }
    }

    /// Serve a fresh cached value if there is one, then ask the server to
    /// recompute `data_type` (or queue the intent while offline).
    pub fn request_refresh(&self, data_type: DataType) -> RefreshOutcome {
        let served_from_cache = match self.cache.get(data_type) {
            Some(data) => {
                self.dispatcher.notify(ClientEvent::DataUpdated {
                    data_type,
                    data,
                    timestamp: None,
                    source: DataSource::Cache,
                });
                true
            }
            None => false,
        };

        RefreshOutcome {
            served_from_cache,
            dispatch: self.issue(data_type),
        }
    }

    /// Like [`request_refresh`](Self::request_refresh), but suppressed when a
    /// refresh for the type was issued less than `interval` ago.
    pub fn throttled_refresh(&self, data_type: DataType, interval: Duration) -> RefreshOutcome {
        let recent = !interval.is_zero()
            && self
                .state
                .lock()
                .last_issued
                .get(&data_type)
                .is_some_and(|last| last.elapsed() < interval);
        if recent {
            tracing::trace!(data_type = %data_type, "Refresh throttled");
            return RefreshOutcome::throttled();
        }
        self.request_refresh(data_type)
    }

    /// Ask for the `comprehensive` snapshot
    pub fn request_initial(&self) -> RefreshOutcome {
        self.request_refresh(DataType::Comprehensive)
    }

    /// Send every queued intent once. Returns how many were sent.
    pub fn flush_pending(&self) -> usize {
        if !self.sink.is_ready() {
            return 0;
        }
        let pending = std::mem::take(&mut self.state.lock().pending);
        let mut sent = 0;
        let mut failed = BTreeSet::new();
        for data_type in pending {
            match self.sink.send(ClientMessage::RequestRefresh { data_type }) {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::debug!(data_type = %data_type, error = %e, "Queued refresh not sent");
                    failed.insert(data_type);
                }
            }
        }
        if !failed.is_empty() {
            self.state.lock().pending.extend(failed);
        }
        if sent > 0 {
            tracing::debug!(sent, "Queued refreshes flushed");
        }
        sent
    }

    /// Session-ready hook: flush queued intents together with the initial
    /// `comprehensive` request, each type sent once.
    pub fn on_session_ready(&self) -> usize {
        {
            let mut state = self.state.lock();
            state.pending.insert(DataType::Comprehensive);
            state.last_issued.insert(DataType::Comprehensive, Instant::now());
        }
        self.flush_pending()
    }

    /// Apply the refresh rules to a forwarded domain event. Returns how many
    /// refreshes were sent or queued.
    pub fn apply_domain_event(&self, name: &str) -> usize {
        let mut seen = BTreeSet::new();
        let mut issued = 0;
        for rule in self.rules.iter().filter(|r| r.matches(name)) {
            if !seen.insert(rule.data_type) {
                continue;
            }
            let outcome = self.throttled_refresh(rule.data_type, rule.throttle());
            if outcome.dispatch != RefreshDispatch::Throttled {
                issued += 1;
            }
        }
        if issued > 0 {
            tracing::debug!(event = %name, issued, "Domain event triggered refresh");
        }
        issued
    }

    /// Queued data types, in order
    pub fn pending(&self) -> Vec<DataType> {
        self.state.lock().pending.iter().copied().collect()
    }

    /// Configured domain rules
    pub fn rules(&self) -> &[RefreshRule] {
        &self.rules
    }

    /// Forget queued intents and throttle marks
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.last_issued.clear();
    }

    fn issue(&self, data_type: DataType) -> RefreshDispatch {
        self.state
            .lock()
            .last_issued
            .insert(data_type, Instant::now());

        if self.sink.is_ready() {
            match self.sink.send(ClientMessage::RequestRefresh { data_type }) {
                Ok(()) => {
                    tracing::trace!(data_type = %data_type, "Refresh requested");
                    return RefreshDispatch::Sent;
                }
                Err(e) => {
                    tracing::debug!(data_type = %data_type, error = %e, "Refresh not sent; queued");
                }
            }
        }
        self.state.lock().pending.insert(data_type);
        RefreshDispatch::Queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::RecordingSink;
    use crate::dispatcher::handler;
    use crate::event::EventKind;
    use serde_json::json;

    struct Fixture {
        cache: Arc<CacheStore>,
        sink: Arc<RecordingSink>,
        events: Arc<Mutex<Vec<ClientEvent>>>,
        coordinator: RefreshCoordinator,
    }

    fn fixture(ready: bool, rules: Vec<RefreshRule>) -> Fixture {
        let cache = Arc::new(CacheStore::default());
        let dispatcher = Arc::new(EventDispatcher::new());
        let sink = Arc::new(RecordingSink::default());
        sink.set_ready(ready);
        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = Arc::clone(&events);
            dispatcher.on(
                EventKind::DataUpdated,
                handler(move |e| {
                    events.lock().push(e.clone());
                    Ok(())
                }),
            );
        }
        let coordinator =
            RefreshCoordinator::new(Arc::clone(&cache), dispatcher, sink.clone(), rules);
        Fixture {
            cache,
            sink,
            events,
            coordinator,
        }
    }

    fn refreshes(sink: &RecordingSink) -> Vec<DataType> {
        sink.sent()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::RequestRefresh { data_type } => Some(data_type),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_cache_hit_served_and_still_sent() {
        let f = fixture(true, Vec::new());
        f.cache
            .put(DataType::Metrics, json!({"revenue": 1}), Duration::from_secs(300));

        let outcome = f.coordinator.request_refresh(DataType::Metrics);
        assert!(outcome.served_from_cache);
        assert_eq!(outcome.dispatch, RefreshDispatch::Sent);
        assert_eq!(refreshes(&f.sink), vec![DataType::Metrics]);

        let events = f.events.lock();
        assert!(matches!(
            &events[0],
            ClientEvent::DataUpdated { source: DataSource::Cache, data_type: DataType::Metrics, .. }
        ));
    }

    #[test]
    fn test_cache_miss_only_sends() {
        let f = fixture(true, Vec::new());
        let outcome = f.coordinator.request_refresh(DataType::TeamData);
        assert!(!outcome.served_from_cache);
        assert_eq!(outcome.dispatch, RefreshDispatch::Sent);
        assert!(f.events.lock().is_empty());
    }

    #[test]
    fn test_offline_intents_collapse() {
        let f = fixture(false, Vec::new());
        for _ in 0..5 {
            let outcome = f.coordinator.request_refresh(DataType::ActiveTimers);
            assert_eq!(outcome.dispatch, RefreshDispatch::Queued);
        }
        assert_eq!(f.coordinator.pending(), vec![DataType::ActiveTimers]);

        f.sink.set_ready(true);
        assert_eq!(f.coordinator.flush_pending(), 1);
        assert_eq!(refreshes(&f.sink), vec![DataType::ActiveTimers]);
        assert!(f.coordinator.pending().is_empty());
    }

    #[test]
    fn test_failed_send_requeues() {
        let f = fixture(true, Vec::new());
        f.sink.fail_sends(true);
        assert_eq!(
            f.coordinator.request_refresh(DataType::Metrics).dispatch,
            RefreshDispatch::Queued
        );
        assert_eq!(f.coordinator.flush_pending(), 0);
        assert_eq!(f.coordinator.pending(), vec![DataType::Metrics]);

        f.sink.fail_sends(false);
        assert_eq!(f.coordinator.flush_pending(), 1);
    }

    #[test]
    fn test_session_ready_sends_comprehensive_once() {
        let f = fixture(false, Vec::new());
        f.coordinator.request_refresh(DataType::Metrics);
        f.coordinator.request_initial();

        f.sink.set_ready(true);
        assert_eq!(f.coordinator.on_session_ready(), 2);
        assert_eq!(
            refreshes(&f.sink),
            vec![DataType::Metrics, DataType::Comprehensive]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_window() {
        let f = fixture(true, Vec::new());
        let interval = Duration::from_secs(1);

        assert_eq!(
            f.coordinator.throttled_refresh(DataType::ActiveTimers, interval).dispatch,
            RefreshDispatch::Sent
        );
        tokio::time::advance(Duration::from_millis(999)).await;
        assert_eq!(
            f.coordinator.throttled_refresh(DataType::ActiveTimers, interval).dispatch,
            RefreshDispatch::Throttled
        );
        // Other types are unaffected.
        assert_eq!(
            f.coordinator.throttled_refresh(DataType::Metrics, interval).dispatch,
            RefreshDispatch::Sent
        );
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(
            f.coordinator.throttled_refresh(DataType::ActiveTimers, interval).dispatch,
            RefreshDispatch::Sent
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_domain_rules() {
        let f = fixture(true, RefreshRule::defaults());

        assert_eq!(f.coordinator.apply_domain_event("time_entry.created"), 2);
        assert_eq!(f.coordinator.apply_domain_event("timer.stopped"), 0);
        assert_eq!(f.coordinator.apply_domain_event("invoice.paid"), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(f.coordinator.apply_domain_event("timer.stopped"), 1);
        assert_eq!(
            refreshes(&f.sink),
            vec![DataType::ActiveTimers, DataType::Metrics, DataType::ActiveTimers]
        );
    }

    #[test]
    fn test_reset_clears_queue_and_throttle() {
        let f = fixture(false, Vec::new());
        f.coordinator.request_refresh(DataType::Metrics);
        f.coordinator.reset();
        assert!(f.coordinator.pending().is_empty());

        f.sink.set_ready(true);
        assert_eq!(
            f.coordinator
                .throttled_refresh(DataType::Metrics, Duration::from_secs(60))
                .dispatch,
            RefreshDispatch::Sent
        );
    }
}
