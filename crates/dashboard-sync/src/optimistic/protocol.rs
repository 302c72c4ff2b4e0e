//! Apply, confirm, reject and expire optimistic updates

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{PendingOptimisticUpdate, RequestId};
use crate::cache::{CacheEntry, CacheStore};
use crate::config::CacheConfig;
use crate::connection::MessageSink;
use crate::dispatcher::EventDispatcher;
use crate::event::{ClientEvent, DataSource, DataType, RejectionReason};
use crate::logging::{OptimisticLogEvent, log_optimistic_event};
use crate::protocol::ClientMessage;

#[derive(Debug, Default)]
struct Ledger {
    pending: HashMap<RequestId, PendingOptimisticUpdate>,
    /// Last committed entry per type with pending updates; `None` when the
    /// cache held nothing before the first speculative write.
    committed: HashMap<DataType, Option<CacheEntry>>,
}

impl Ledger {
    fn has_pending(&self, data_type: DataType) -> bool {
        self.pending.values().any(|u| u.data_type == data_type)
    }

    /// Baseline to restore after `data_type` loses one pending update.
    /// Dropped once no update for the type remains.
    fn baseline_after_removal(&mut self, data_type: DataType) -> Option<CacheEntry> {
        if self.has_pending(data_type) {
            self.committed.get(&data_type).cloned().flatten()
        } else {
            self.committed.remove(&data_type).flatten()
        }
    }
}

/// Speculative write protocol.
///
/// Every update moves `issued → confirmed | rejected | timed_out` exactly
/// once. Confirmations for unknown or already settled ids are ignored.
pub struct OptimisticUpdateProtocol {
    cache: Arc<CacheStore>,
    dispatcher: Arc<EventDispatcher>,
    sink: Arc<dyn MessageSink>,
    ttl: CacheConfig,
    timeout: Duration,
    ledger: Mutex<Ledger>,
}

impl std::fmt::Debug for OptimisticUpdateProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticUpdateProtocol")
            .field("pending", &self.pending_count())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OptimisticUpdateProtocol {
    /// Create the protocol; `ttl` decides how long written values stay fresh
    pub fn new(
        cache: Arc<CacheStore>,
        dispatcher: Arc<EventDispatcher>,
        sink: Arc<dyn MessageSink>,
        ttl: CacheConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            dispatcher,
            sink,
            ttl,
            timeout,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Show `speculative` for `data_type` now and send it to the server.
    ///
    /// If the send fails the update stays pending and is rolled back by
    /// [`expire`](Self::expire) once it times out.
    pub fn apply(&self, data_type: DataType, speculative: Value) -> RequestId {
        let request_id = RequestId::new();
        {
            let mut ledger = self.ledger.lock();
            if !ledger.has_pending(data_type) {
                let committed = self.cache.peek_entry(data_type);
                ledger.committed.insert(data_type, committed);
            }
            ledger.pending.insert(
                request_id,
                PendingOptimisticUpdate {
                    request_id,
                    data_type,
                    speculative: speculative.clone(),
                    issued_at: Instant::now(),
                },
            );
        }

        self.cache
            .put(data_type, speculative.clone(), self.ttl.ttl_for(data_type));
        log_optimistic_event(&request_id, Some(data_type), OptimisticLogEvent::Applied);
        self.dispatcher.notify(ClientEvent::DataUpdated {
            data_type,
            data: speculative.clone(),
            timestamp: None,
            source: DataSource::Optimistic { request_id },
        });

        let message = ClientMessage::OptimisticUpdate {
            data_type,
            data: speculative,
            request_id,
        };
        if let Err(e) = self.sink.send(message) {
            log_optimistic_event(
                &request_id,
                Some(data_type),
                OptimisticLogEvent::SendFailed {
                    error: e.to_string(),
                },
            );
        }
        request_id
    }

    /// Settle an update from a `dashboard.update_confirmed` message.
    ///
    /// Returns `false` if `request_id` is not pending.
    pub fn on_confirmation(
        &self,
        request_id: RequestId,
        success: bool,
        data: Option<Value>,
        error: Option<String>,
    ) -> bool {
        let Some(update) = self.ledger.lock().pending.remove(&request_id) else {
            log_optimistic_event(&request_id, None, OptimisticLogEvent::Ignored);
            return false;
        };

        if success {
            self.commit(update, data);
        } else {
            log_optimistic_event(
                &request_id,
                Some(update.data_type),
                OptimisticLogEvent::Rejected {
                    error: error.clone(),
                },
            );
            self.roll_back(update, RejectionReason::Rejected { error });
        }
        true
    }

    /// Roll back every update at least `timeout` old at `now`. Returns how
    /// many were rolled back.
    pub fn expire(&self, now: Instant) -> usize {
        let mut orphaned: Vec<PendingOptimisticUpdate> = {
            let mut ledger = self.ledger.lock();
            let ids: Vec<RequestId> = ledger
                .pending
                .values()
                .filter(|u| u.is_orphaned_at(now, self.timeout))
                .map(|u| u.request_id)
                .collect();
            ids.iter()
                .filter_map(|id| ledger.pending.remove(id))
                .collect()
        };
        orphaned.sort_by_key(|u| u.issued_at);

        let count = orphaned.len();
        for update in orphaned {
            let after_ms = update.age_at(now).as_millis() as u64;
            log_optimistic_event(
                &update.request_id,
                Some(update.data_type),
                OptimisticLogEvent::TimedOut { after_ms },
            );
            self.roll_back(update, RejectionReason::TimedOut { after_ms });
        }
        count
    }

    /// Reconcile a server push for `data_type` with pending updates.
    ///
    /// Returns `None` when nothing is pending and the push should apply as
    /// is. Otherwise the pushed value becomes the baseline restored by later
    /// rollbacks, the cache keeps showing the pending write, and the newest
    /// pending request id is returned with the value still shown.
    pub fn on_server_push(
        &self,
        data_type: DataType,
        data: &Value,
    ) -> Option<(RequestId, Value)> {
        let ttl = self.ttl.ttl_for(data_type);
        let (request_id, speculative) = {
            let mut ledger = self.ledger.lock();
            let newest = ledger
                .pending
                .values()
                .filter(|u| u.data_type == data_type)
                .max_by_key(|u| u.issued_at)
                .map(|u| (u.request_id, u.speculative.clone()))?;
            ledger
                .committed
                .insert(data_type, Some(CacheEntry::new(data.clone(), ttl)));
            newest
        };

        let shown = self
            .cache
            .peek_entry(data_type)
            .map(|entry| entry.value)
            .unwrap_or(speculative);
        self.cache.put(data_type, shown.clone(), ttl);
        tracing::debug!(
            request_id = %request_id,
            data_type = %data_type,
            "Server push held behind pending update"
        );
        Some((request_id, shown))
    }

    /// Drop every pending update, reporting each as discarded. The cache is
    /// left alone.
    pub fn discard_all(&self) -> usize {
        let mut discarded: Vec<PendingOptimisticUpdate> = {
            let mut ledger = self.ledger.lock();
            ledger.committed.clear();
            ledger.pending.drain().map(|(_, u)| u).collect()
        };
        discarded.sort_by_key(|u| u.issued_at);

        let count = discarded.len();
        for update in discarded {
            self.dispatcher.notify(ClientEvent::OptimisticRejected {
                request_id: update.request_id,
                data_type: update.data_type,
                reason: RejectionReason::Discarded,
            });
        }
        count
    }

    /// Number of pending updates
    pub fn pending_count(&self) -> usize {
        self.ledger.lock().pending.len()
    }

    /// Pending update for `request_id`
    pub fn pending(&self, request_id: &RequestId) -> Option<PendingOptimisticUpdate> {
        self.ledger.lock().pending.get(request_id).cloned()
    }

    /// Whether `data_type` has any pending update
    pub fn is_pending(&self, data_type: DataType) -> bool {
        self.ledger.lock().has_pending(data_type)
    }

    /// Configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn commit(&self, update: PendingOptimisticUpdate, data: Option<Value>) {
        let PendingOptimisticUpdate {
            request_id,
            data_type,
            speculative,
            ..
        } = update;
        let value = data.unwrap_or(speculative);

        self.cache
            .put(data_type, value.clone(), self.ttl.ttl_for(data_type));
        {
            let mut ledger = self.ledger.lock();
            if ledger.has_pending(data_type) {
                let committed = self.cache.peek_entry(data_type);
                ledger.committed.insert(data_type, committed);
            } else {
                ledger.committed.remove(&data_type);
            }
        }

        log_optimistic_event(&request_id, Some(data_type), OptimisticLogEvent::Confirmed);
        self.dispatcher.notify(ClientEvent::DataUpdated {
            data_type,
            data: value.clone(),
            timestamp: None,
            source: DataSource::Confirmed { request_id },
        });
        self.dispatcher.notify(ClientEvent::OptimisticConfirmed {
            request_id,
            data_type,
            data: value,
        });
    }

    fn roll_back(&self, update: PendingOptimisticUpdate, reason: RejectionReason) {
        let PendingOptimisticUpdate {
            request_id,
            data_type,
            ..
        } = update;

        let baseline = self.ledger.lock().baseline_after_removal(data_type);
        self.cache.restore(data_type, baseline.clone());

        if let Some(entry) = baseline.filter(|e| !e.is_expired_at(Instant::now())) {
            self.dispatcher.notify(ClientEvent::DataUpdated {
                data_type,
                data: entry.value,
                timestamp: None,
                source: DataSource::Rollback { request_id },
            });
        }
        self.dispatcher.notify(ClientEvent::OptimisticRejected {
            request_id,
            data_type,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::RecordingSink;
    use crate::dispatcher::handler;
    use crate::event::EventKind;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(30);

    struct Fixture {
        cache: Arc<CacheStore>,
        sink: Arc<RecordingSink>,
        events: Arc<Mutex<Vec<ClientEvent>>>,
        protocol: OptimisticUpdateProtocol,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(CacheStore::default());
        let dispatcher = Arc::new(EventDispatcher::new());
        let sink = Arc::new(RecordingSink::ready());
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorder = {
            let events = Arc::clone(&events);
            handler(move |e| {
                events.lock().push(e.clone());
                Ok(())
            })
        };
        for kind in [
            EventKind::DataUpdated,
            EventKind::OptimisticConfirmed,
            EventKind::OptimisticRejected,
        ] {
            dispatcher.on(kind, recorder.clone());
        }
        let protocol = OptimisticUpdateProtocol::new(
            Arc::clone(&cache),
            dispatcher,
            sink.clone(),
            CacheConfig::default(),
            TIMEOUT,
        );
        Fixture {
            cache,
            sink,
            events,
            protocol,
        }
    }

    fn sources(events: &[ClientEvent]) -> Vec<DataSource> {
        events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::DataUpdated { source, .. } => Some(*source),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_apply_writes_cache_and_sends() {
        let f = fixture();
        let id = f.protocol.apply(DataType::ActiveTimers, json!({"running": 3}));

        assert_eq!(f.cache.get(DataType::ActiveTimers), Some(json!({"running": 3})));
        assert_eq!(f.protocol.pending_count(), 1);
        assert_eq!(
            f.sink.sent(),
            vec![ClientMessage::OptimisticUpdate {
                data_type: DataType::ActiveTimers,
                data: json!({"running": 3}),
                request_id: id,
            }]
        );
        assert_eq!(
            sources(&f.events.lock()),
            vec![DataSource::Optimistic { request_id: id }]
        );
    }

    #[test]
    fn test_confirmation_commits_server_value() {
        let f = fixture();
        let id = f.protocol.apply(DataType::Metrics, json!({"v": "guess"}));

        assert!(f
            .protocol
            .on_confirmation(id, true, Some(json!({"v": "server"})), None));
        assert_eq!(f.cache.get(DataType::Metrics), Some(json!({"v": "server"})));
        assert_eq!(f.protocol.pending_count(), 0);

        let events = f.events.lock();
        assert_eq!(
            events.last(),
            Some(&ClientEvent::OptimisticConfirmed {
                request_id: id,
                data_type: DataType::Metrics,
                data: json!({"v": "server"}),
            })
        );
        assert!(sources(&events).contains(&DataSource::Confirmed { request_id: id }));
    }

    #[test]
    fn test_confirmation_without_data_keeps_speculative() {
        let f = fixture();
        let id = f.protocol.apply(DataType::Metrics, json!(7));
        f.protocol.on_confirmation(id, true, None, None);
        assert_eq!(f.cache.get(DataType::Metrics), Some(json!(7)));
    }

    #[test]
    fn test_rejection_restores_committed_entry() {
        let f = fixture();
        f.cache
            .put(DataType::Metrics, json!({"v": "committed"}), Duration::from_secs(300));
        let before = f.cache.peek_entry(DataType::Metrics);

        let id = f.protocol.apply(DataType::Metrics, json!({"v": "guess"}));
        assert!(f
            .protocol
            .on_confirmation(id, false, None, Some("locked".into())));

        assert_eq!(f.cache.peek_entry(DataType::Metrics), before);
        let events = f.events.lock();
        assert_eq!(
            sources(&events),
            vec![
                DataSource::Optimistic { request_id: id },
                DataSource::Rollback { request_id: id }
            ]
        );
        assert_eq!(
            events.last(),
            Some(&ClientEvent::OptimisticRejected {
                request_id: id,
                data_type: DataType::Metrics,
                reason: RejectionReason::Rejected {
                    error: Some("locked".into())
                },
            })
        );
    }

    #[test]
    fn test_rejection_without_committed_value_clears_entry() {
        let f = fixture();
        let id = f.protocol.apply(DataType::TeamData, json!([1, 2]));
        f.protocol.on_confirmation(id, false, None, None);

        assert!(f.cache.peek_entry(DataType::TeamData).is_none());
        // No rollback value to show, only the rejection.
        assert_eq!(sources(&f.events.lock()).len(), 1);
    }

    #[test]
    fn test_unknown_and_late_confirmations_are_ignored() {
        let f = fixture();
        assert!(!f.protocol.on_confirmation(RequestId::new(), true, None, None));

        let id = f.protocol.apply(DataType::Metrics, json!(1));
        assert!(f.protocol.on_confirmation(id, true, None, None));
        assert!(!f.protocol.on_confirmation(id, false, None, None));
        assert_eq!(f.cache.get(DataType::Metrics), Some(json!(1)));
    }

    #[test]
    fn test_server_push_becomes_new_baseline() {
        let f = fixture();
        f.cache.put(DataType::Metrics, json!("old"), Duration::from_secs(300));
        let id = f.protocol.apply(DataType::Metrics, json!("guess"));

        assert_eq!(
            f.protocol.on_server_push(DataType::Metrics, &json!("pushed")),
            Some((id, json!("guess")))
        );
        assert!(f.protocol.on_server_push(DataType::TeamData, &json!([])).is_none());
        assert_eq!(f.cache.get(DataType::Metrics), Some(json!("guess")));
        assert!(f.protocol.is_pending(DataType::Metrics));

        f.protocol.on_confirmation(id, false, None, None);
        assert_eq!(f.cache.get(DataType::Metrics), Some(json!("pushed")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_push_keeps_newest_pending_value() {
        let f = fixture();
        f.protocol.apply(DataType::Metrics, json!("a"));
        tokio::time::advance(Duration::from_millis(10)).await;
        let second = f.protocol.apply(DataType::Metrics, json!("b"));
        f.cache.remove(DataType::Metrics);

        assert_eq!(
            f.protocol.on_server_push(DataType::Metrics, &json!("pushed")),
            Some((second, json!("b")))
        );
        assert_eq!(f.cache.get(DataType::Metrics), Some(json!("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_to_expired_baseline_is_not_shown() {
        let f = fixture();
        f.cache
            .put(DataType::Metrics, json!("stale soon"), Duration::from_secs(5));
        let id = f.protocol.apply(DataType::Metrics, json!("guess"));

        tokio::time::advance(Duration::from_secs(6)).await;
        f.protocol.on_confirmation(id, false, None, None);

        assert_eq!(f.cache.get(DataType::Metrics), None);
        let events = f.events.lock();
        assert_eq!(
            sources(&events),
            vec![DataSource::Optimistic { request_id: id }]
        );
        assert!(matches!(
            events.last(),
            Some(ClientEvent::OptimisticRejected { request_id, .. }) if *request_id == id
        ));
    }

    #[test]
    fn test_overlapping_updates_share_first_baseline() {
        let f = fixture();
        f.cache.put(DataType::Metrics, json!("base"), Duration::from_secs(300));
        let first = f.protocol.apply(DataType::Metrics, json!("a"));
        let second = f.protocol.apply(DataType::Metrics, json!("b"));

        f.protocol.on_confirmation(first, false, None, None);
        assert_eq!(f.cache.get(DataType::Metrics), Some(json!("base")));
        assert!(f.protocol.is_pending(DataType::Metrics));

        f.protocol.on_confirmation(second, true, None, None);
        assert_eq!(f.cache.get(DataType::Metrics), Some(json!("b")));
        assert!(!f.protocol.is_pending(DataType::Metrics));
    }

    #[test]
    fn test_failed_send_leaves_update_pending() {
        let f = fixture();
        f.sink.set_ready(false);
        let id = f.protocol.apply(DataType::Metrics, json!(1));
        assert!(f.sink.sent().is_empty());
        assert!(f.protocol.pending(&id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_rolls_back_orphans() {
        let f = fixture();
        f.cache.put(DataType::Metrics, json!("base"), Duration::from_secs(300));
        let old = f.protocol.apply(DataType::Metrics, json!("old guess"));
        tokio::time::advance(Duration::from_secs(10)).await;
        let young = f.protocol.apply(DataType::ActiveTimers, json!("young guess"));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(f.protocol.expire(Instant::now()), 1);
        assert!(f.protocol.pending(&old).is_none());
        assert!(f.protocol.pending(&young).is_some());
        assert_eq!(f.cache.get(DataType::Metrics), Some(json!("base")));
        assert_eq!(
            f.events.lock().last(),
            Some(&ClientEvent::OptimisticRejected {
                request_id: old,
                data_type: DataType::Metrics,
                reason: RejectionReason::TimedOut { after_ms: 30_000 },
            })
        );

        // A confirmation arriving after the timeout is ignored.
        assert!(!f.protocol.on_confirmation(old, true, None, None));
    }

    #[test]
    fn test_discard_all_reports_each_update() {
        let f = fixture();
        let a = f.protocol.apply(DataType::Metrics, json!(1));
        let b = f.protocol.apply(DataType::TeamData, json!(2));
        f.events.lock().clear();

        assert_eq!(f.protocol.discard_all(), 2);
        assert_eq!(f.protocol.pending_count(), 0);
        let rejected: Vec<RequestId> = f
            .events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::OptimisticRejected {
                    request_id,
                    reason: RejectionReason::Discarded,
                    ..
                } => Some(*request_id),
                _ => None,
            })
            .collect();
        assert_eq!(rejected.len(), 2);
        assert!(rejected.contains(&a) && rejected.contains(&b));
    }
}
