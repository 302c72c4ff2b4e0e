//! Typed publish/subscribe registry for [`ClientEvent`]s.
//!
//! Handlers are keyed by [`EventKind`] and invoked in registration order.
//! A handler that returns an error or panics is logged and counted in the
//! returned [`DispatchReport`]; the handlers after it still run and the
//! failure never reaches the caller of [`EventDispatcher::notify`].
//!
//! An optional [`Interceptor`] sees every event before any handler and may
//! rewrite it, so all handlers observe the same reconciled value.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::HandlerError;
use crate::event::{ClientEvent, EventKind};

/// An event handler.
///
/// Identity is the `Arc` allocation: registering clones of the same `Handler`
/// twice counts once.
pub type Handler = Arc<dyn Fn(&ClientEvent) -> Result<(), HandlerError> + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&ClientEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Rewrites an event before it reaches any handler. Must not panic.
pub type Interceptor = Arc<dyn Fn(ClientEvent) -> ClientEvent + Send + Sync>;

pub(crate) fn handler_id(handler: &Handler) -> *const () {
    Arc::as_ptr(handler) as *const ()
}

/// Outcome of a single [`EventDispatcher::notify`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Kind of the dispatched event
    pub kind: EventKind,
    /// Handlers invoked
    pub invoked: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

impl DispatchReport {
    /// True when no handler was registered for the event
    pub fn is_unobserved(&self) -> bool {
        self.invoked == 0
    }

    /// Handlers that completed successfully
    pub fn succeeded(&self) -> usize {
        self.invoked - self.failed
    }
}

/// Registry of event handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: DashMap<EventKind, Vec<Handler>>,
    interceptor: RwLock<Option<Interceptor>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("kinds", &self.handlers.len())
            .field("intercepted", &self.interceptor.read().is_some())
            .finish()
    }
}

impl EventDispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`.
    ///
    /// Returns `false` if the same handler is already registered for the kind.
    pub fn on(&self, kind: EventKind, handler: Handler) -> bool {
        let id = handler_id(&handler);
        let mut entry = self.handlers.entry(kind).or_default();
        if entry.iter().any(|h| handler_id(h) == id) {
            return false;
        }
        entry.push(handler);
        tracing::trace!(kind = %kind, count = entry.len(), "Handler registered");
        true
    }

    /// Deregister `handler` from `kind`.
    ///
    /// The kind's handler list is dropped once it becomes empty. Returns
    /// `false` if the handler was not registered.
    pub fn off(&self, kind: EventKind, handler: &Handler) -> bool {
        let id = handler_id(handler);
        let mut removed = false;
        let mut now_empty = false;
        if let Some(mut entry) = self.handlers.get_mut(&kind) {
            let before = entry.len();
            entry.retain(|h| handler_id(h) != id);
            removed = entry.len() != before;
            now_empty = entry.is_empty();
        }
        if now_empty {
            self.handlers.remove_if(&kind, |_, handlers| handlers.is_empty());
        }
        if removed {
            tracing::trace!(kind = %kind, "Handler deregistered");
        }
        removed
    }

    /// Install `interceptor`, replacing any previous one
    pub fn set_interceptor(&self, interceptor: Interceptor) {
        *self.interceptor.write() = Some(interceptor);
    }

    /// Deliver `event` to every handler registered for its kind, after the
    /// interceptor (if any) has rewritten it.
    pub fn notify(&self, event: ClientEvent) -> DispatchReport {
        let interceptor = self.interceptor.read().clone();
        let event = match interceptor {
            Some(intercept) => intercept(event),
            None => event,
        };
        let kind = event.kind();
        // Snapshot so handlers can call on/off without deadlocking the map.
        let snapshot: Vec<Handler> = match self.handlers.get(&kind) {
            Some(entry) => entry.value().clone(),
            None => Vec::new(),
        };

        let mut failed = 0;
        for handler in &snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(&event)))
                .unwrap_or_else(|payload| Err(HandlerError::from_panic(payload.as_ref())));
            if let Err(err) = outcome {
                failed += 1;
                tracing::warn!(
                    kind = %kind,
                    error = %err,
                    "Event handler failed"
                );
            }
        }

        DispatchReport {
            kind,
            invoked: snapshot.len(),
            failed,
        }
    }

    /// Number of handlers registered for `kind`
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map(|h| h.len()).unwrap_or(0)
    }

    /// Kinds with at least one handler, sorted
    pub fn registered_kinds(&self) -> Vec<EventKind> {
        let mut kinds: Vec<EventKind> = self.handlers.iter().map(|e| *e.key()).collect();
        kinds.sort();
        kinds
    }

    /// Remove every handler and the interceptor
    pub fn clear(&self) {
        self.handlers.clear();
        *self.interceptor.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> Handler {
        let counter = Arc::clone(counter);
        handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_duplicate_registration_counts_once() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let h = counting(&calls);

        assert!(dispatcher.on(EventKind::SessionReady, h.clone()));
        assert!(!dispatcher.on(EventKind::SessionReady, h.clone()));
        assert_eq!(dispatcher.handler_count(EventKind::SessionReady), 1);

        let report = dispatcher.notify(ClientEvent::SessionReady);
        assert_eq!(report.invoked, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_same_handler_on_different_kinds() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let h = counting(&calls);

        assert!(dispatcher.on(EventKind::SessionReady, h.clone()));
        assert!(dispatcher.on(EventKind::Connected, h));
        assert_eq!(
            dispatcher.registered_kinds(),
            vec![EventKind::Connected, EventKind::SessionReady]
        );
    }

    #[test]
    fn test_off_removes_empty_kind() {
        let dispatcher = EventDispatcher::new();
        let h = counting(&Arc::new(AtomicUsize::new(0)));

        dispatcher.on(EventKind::Domain, h.clone());
        assert!(dispatcher.off(EventKind::Domain, &h));
        assert!(!dispatcher.off(EventKind::Domain, &h));
        assert!(dispatcher.registered_kinds().is_empty());
    }

    #[test]
    fn test_failing_handler_does_not_block_next() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.on(
            EventKind::SessionReady,
            handler(|_| Err(HandlerError::new("nope"))),
        );
        dispatcher.on(EventKind::SessionReady, handler(|_| panic!("boom")));
        dispatcher.on(EventKind::SessionReady, counting(&calls));

        let report = dispatcher.notify(ClientEvent::SessionReady);
        assert_eq!(report.invoked, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            let order = Arc::clone(&order);
            dispatcher.on(
                EventKind::Connected,
                handler(move |_| {
                    order.lock().push(i);
                    Ok(())
                }),
            );
        }

        dispatcher.notify(ClientEvent::Connected {
            transport: "memory".into(),
        });
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_handler_may_deregister_itself() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let slot: Arc<Mutex<Option<Handler>>> = Arc::new(Mutex::new(None));

        let d = Arc::clone(&dispatcher);
        let s = Arc::clone(&slot);
        let h = handler(move |_| {
            if let Some(me) = s.lock().take() {
                d.off(EventKind::SessionReady, &me);
            }
            Ok(())
        });
        *slot.lock() = Some(h.clone());
        dispatcher.on(EventKind::SessionReady, h);

        assert_eq!(dispatcher.notify(ClientEvent::SessionReady).invoked, 1);
        assert!(dispatcher.notify(ClientEvent::SessionReady).is_unobserved());
    }

    #[test]
    fn test_interceptor_rewrites_before_every_handler() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let seen = Arc::clone(&seen);
            dispatcher.on(
                EventKind::Connected,
                handler(move |e| {
                    if let ClientEvent::Connected { transport } = e {
                        seen.lock().push(transport.clone());
                    }
                    Ok(())
                }),
            );
        }
        dispatcher.set_interceptor(Arc::new(|e: ClientEvent| match e {
            ClientEvent::Connected { .. } => ClientEvent::Connected {
                transport: "rewritten".into(),
            },
            other => other,
        }));

        dispatcher.notify(ClientEvent::Connected {
            transport: "memory".into(),
        });
        assert_eq!(*seen.lock(), vec!["rewritten", "rewritten"]);

        dispatcher.clear();
        dispatcher.on(EventKind::Connected, counting(&Arc::new(AtomicUsize::new(0))));
        assert_eq!(
            dispatcher
                .notify(ClientEvent::Connected {
                    transport: "memory".into(),
                })
                .invoked,
            1
        );
    }

    #[test]
    fn test_notify_without_handlers() {
        let dispatcher = EventDispatcher::new();
        let report = dispatcher.notify(ClientEvent::SessionReady);
        assert!(report.is_unobserved());
        assert_eq!(report.kind, EventKind::SessionReady);
    }
}
