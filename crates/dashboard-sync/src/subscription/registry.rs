//! Set of wanted subscriptions, replayed on every session-ready

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::descriptor::SubscriptionDescriptor;
use crate::connection::MessageSink;
use crate::dispatcher::{EventDispatcher, Handler, handler, handler_id};
use crate::event::{ClientEvent, EventKind};

/// A consumer handler bound to a descriptor.
struct Binding {
    original: Handler,
    filtered: Handler,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<SubscriptionDescriptor, Vec<Binding>>,
    /// Set when the current session has been replayed. Flipped under the
    /// same lock that guards `entries`, so a descriptor added around a
    /// replay is sent by exactly one of `subscribe` and `replay_all`.
    replayed: bool,
}

/// Tracks which subscriptions the client wants.
///
/// The registry is the source of truth across reconnects: every
/// session-ready replays it in full, so views register interest once and
/// never need to know about the connection. Until the replay for the current
/// session has run, `subscribe` only records the descriptor.
pub struct SubscriptionRegistry {
    dispatcher: Arc<EventDispatcher>,
    sink: Arc<dyn MessageSink>,
    state: Mutex<State>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("descriptors", &self.descriptors())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new(dispatcher: Arc<EventDispatcher>, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            dispatcher,
            sink,
            state: Mutex::new(State::default()),
        }
    }

    /// Register interest in `descriptor`.
    ///
    /// Sends `<kind>.subscribe` right away once the current session has been
    /// replayed; otherwise the next replay sends it. Returns `true` if the
    /// descriptor was not registered before. Re-subscribing re-sends the
    /// message, which the server treats idempotently.
    pub fn subscribe(&self, descriptor: SubscriptionDescriptor) -> bool {
        let (added, live) = {
            let mut state = self.state.lock();
            let added = if state.entries.contains_key(&descriptor) {
                false
            } else {
                state.entries.insert(descriptor.clone(), Vec::new());
                true
            };
            (added, state.replayed)
        };
        tracing::debug!(descriptor = %descriptor, added, live, "Subscription registered");
        if live {
            self.send_subscribe(&descriptor);
        }
        added
    }

    /// Register interest in `descriptor` and route matching `DataUpdated`
    /// events to `consumer`.
    ///
    /// Binding the same handler to the same descriptor twice is a no-op, so
    /// it is invoked once per event. Returns `true` if a new binding was
    /// created.
    pub fn subscribe_with(&self, descriptor: SubscriptionDescriptor, consumer: Handler) -> bool {
        self.subscribe(descriptor.clone());

        let id = handler_id(&consumer);
        let filtered = {
            let mut state = self.state.lock();
            let bindings = state.entries.entry(descriptor.clone()).or_default();
            if bindings.iter().any(|b| handler_id(&b.original) == id) {
                return false;
            }

            let scope = descriptor.clone();
            let inner = Arc::clone(&consumer);
            let filtered = handler(move |event| match event {
                ClientEvent::DataUpdated { data_type, .. } if scope.covers(*data_type) => {
                    inner(event)
                }
                _ => Ok(()),
            });
            bindings.push(Binding {
                original: consumer,
                filtered: Arc::clone(&filtered),
            });
            filtered
        };

        self.dispatcher.on(EventKind::DataUpdated, filtered);
        true
    }

    /// Drop `descriptor` and every handler bound to it.
    ///
    /// Handlers are removed before this returns, so no later event reaches
    /// them. `<kind>.unsubscribe` is sent when the session is live and no
    /// other registered descriptor shares the kind.
    pub fn unsubscribe(&self, descriptor: &SubscriptionDescriptor) -> bool {
        let (bindings, kind_still_wanted, live) = {
            let mut state = self.state.lock();
            let Some(bindings) = state.entries.remove(descriptor) else {
                return false;
            };
            let shared = state.entries.keys().any(|d| d.kind == descriptor.kind);
            (bindings, shared, state.replayed)
        };

        for binding in &bindings {
            self.dispatcher.off(EventKind::DataUpdated, &binding.filtered);
        }

        if !kind_still_wanted && live && self.sink.is_ready() {
            if let Err(e) = self.sink.send(descriptor.unsubscribe_message()) {
                tracing::debug!(descriptor = %descriptor, error = %e, "Unsubscribe not sent");
            }
        }
        tracing::debug!(descriptor = %descriptor, handlers = bindings.len(), "Subscription removed");
        true
    }

    /// Resend every registered descriptor and mark the session live, so later
    /// subscriptions are sent directly. Returns how many were sent.
    pub fn replay_all(&self) -> usize {
        if !self.sink.is_ready() {
            return 0;
        }
        let descriptors: Vec<SubscriptionDescriptor> = {
            let mut state = self.state.lock();
            state.replayed = true;
            state.entries.keys().cloned().collect()
        };
        let sent = descriptors
            .iter()
            .filter(|d| self.send_subscribe(d))
            .count();
        tracing::info!(sent, total = descriptors.len(), "Subscriptions replayed");
        sent
    }

    /// The session was lost; hold new subscriptions for the next replay
    pub fn session_ended(&self) {
        self.state.lock().replayed = false;
    }

    /// Whether the current session has been replayed
    pub fn is_live(&self) -> bool {
        self.state.lock().replayed
    }

    /// Registered descriptors, in order
    pub fn descriptors(&self) -> Vec<SubscriptionDescriptor> {
        self.state.lock().entries.keys().cloned().collect()
    }

    /// Number of registered descriptors
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `descriptor` is registered
    pub fn contains(&self, descriptor: &SubscriptionDescriptor) -> bool {
        self.state.lock().entries.contains_key(descriptor)
    }

    /// Forget every descriptor and unbind every handler without notifying
    /// the server
    pub fn clear(&self) {
        let entries = std::mem::take(&mut self.state.lock().entries);
        for binding in entries.values().flatten() {
            self.dispatcher.off(EventKind::DataUpdated, &binding.filtered);
        }
    }

    fn send_subscribe(&self, descriptor: &SubscriptionDescriptor) -> bool {
        if !self.sink.is_ready() {
            return false;
        }
        match self.sink.send(descriptor.subscribe_message()) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(descriptor = %descriptor, error = %e, "Subscribe not sent");
                false
            }
        }
    }
}
