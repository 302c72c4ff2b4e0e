//! The synchronization client service.
//!
//! [`SyncClient`] owns one instance of every component and wires them
//! together through the dispatcher:
//!
//! - server `DataUpdated` pushes are written to the cache before any
//!   consumer sees them; a push for a type with pending optimistic updates
//!   becomes their committed baseline and consumers keep seeing the pending
//!   value
//! - `SessionReady` replays subscriptions, then flushes queued refreshes
//!   together with the initial `comprehensive` request
//! - `Disconnected` holds new subscriptions until the next replay
//! - `UpdateConfirmed` settles optimistic updates
//! - forwarded domain events trigger refresh rules
//!
//! The wiring is registered by [`SyncClient::new`], ahead of every consumer
//! handler.
//!
//! # Example
//! ```rust,ignore
//! use dashboard_sync::prelude::*;
//!
//! let client = SyncClient::new(SyncConfig::default(), Arc::new(WebSocketTransport::new(url)))?;
//! client.subscribe_with(SubscriptionDescriptor::dashboard("admin"), handler(|event| {
//!     render(event);
//!     Ok(())
//! }));
//! client.connect(Some(Identity::new(user_id, token)))?;
//! ```

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cache::CacheStore;
use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, ConnectionSnapshot, MessageSink};
use crate::dispatcher::{EventDispatcher, Handler, Interceptor, handler};
use crate::error::{SyncError, SyncResult};
use crate::event::{ClientEvent, DataSource, DataType, EventKind};
use crate::optimistic::{OptimisticUpdateProtocol, RequestId};
use crate::protocol::Identity;
use crate::refresh::{RefreshCoordinator, RefreshOutcome};
use crate::subscription::{SubscriptionDescriptor, SubscriptionRegistry};
use crate::transport::Transport;

/// Real-time dashboard synchronization client.
pub struct SyncClient {
    config: SyncConfig,
    dispatcher: Arc<EventDispatcher>,
    cache: Arc<CacheStore>,
    connection: ConnectionManager,
    registry: Arc<SubscriptionRegistry>,
    refresh: Arc<RefreshCoordinator>,
    optimistic: Arc<OptimisticUpdateProtocol>,
    wiring: Mutex<Vec<(EventKind, Handler)>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("connection", &self.connection)
            .field("subscriptions", &self.registry.len())
            .field("pending_updates", &self.optimistic.pending_count())
            .finish_non_exhaustive()
    }
}

impl SyncClient {
    /// Build a client and register its internal wiring. Nothing is
    /// connected until [`connect`](Self::connect).
    ///
    /// # Errors
    /// `InvalidConfig` if `config` fails validation.
    pub fn new(config: SyncConfig, transport: Arc<dyn Transport>) -> SyncResult<Self> {
        config.validate()?;

        let dispatcher = Arc::new(EventDispatcher::new());
        let cache = Arc::new(CacheStore::new(config.cache.max_entries));
        let connection = ConnectionManager::new(transport, &config, Arc::clone(&dispatcher))?;
        let sink: Arc<dyn MessageSink> = Arc::new(connection.clone());

        let registry = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&dispatcher),
            Arc::clone(&sink),
        ));
        let refresh = Arc::new(RefreshCoordinator::new(
            Arc::clone(&cache),
            Arc::clone(&dispatcher),
            Arc::clone(&sink),
            config.refresh.rules.clone(),
        ));
        let optimistic = Arc::new(OptimisticUpdateProtocol::new(
            Arc::clone(&cache),
            Arc::clone(&dispatcher),
            sink,
            config.cache.clone(),
            config.optimistic_timeout(),
        ));

        let client = Self {
            config,
            dispatcher,
            cache,
            connection,
            registry,
            refresh,
            optimistic,
            wiring: Mutex::new(Vec::new()),
            sweeper: Mutex::new(None),
            disposed: AtomicBool::new(false),
        };
        client.wire();
        Ok(client)
    }

    fn wire(&self) {
        let mut wiring = self.wiring.lock();
        self.dispatcher.set_interceptor(self.push_reconciler());
        for (kind, h) in self.wiring_handlers() {
            self.dispatcher.on(kind, h.clone());
            wiring.push((kind, h));
        }
        tracing::debug!(handlers = wiring.len(), "Sync client wired");
    }

    /// Start the optimistic timeout sweeper. Calling it again is a no-op.
    ///
    /// # Errors
    /// `Disposed` after [`dispose`](Self::dispose); an internal error when
    /// called outside a Tokio runtime.
    pub fn init(&self) -> SyncResult<()> {
        self.ensure_live()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SyncError::internal("init requires a Tokio runtime"))?;

        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return Ok(());
        }

        let optimistic = Arc::downgrade(&self.optimistic);
        let period = self.config.sweep_interval();
        *sweeper = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(optimistic) = optimistic.upgrade() else {
                    break;
                };
                optimistic.expire(Instant::now());
            }
        }));

        tracing::debug!(period_ms = period.as_millis() as u64, "Timeout sweeper started");
        Ok(())
    }

    /// Hold server pushes for types with pending optimistic updates behind
    /// the pending value, so no consumer renders a push the pending write
    /// will overwrite.
    fn push_reconciler(&self) -> Interceptor {
        let optimistic = Arc::downgrade(&self.optimistic);
        Arc::new(move |event: ClientEvent| match event {
            ClientEvent::DataUpdated {
                data_type,
                data,
                timestamp,
                source: DataSource::Server,
            } => match optimistic
                .upgrade()
                .and_then(|o| o.on_server_push(data_type, &data))
            {
                Some((request_id, shown)) => ClientEvent::DataUpdated {
                    data_type,
                    data: shown,
                    timestamp,
                    source: DataSource::Optimistic { request_id },
                },
                None => ClientEvent::server_data(data_type, data, timestamp),
            },
            other => other,
        })
    }

    fn wiring_handlers(&self) -> Vec<(EventKind, Handler)> {
        let ttl = self.config.cache.clone();
        let cache = Arc::downgrade(&self.cache);
        let cache_writer = handler(move |event| {
            if let (
                ClientEvent::DataUpdated {
                    data_type,
                    data,
                    source: DataSource::Server,
                    ..
                },
                Some(cache),
            ) = (event, cache.upgrade())
            {
                cache.put(*data_type, data.clone(), ttl.ttl_for(*data_type));
            }
            Ok(())
        });

        let registry = Arc::downgrade(&self.registry);
        let refresh = Arc::downgrade(&self.refresh);
        let session_ready = handler(move |_| {
            if let Some(registry) = registry.upgrade() {
                registry.replay_all();
            }
            if let Some(refresh) = refresh.upgrade() {
                refresh.on_session_ready();
            }
            Ok(())
        });

        let registry = Arc::downgrade(&self.registry);
        let session_ended = handler(move |_| {
            if let Some(registry) = registry.upgrade() {
                registry.session_ended();
            }
            Ok(())
        });

        let optimistic = Arc::downgrade(&self.optimistic);
        let reconciler = handler(move |event| {
            if let (
                ClientEvent::UpdateConfirmed {
                    request_id,
                    success,
                    data,
                    error,
                },
                Some(optimistic),
            ) = (event, optimistic.upgrade())
            {
                optimistic.on_confirmation(*request_id, *success, data.clone(), error.clone());
            }
            Ok(())
        });

        let refresh = Arc::downgrade(&self.refresh);
        let domain_rules = handler(move |event| {
            if let (ClientEvent::Domain { name, .. }, Some(refresh)) = (event, refresh.upgrade()) {
                refresh.apply_domain_event(name);
            }
            Ok(())
        });

        vec![
            (EventKind::DataUpdated, cache_writer),
            (EventKind::SessionReady, session_ready),
            (EventKind::Disconnected, session_ended),
            (EventKind::UpdateConfirmed, reconciler),
            (EventKind::Domain, domain_rules),
        ]
    }

    /// Start connecting, starting the sweeper first if needed. Returns `false` if a
    /// connection driver is already running.
    ///
    /// # Errors
    /// `Disposed` after [`dispose`](Self::dispose); an internal error when
    /// called outside a Tokio runtime.
    pub fn connect(&self, identity: Option<Identity>) -> SyncResult<bool> {
        self.init()?;
        self.connection.connect(identity)
    }

    /// Close the connection and discard transient state: cache, queued
    /// refreshes, throttle marks and pending optimistic updates.
    ///
    /// Subscriptions and handlers are kept, so a later
    /// [`connect`](Self::connect) replays every descriptor once.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
        self.registry.session_ended();
        let discarded = self.optimistic.discard_all();
        self.refresh.reset();
        self.cache.invalidate_all();
        tracing::debug!(discarded, "Transient state cleared");
    }

    /// Full teardown: disconnect, then drop every handler, subscription and
    /// cached value. The client cannot be used afterwards.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disconnect().await;
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        self.registry.clear();
        self.wiring.lock().clear();
        self.dispatcher.clear();
        tracing::info!("Sync client disposed");
    }

    /// Whether [`dispose`](Self::dispose) has run
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// True while a transport link is open
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// True once the session is usable
    pub fn is_ready(&self) -> bool {
        self.connection.is_ready()
    }

    /// Connection snapshot for connectivity indicators
    pub fn connection_snapshot(&self) -> ConnectionSnapshot {
        self.connection.snapshot()
    }

    /// Register a consumer handler
    pub fn on(&self, kind: EventKind, handler: Handler) -> bool {
        self.dispatcher.on(kind, handler)
    }

    /// Deregister a consumer handler
    pub fn off(&self, kind: EventKind, handler: &Handler) -> bool {
        self.dispatcher.off(kind, handler)
    }

    /// See [`SubscriptionRegistry::subscribe`]
    pub fn subscribe(&self, descriptor: SubscriptionDescriptor) -> bool {
        self.registry.subscribe(descriptor)
    }

    /// See [`SubscriptionRegistry::subscribe_with`]
    pub fn subscribe_with(&self, descriptor: SubscriptionDescriptor, consumer: Handler) -> bool {
        self.registry.subscribe_with(descriptor, consumer)
    }

    /// See [`SubscriptionRegistry::unsubscribe`]
    pub fn unsubscribe(&self, descriptor: &SubscriptionDescriptor) -> bool {
        self.registry.unsubscribe(descriptor)
    }

    /// See [`RefreshCoordinator::request_refresh`]
    pub fn request_refresh(&self, data_type: DataType) -> RefreshOutcome {
        self.refresh.request_refresh(data_type)
    }

    /// See [`OptimisticUpdateProtocol::apply`]
    pub fn apply_optimistic(&self, data_type: DataType, speculative: Value) -> RequestId {
        self.optimistic.apply(data_type, speculative)
    }

    /// Fresh cached value for `data_type`
    pub fn cached(&self, data_type: DataType) -> Option<Value> {
        self.cache.get(data_type)
    }

    /// Effective configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The event dispatcher
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// The cache
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// The connection manager
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// The subscription registry
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// The refresh coordinator
    pub fn refresh(&self) -> &Arc<RefreshCoordinator> {
        &self.refresh
    }

    /// The optimistic update protocol
    pub fn optimistic(&self) -> &Arc<OptimisticUpdateProtocol> {
        &self.optimistic
    }

    fn ensure_live(&self) -> SyncResult<()> {
        if self.is_disposed() {
            Err(SyncError::disposed())
        } else {
            Ok(())
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.connection.abort();
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
    }
}
