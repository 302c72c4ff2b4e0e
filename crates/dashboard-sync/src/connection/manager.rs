//! Connection driver: open, authenticate, pump frames, reconnect.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::backoff::Backoff;
use super::state::{ConnectionSnapshot, ConnectionState, InternalState};
use super::MessageSink;
use crate::config::SyncConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::{SyncError, SyncResult, TransportError};
use crate::event::ClientEvent;
use crate::logging::{ConnectionLogEvent, log_connection_event};
use crate::protocol::{ClientMessage, Identity, ServerMessage, is_auth_success};
use crate::transport::{Transport, TransportLink};

/// Reason emitted with `Disconnected` after [`ConnectionManager::disconnect`].
pub const CLIENT_DISCONNECT_REASON: &str = "client disconnect";

struct Driver {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    backoff: Backoff,
    connect_timeout: Duration,
    heartbeat: Duration,
    dispatcher: Arc<EventDispatcher>,
    state: Mutex<InternalState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    driver: Mutex<Option<Driver>>,
}

impl Inner {
    fn emit(&self, event: ClientEvent) {
        self.dispatcher.notify(event);
    }
}

/// How a live link ended.
enum LinkEnd {
    Shutdown,
    Lost(String),
    AuthRejected(String),
}

/// Owns the single logical connection to the server.
///
/// [`connect`](Self::connect) starts a background driver task that opens a
/// link through the configured [`Transport`], authenticates, forwards every
/// inbound frame to the [`EventDispatcher`] and reconnects with exponential
/// backoff when the link fails. Transport failures never surface as errors;
/// they are dispatched as `ConnectionError`, `Disconnected` and
/// `Reconnecting` events.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transport", &self.inner.transport.name())
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionManager {
    /// Create a manager; nothing happens until [`connect`](Self::connect).
    ///
    /// # Errors
    /// `InvalidConfig` if `config` fails validation.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &SyncConfig,
        dispatcher: Arc<EventDispatcher>,
    ) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                backoff: Backoff::from(&config.reconnect),
                connect_timeout: config.reconnect.connect_timeout(),
                heartbeat: config.heartbeat_interval(),
                dispatcher,
                state: Mutex::new(InternalState::new()),
                outbound: Mutex::new(None),
                driver: Mutex::new(None),
            }),
        })
    }

    /// Start the driver task.
    ///
    /// Returns `Ok(false)` if a driver is already running. A driver that
    /// stopped after exhausting its retries, or after an authentication
    /// rejection, is replaced.
    ///
    /// # Errors
    /// Returns an internal error when called outside a Tokio runtime.
    pub fn connect(&self, identity: Option<Identity>) -> SyncResult<bool> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SyncError::internal("connect requires a Tokio runtime"))?;

        let mut driver = self.inner.driver.lock();
        if driver.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            return Ok(false);
        }

        self.inner.state.lock().reset();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = runtime.spawn(run_driver(Arc::clone(&self.inner), identity, shutdown_rx));
        *driver = Some(Driver { shutdown, handle });
        tracing::debug!(transport = %self.inner.transport.name(), "Connection driver started");
        Ok(true)
    }

    /// Stop the driver, close the link and emit `Disconnected`.
    ///
    /// Does nothing if no driver is running.
    pub async fn disconnect(&self) {
        let driver = self.inner.driver.lock().take();
        let Some(Driver { shutdown, handle }) = driver else {
            return;
        };

        let was_running = !handle.is_finished();
        let _ = shutdown.send(());
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Connection driver ended abnormally");
        }

        *self.inner.outbound.lock() = None;
        self.inner.state.lock().reset();

        if was_running {
            log_connection_event(ConnectionLogEvent::Closed);
            self.inner.emit(ClientEvent::Disconnected {
                reason: CLIENT_DISCONNECT_REASON.to_string(),
            });
        }
    }

    /// Stop the driver without waiting and without emitting events.
    pub fn abort(&self) {
        if let Some(driver) = self.inner.driver.lock().take() {
            driver.handle.abort();
        }
        *self.inner.outbound.lock() = None;
        self.inner.state.lock().reset();
    }

    /// True while a transport link is open
    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// True once the session is usable
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// True while the driver task is alive, including during backoff
    pub fn is_running(&self) -> bool {
        self.inner
            .driver
            .lock()
            .as_ref()
            .is_some_and(|d| !d.handle.is_finished())
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().state
    }

    /// Snapshot for connectivity indicators
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.state.lock().snapshot()
    }

    /// Encode `message` and queue it on the live link.
    ///
    /// # Errors
    /// `NotConnected` when there is no open link; `ProtocolError` if the
    /// message cannot be encoded.
    pub fn send(&self, message: ClientMessage) -> SyncResult<()> {
        let text = message.encode()?;
        let outbound = self.inner.outbound.lock();
        match outbound.as_ref() {
            Some(tx) => tx
                .send(text)
                .map_err(|_| SyncError::not_connected("connection closed")),
            None => Err(SyncError::not_connected("no live connection")),
        }
    }
}

impl MessageSink for ConnectionManager {
    fn is_ready(&self) -> bool {
        ConnectionManager::is_ready(self)
    }

    fn send(&self, message: ClientMessage) -> SyncResult<()> {
        ConnectionManager::send(self, message)
    }
}

async fn run_driver(
    inner: Arc<Inner>,
    identity: Option<Identity>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        inner.state.lock().mark_connecting();

        let opened = tokio::select! {
            _ = &mut shutdown => return,
            result = tokio::time::timeout(inner.connect_timeout, inner.transport.open()) => {
                result.unwrap_or_else(|_| Err(TransportError::Timeout {
                    timeout_ms: inner.connect_timeout.as_millis() as u64,
                }))
            }
        };

        match opened {
            Ok(link) => match drive_link(&inner, link, identity.as_ref(), &mut shutdown).await {
                LinkEnd::Shutdown => return,
                LinkEnd::Lost(reason) => {
                    log_connection_event(ConnectionLogEvent::Lost {
                        reason: reason.clone(),
                    });
                    inner.emit(ClientEvent::Disconnected { reason });
                    let failures = inner.state.lock().record_failure();
                    if !inner.backoff.should_retry(failures) {
                        give_up(&inner, failures, "connection lost".to_string());
                        return;
                    }
                }
                LinkEnd::AuthRejected(reason) => {
                    inner.emit(ClientEvent::Disconnected {
                        reason: reason.clone(),
                    });
                    let attempt = inner.state.lock().failures;
                    inner.emit(ClientEvent::ConnectionError {
                        error: reason,
                        attempt,
                        persistent: true,
                    });
                    return;
                }
            },
            Err(e) => {
                let failures = inner.state.lock().record_failure();
                let retry = inner.backoff.should_retry(failures);
                log_connection_event(ConnectionLogEvent::OpenFailed {
                    error: e.to_string(),
                    attempt: failures,
                });
                if !retry {
                    give_up(&inner, failures, e.to_string());
                    return;
                }
                inner.emit(ClientEvent::ConnectionError {
                    error: e.to_string(),
                    attempt: failures,
                    persistent: false,
                });
            }
        }

        let (failures, delay) = {
            let mut state = inner.state.lock();
            let delay = inner.backoff.delay_for(state.failures);
            state.current_delay = Some(delay);
            (state.failures, delay)
        };
        log_connection_event(ConnectionLogEvent::Reconnecting {
            attempt: failures,
            delay_ms: delay.as_millis() as u64,
        });
        inner.emit(ClientEvent::reconnecting(failures, delay));

        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn give_up(inner: &Inner, failures: u32, error: String) {
    inner.state.lock().mark_disconnected();
    log_connection_event(ConnectionLogEvent::GaveUp {
        attempts: failures,
    });
    inner.emit(ClientEvent::ConnectionError {
        error,
        attempt: failures,
        persistent: true,
    });
}

async fn drive_link(
    inner: &Inner,
    link: TransportLink,
    identity: Option<&Identity>,
    shutdown: &mut oneshot::Receiver<()>,
) -> LinkEnd {
    let TransportLink {
        transport,
        mut sink,
        mut stream,
    } = link;

    let (tx, mut outbox) = mpsc::unbounded_channel::<String>();
    *inner.outbound.lock() = Some(tx);
    inner.state.lock().mark_open(&transport, identity.is_some());

    log_connection_event(ConnectionLogEvent::Opened {
        transport: transport.clone(),
    });
    inner.emit(ClientEvent::Connected { transport });

    let handshake = match identity {
        Some(identity) => match ClientMessage::Authenticate(identity.clone()).encode() {
            Ok(text) => sink.send(text).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        },
        None => {
            log_connection_event(ConnectionLogEvent::SessionReady);
            inner.emit(ClientEvent::SessionReady);
            Ok(())
        }
    };

    let mut heartbeat = tokio::time::interval_at(Instant::now() + inner.heartbeat, inner.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let end = match handshake {
        Err(reason) => LinkEnd::Lost(reason),
        Ok(()) => loop {
            tokio::select! {
                _ = &mut *shutdown => break LinkEnd::Shutdown,

                Some(text) = outbox.recv() => {
                    if let Err(e) = sink.send(text).await {
                        break LinkEnd::Lost(e.to_string());
                    }
                }

                inbound = stream.recv() => match inbound {
                    Some(Ok(text)) => {
                        if let Some(end) = handle_frame(inner, &text) {
                            break end;
                        }
                    }
                    Some(Err(e)) => break LinkEnd::Lost(e.to_string()),
                    None => break LinkEnd::Lost("closed by server".to_string()),
                },

                _ = heartbeat.tick() => {
                    let ping = ClientMessage::Ping { timestamp: Utc::now() };
                    match ping.encode() {
                        Ok(text) => {
                            if let Err(e) = sink.send(text).await {
                                break LinkEnd::Lost(e.to_string());
                            }
                            inner.state.lock().record_ping();
                        }
                        Err(e) => tracing::warn!(error = %e, "Failed to encode ping"),
                    }
                }
            }
        },
    };

    *inner.outbound.lock() = None;
    sink.close().await;
    inner.state.lock().mark_disconnected();
    end
}

/// Decode one inbound frame and dispatch it. Returns `Some` when the link
/// must end.
fn handle_frame(inner: &Inner, text: &str) -> Option<LinkEnd> {
    inner.state.lock().record_message();

    let message = match ServerMessage::decode(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "Dropping undecodable frame");
            return None;
        }
    };

    match message {
        ServerMessage::Authenticated { status } => {
            let success = is_auth_success(&status);
            inner.emit(ClientEvent::Authenticated {
                status: status.clone(),
                success,
            });
            if !success {
                log_connection_event(ConnectionLogEvent::AuthRejected {
                    status: status.clone(),
                });
                return Some(LinkEnd::AuthRejected(format!(
                    "authentication rejected: {}",
                    status
                )));
            }
            if inner.state.lock().mark_authenticated() {
                log_connection_event(ConnectionLogEvent::SessionReady);
                inner.emit(ClientEvent::SessionReady);
            }
        }
        ServerMessage::DataUpdated {
            data_type,
            data,
            timestamp,
        } => {
            inner.emit(ClientEvent::server_data(data_type, data, timestamp));
        }
        ServerMessage::UpdateConfirmed {
            request_id,
            success,
            data,
            error,
        } => {
            inner.emit(ClientEvent::UpdateConfirmed {
                request_id,
                success,
                data,
                error,
            });
        }
        ServerMessage::Pong { .. } => {
            inner.state.lock().record_pong();
            tracing::trace!("Pong received");
        }
        ServerMessage::Domain { name, payload } => {
            inner.emit(ClientEvent::Domain { name, payload });
        }
    }
    None
}
