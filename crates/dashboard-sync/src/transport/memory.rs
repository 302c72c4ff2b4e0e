//! In-process transport acting as a scriptable server peer

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{FrameSink, FrameStream, Transport, TransportLink};
use crate::error::TransportError;
use crate::protocol::Frame;

type Inbound = mpsc::UnboundedSender<Result<String, TransportError>>;

#[derive(Default)]
struct PeerState {
    link_id: u64,
    to_client: Option<Inbound>,
    frames: Vec<Frame>,
    opens: usize,
    fail_next: usize,
    auth_reply: Option<String>,
}

/// In-process server peer.
///
/// Cloning yields another handle to the same peer, so a test can hand one
/// clone to the client and keep the other to push frames and inspect what
/// the client sent. Only the most recently opened link is live; frames
/// written to an older link fail with [`TransportError::Closed`].
#[derive(Clone)]
pub struct MemoryTransport {
    name: Arc<str>,
    state: Arc<Mutex<PeerState>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryTransport")
            .field("name", &self.name)
            .field("opens", &state.opens)
            .field("linked", &state.to_client.is_some())
            .finish()
    }
}

impl MemoryTransport {
    /// Create a peer named `memory`
    pub fn new() -> Self {
        Self::named("memory")
    }

    /// Create a peer with a custom transport name
    pub fn named(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            state: Arc::new(Mutex::new(PeerState::default())),
        }
    }

    /// Answer every `authenticate` frame with `authenticated {status}`
    #[must_use]
    pub fn with_auth_reply(self, status: impl Into<String>) -> Self {
        self.state.lock().auth_reply = Some(status.into());
        self
    }

    /// Make the next `count` opens fail
    pub fn fail_next(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    /// Push `{event, data}` to the client. Returns `false` without a live link.
    pub fn push(&self, event: &str, data: Value) -> bool {
        match Frame::new(event, data).to_text() {
            Ok(text) => self.push_raw(text),
            Err(_) => false,
        }
    }

    /// Push a raw text frame to the client
    pub fn push_raw(&self, text: impl Into<String>) -> bool {
        let state = self.state.lock();
        match &state.to_client {
            Some(tx) => tx.send(Ok(text.into())).is_ok(),
            None => false,
        }
    }

    /// Deliver a read error to the client, as a broken socket would
    pub fn inject_error(&self, reason: &str) -> bool {
        let state = self.state.lock();
        match &state.to_client {
            Some(tx) => tx
                .send(Err(TransportError::Closed {
                    reason: reason.to_string(),
                }))
                .is_ok(),
            None => false,
        }
    }

    /// Close the live link from the server side
    pub fn drop_link(&self) -> bool {
        self.state.lock().to_client.take().is_some()
    }

    /// True while a link is open
    pub fn is_linked(&self) -> bool {
        self.state.lock().to_client.is_some()
    }

    /// Number of successful opens
    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    /// Every frame the client has written, in order
    pub fn frames(&self) -> Vec<Frame> {
        self.state.lock().frames.clone()
    }

    /// Frames the client has written under `event`
    pub fn frames_named(&self, event: &str) -> Vec<Frame> {
        self.state
            .lock()
            .frames
            .iter()
            .filter(|f| f.event == event)
            .cloned()
            .collect()
    }

    /// Forget recorded frames
    pub fn clear_frames(&self) {
        self.state.lock().frames.clear();
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self) -> Result<TransportLink, TransportError> {
        let mut state = self.state.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(TransportError::ConnectionFailed {
                reason: "refused by memory peer".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.link_id += 1;
        state.opens += 1;
        state.to_client = Some(tx);
        let link_id = state.link_id;
        drop(state);

        Ok(TransportLink::new(
            self.name(),
            MemorySink {
                link_id,
                state: Arc::clone(&self.state),
            },
            MemoryStream { rx },
        ))
    }
}

struct MemorySink {
    link_id: u64,
    state: Arc<Mutex<PeerState>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.link_id != self.link_id || state.to_client.is_none() {
            return Err(TransportError::Closed {
                reason: "memory link closed".to_string(),
            });
        }

        let frame = Frame::parse(&text).unwrap_or_else(|_| Frame::new("", Value::String(text)));
        let reply = match (&state.auth_reply, frame.event.as_str()) {
            (Some(status), "authenticate") => {
                Frame::new("authenticated", serde_json::json!({ "status": status }))
                    .to_text()
                    .ok()
            }
            _ => None,
        };
        state.frames.push(frame);

        if let (Some(reply), Some(tx)) = (reply, &state.to_client) {
            let _ = tx.send(Ok(reply));
        }
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = self.state.lock();
        if state.link_id == self.link_id {
            state.to_client = None;
        }
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Result<String, TransportError>>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await
    }
}
