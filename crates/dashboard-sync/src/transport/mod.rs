//! Transports carrying text frames between client and server.
//!
//! A [`Transport`] opens a [`TransportLink`]: a write half ([`FrameSink`])
//! and a read half ([`FrameStream`]) that the connection driver owns
//! separately, so it can wait for inbound frames while writing outbound
//! ones.
//!
//! Provided transports:
//! - [`WebSocketTransport`]: tokio-tungstenite client
//! - [`FallbackTransport`]: tries several transports in preference order
//! - [`MemoryTransport`]: in-process peer for tests and demos

mod fallback;
mod memory;
mod websocket;

use async_trait::async_trait;

use crate::error::TransportError;

pub use fallback::FallbackTransport;
pub use memory::MemoryTransport;
pub use websocket::WebSocketTransport;

/// Something that can open a link to the server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name reported in `Connected` events, e.g. `websocket`
    fn name(&self) -> &str;

    /// Open a new link.
    async fn open(&self) -> Result<TransportLink, TransportError>;
}

/// Write half of a link.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text frame
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the link; errors while closing are not interesting
    async fn close(&mut self);
}

/// Read half of a link.
#[async_trait]
pub trait FrameStream: Send {
    /// Next inbound text frame; `None` once the peer has closed the link
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;
}

/// An open link.
pub struct TransportLink {
    /// Name of the transport that produced the link
    pub transport: String,
    /// Write half
    pub sink: Box<dyn FrameSink>,
    /// Read half
    pub stream: Box<dyn FrameStream>,
}

impl TransportLink {
    /// Assemble a link from its halves
    pub fn new(
        transport: impl Into<String>,
        sink: impl FrameSink + 'static,
        stream: impl FrameStream + 'static,
    ) -> Self {
        Self {
            transport: transport.into(),
            sink: Box::new(sink),
            stream: Box::new(stream),
        }
    }
}

impl std::fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLink")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}
