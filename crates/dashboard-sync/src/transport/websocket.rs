//! WebSocket transport over tokio-tungstenite

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{FrameSink, FrameStream, Transport, TransportLink};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a `ws://` or `wss://` URL.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    /// Create a transport for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Target URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn open(&self) -> Result<TransportLink, TransportError> {
        tracing::debug!(url = %self.url, "Opening WebSocket");
        let (ws, _response) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| TransportError::ConnectionFailed {
                    reason: e.to_string(),
                })?;
        let (sink, stream) = ws.split();
        Ok(TransportLink::new(
            self.name(),
            WsSink { inner: sink },
            WsReader { inner: stream },
        ))
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send {
                reason: e.to_string(),
            })
    }

    async fn close(&mut self) {
        if let Err(e) = self.inner.close().await {
            tracing::trace!(error = %e, "WebSocket close failed");
        }
    }
}

struct WsReader {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsReader {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => {
                    return Some(String::from_utf8(bytes.to_vec()).map_err(|e| {
                        TransportError::Closed {
                            reason: format!("non-UTF-8 binary frame: {}", e),
                        }
                    }));
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(frame = ?frame, "WebSocket closed by peer");
                    return None;
                }
                // tungstenite answers pings itself
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => {
                    return Some(Err(TransportError::Closed {
                        reason: e.to_string(),
                    }));
                }
            }
        }
    }
}
