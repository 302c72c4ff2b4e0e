//! Transport composition with ordered fallback

use async_trait::async_trait;
use std::sync::Arc;

use super::{Transport, TransportLink};
use crate::error::TransportError;

/// Tries each transport in preference order and keeps the first link that
/// opens.
///
/// Typical use is a WebSocket endpoint followed by a long-poll or proxy
/// endpoint that gets upgraded by the server.
#[derive(Clone, Default)]
pub struct FallbackTransport {
    transports: Vec<Arc<dyn Transport>>,
}

impl FallbackTransport {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transport with lower preference than those already added
    #[must_use]
    pub fn then(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Number of candidate transports
    pub fn len(&self) -> usize {
        self.transports.len()
    }

    /// True when no transport has been added
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

impl std::fmt::Debug for FallbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.transports.iter().map(|t| t.name()).collect();
        f.debug_struct("FallbackTransport")
            .field("transports", &names)
            .finish()
    }
}

#[async_trait]
impl Transport for FallbackTransport {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn open(&self) -> Result<TransportLink, TransportError> {
        let mut failures = Vec::with_capacity(self.transports.len());
        for transport in &self.transports {
            match transport.open().await {
                Ok(link) => {
                    if !failures.is_empty() {
                        tracing::info!(
                            transport = %link.transport,
                            skipped = failures.len(),
                            "Connected using fallback transport"
                        );
                    }
                    return Ok(link);
                }
                Err(e) => {
                    tracing::debug!(transport = %transport.name(), error = %e, "Transport failed to open");
                    failures.push(format!("{}: {}", transport.name(), e));
                }
            }
        }

        if failures.is_empty() {
            return Err(TransportError::Exhausted(
                "no transports configured".to_string(),
            ));
        }
        Err(TransportError::Exhausted(failures.join("; ")))
    }
}
