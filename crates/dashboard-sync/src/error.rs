//! Error types for the synchronization client
//!
//! Expected runtime conditions (a dropped connection, a stale cache entry, a
//! rejected optimistic update) are modelled as dispatched events, never as
//! errors. The types here cover the remaining cases: sending while offline,
//! malformed frames, transport failures and configuration mistakes caught at
//! construction time.
//!
//! # Error Codes
//!
//! [`SyncError`] carries a [`SyncErrorCode`]. When serialized, codes are
//! converted to SCREAMING_SNAKE_CASE strings.
//!
//! # Example
//! ```rust,ignore
//! use dashboard_sync::{SyncError, SyncErrorCode};
//!
//! let error = SyncError::new(SyncErrorCode::NotConnected, "no live link");
//! let error = SyncError::not_connected("no live link"); // Convenience method
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Type-safe error codes for client operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum SyncErrorCode {
    /// No live, ready connection to send on
    NotConnected,
    /// The transport failed to open, send or receive
    TransportError,
    /// A frame could not be encoded or decoded
    ProtocolError,
    /// An operation did not complete in time
    Timeout,
    /// The server rejected a request
    Rejected,
    /// Configuration failed validation
    InvalidConfig,
    /// The client has been disposed
    Disposed,
    /// An unexpected internal error occurred
    InternalError,
}

impl SyncErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::TransportError => "TRANSPORT_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Rejected => "REJECTED",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::Disposed => "DISPOSED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Returns true if retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::TransportError | Self::Timeout
        )
    }
}

impl fmt::Display for SyncErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Client error with a type-safe code and message.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("[{code}] {message}")]
pub struct SyncError {
    /// Type-safe error code
    pub code: SyncErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional structured details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl SyncError {
    /// Create a new error with code and message.
    pub fn new(code: SyncErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Serialize) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }

    /// No live connection
    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::NotConnected, message)
    }

    /// Transport failure
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::TransportError, message)
    }

    /// Encoding or decoding failure
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::ProtocolError, message)
    }

    /// Operation timed out
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::Timeout, message)
    }

    /// Server-side rejection
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::Rejected, message)
    }

    /// Invalid configuration
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::InvalidConfig, message)
    }

    /// The client has been disposed
    pub fn disposed() -> Self {
        Self::new(SyncErrorCode::Disposed, "client has been disposed")
    }

    /// Unexpected internal failure
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::InternalError, message)
    }
}

/// Result type alias for client operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by a [`Transport`](crate::transport::Transport) or its link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection could not be established
    #[error("connection failed: {reason}")]
    ConnectionFailed {
        /// Underlying cause
        reason: String,
    },

    /// Opening the connection took too long
    #[error("connection timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// The link was closed while in use
    #[error("connection closed: {reason}")]
    Closed {
        /// Close reason
        reason: String,
    },

    /// Writing a frame failed
    #[error("send failed: {reason}")]
    Send {
        /// Underlying cause
        reason: String,
    },

    /// Every candidate transport failed
    #[error("no transport available: {0}")]
    Exhausted(String),
}

/// Errors encoding or decoding wire frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The frame is not a `{event, data}` JSON object
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame's payload does not match its event
    #[error("invalid payload for '{event}': {reason}")]
    InvalidPayload {
        /// Event name of the frame
        event: String,
        /// Decoder message
        reason: String,
    },

    /// An outbound message could not be serialized
    #[error("failed to encode '{event}': {reason}")]
    Encode {
        /// Event name of the message
        event: String,
        /// Encoder message
        reason: String,
    },
}

/// Failure reported by an event handler.
///
/// Handler failures are isolated by the dispatcher; they are logged and
/// counted but never reach the event source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Failure description
    pub message: String,
}

impl HandlerError {
    /// Create a handler error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Describe a panic payload captured from a handler.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::new(format!("handler panicked: {}", detail))
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { .. } => SyncError::timeout(err.to_string()),
            other => SyncError::transport(other.to_string()),
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::protocol(err.to_string())
    }
}

impl From<crate::config::ConfigValidationError> for SyncError {
    fn from(err: crate::config::ConfigValidationError) -> Self {
        SyncError::invalid_config(err.to_string())
    }
}
