//! Lifecycle log events.
//!
//! Connection and optimistic-update lifecycles are logged through the typed
//! events below so that every transition is reported with the same fields
//! and at a consistent level.

use crate::event::DataType;
use crate::optimistic::RequestId;

// =============================================================================
// Connection Events
// =============================================================================

/// Connection lifecycle events for logging.
#[derive(Debug, Clone)]
pub enum ConnectionLogEvent {
    /// A transport link was opened.
    Opened {
        /// Transport name.
        transport: String,
    },
    /// Opening a link failed.
    OpenFailed {
        /// Failure description.
        error: String,
        /// Consecutive failure count.
        attempt: u32,
    },
    /// A live link was lost.
    Lost {
        /// Close or failure reason.
        reason: String,
    },
    /// A reconnect was scheduled.
    Reconnecting {
        /// Upcoming attempt number.
        attempt: u32,
        /// Backoff before the attempt.
        delay_ms: u64,
    },
    /// Retries are exhausted; the driver stops.
    GaveUp {
        /// Consecutive failures observed.
        attempts: u32,
    },
    /// The session became usable.
    SessionReady,
    /// The server rejected the authenticate message.
    AuthRejected {
        /// Raw status returned by the server.
        status: String,
    },
    /// The link was closed by the client.
    Closed,
}

/// Log a connection lifecycle event.
///
/// - Opened/SessionReady/Closed: Info level
/// - Reconnecting: Debug level
/// - OpenFailed/Lost: Warn level
/// - GaveUp/AuthRejected: Error level
pub fn log_connection_event(event: ConnectionLogEvent) {
    match event {
        ConnectionLogEvent::Opened { transport } => {
            tracing::info!(transport = %transport, "Connection opened");
        }
        ConnectionLogEvent::OpenFailed { error, attempt } => {
            tracing::warn!(error = %error, attempt, "Connection attempt failed");
        }
        ConnectionLogEvent::Lost { reason } => {
            tracing::warn!(reason = %reason, "Connection lost");
        }
        ConnectionLogEvent::Reconnecting { attempt, delay_ms } => {
            tracing::debug!(attempt, delay_ms, "Reconnect scheduled");
        }
        ConnectionLogEvent::GaveUp { attempts } => {
            tracing::error!(attempts, "Reconnect attempts exhausted");
        }
        ConnectionLogEvent::SessionReady => {
            tracing::info!("Session ready");
        }
        ConnectionLogEvent::AuthRejected { status } => {
            tracing::error!(status = %status, "Authentication rejected");
        }
        ConnectionLogEvent::Closed => {
            tracing::info!("Connection closed by client");
        }
    }
}

// =============================================================================
// Optimistic Update Events
// =============================================================================

/// Optimistic update lifecycle events for logging.
#[derive(Debug, Clone)]
pub enum OptimisticLogEvent {
    /// The speculative value was applied locally.
    Applied,
    /// Sending the update to the server failed; it stays pending.
    SendFailed {
        /// Send error.
        error: String,
    },
    /// The server confirmed the update.
    Confirmed,
    /// The server rejected the update.
    Rejected {
        /// Server-provided error, if any.
        error: Option<String>,
    },
    /// No confirmation arrived in time.
    TimedOut {
        /// Age of the update.
        after_ms: u64,
    },
    /// A confirmation arrived for an update that is no longer pending.
    Ignored,
}

/// Log an optimistic update lifecycle event.
///
/// - Applied/Confirmed/Ignored: Debug level
/// - SendFailed/Rejected/TimedOut: Warn level
pub fn log_optimistic_event(
    request_id: &RequestId,
    data_type: Option<DataType>,
    event: OptimisticLogEvent,
) {
    let data_type = data_type.map(|dt| dt.as_str()).unwrap_or("unknown");
    match event {
        OptimisticLogEvent::Applied => {
            tracing::debug!(
                request_id = %request_id,
                data_type = %data_type,
                "Optimistic update applied"
            );
        }
        OptimisticLogEvent::SendFailed { error } => {
            tracing::warn!(
                request_id = %request_id,
                data_type = %data_type,
                error = %error,
                "Optimistic update not sent; awaiting timeout"
            );
        }
        OptimisticLogEvent::Confirmed => {
            tracing::debug!(
                request_id = %request_id,
                data_type = %data_type,
                "Optimistic update confirmed"
            );
        }
        OptimisticLogEvent::Rejected { error } => {
            tracing::warn!(
                request_id = %request_id,
                data_type = %data_type,
                error = ?error,
                "Optimistic update rejected"
            );
        }
        OptimisticLogEvent::TimedOut { after_ms } => {
            tracing::warn!(
                request_id = %request_id,
                data_type = %data_type,
                after_ms,
                "Optimistic update timed out"
            );
        }
        OptimisticLogEvent::Ignored => {
            tracing::debug!(
                request_id = %request_id,
                "Confirmation for unknown or settled update ignored"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_functions_accept_every_event() {
        log_connection_event(ConnectionLogEvent::Opened {
            transport: "memory".into(),
        });
        log_connection_event(ConnectionLogEvent::OpenFailed {
            error: "refused".into(),
            attempt: 1,
        });
        log_connection_event(ConnectionLogEvent::Lost {
            reason: "eof".into(),
        });
        log_connection_event(ConnectionLogEvent::Reconnecting {
            attempt: 2,
            delay_ms: 2000,
        });
        log_connection_event(ConnectionLogEvent::GaveUp { attempts: 10 });
        log_connection_event(ConnectionLogEvent::SessionReady);
        log_connection_event(ConnectionLogEvent::AuthRejected {
            status: "denied".into(),
        });
        log_connection_event(ConnectionLogEvent::Closed);

        let id = RequestId::new();
        log_optimistic_event(&id, Some(DataType::Metrics), OptimisticLogEvent::Applied);
        log_optimistic_event(
            &id,
            Some(DataType::Metrics),
            OptimisticLogEvent::SendFailed {
                error: "offline".into(),
            },
        );
        log_optimistic_event(&id, None, OptimisticLogEvent::Ignored);
        log_optimistic_event(
            &id,
            Some(DataType::Metrics),
            OptimisticLogEvent::TimedOut { after_ms: 30_000 },
        );
    }
}
