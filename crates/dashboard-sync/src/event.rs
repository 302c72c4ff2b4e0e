//! Data types and the closed set of events dispatched by the client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::optimistic::RequestId;

/// Dashboard data types served by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Aggregated dashboard metrics
    Metrics,
    /// Team roster and utilisation
    TeamData,
    /// Client roster and health scorecards
    ClientData,
    /// Currently running timers
    ActiveTimers,
    /// Everything at once; requested after each session becomes ready
    Comprehensive,
}

impl DataType {
    /// Every data type, in wire order.
    pub const ALL: [DataType; 5] = [
        DataType::Metrics,
        DataType::TeamData,
        DataType::ClientData,
        DataType::ActiveTimers,
        DataType::Comprehensive,
    ];

    /// Wire name of the data type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::TeamData => "team_data",
            Self::ClientData => "client_data",
            Self::ActiveTimers => "active_timers",
            Self::Comprehensive => "comprehensive",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .into_iter()
            .find(|dt| dt.as_str() == s)
            .ok_or_else(|| format!("unknown data type '{}'", s))
    }
}

/// Discriminant of [`ClientEvent`], used as the dispatcher registration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// Transport link opened
    Connected,
    /// Transport link lost or closed
    Disconnected,
    /// Opening or authenticating failed
    ConnectionError,
    /// A reconnect has been scheduled
    Reconnecting,
    /// Server answered the authenticate message
    Authenticated,
    /// Session usable: subscriptions replayed, queued refreshes flushed
    SessionReady,
    /// New data for a data type
    DataUpdated,
    /// Server confirmation of an optimistic update
    UpdateConfirmed,
    /// An optimistic update was committed
    OptimisticConfirmed,
    /// An optimistic update was rolled back
    OptimisticRejected,
    /// Forwarded domain event
    Domain,
}

impl EventKind {
    /// Dotted event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::ConnectionError => "connection_error",
            Self::Reconnecting => "reconnecting",
            Self::Authenticated => "authenticated",
            Self::SessionReady => "session_ready",
            Self::DataUpdated => "dashboard.data_updated",
            Self::UpdateConfirmed => "dashboard.update_confirmed",
            Self::OptimisticConfirmed => "optimistic.confirmed",
            Self::OptimisticRejected => "optimistic.rejected",
            Self::Domain => "domain",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the value carried by a [`ClientEvent::DataUpdated`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DataSource {
    /// Pushed by the server
    Server,
    /// Served from the local cache while a refresh is in flight
    Cache,
    /// Speculative local value awaiting confirmation
    #[serde(rename_all = "camelCase")]
    Optimistic {
        /// Correlation id of the update
        request_id: RequestId,
    },
    /// Server-confirmed value of an optimistic update
    #[serde(rename_all = "camelCase")]
    Confirmed {
        /// Correlation id of the update
        request_id: RequestId,
    },
    /// Committed value restored after a rejected or orphaned update
    #[serde(rename_all = "camelCase")]
    Rollback {
        /// Correlation id of the update
        request_id: RequestId,
    },
}

impl DataSource {
    /// True for values that have not been confirmed by the server.
    pub fn is_speculative(&self) -> bool {
        matches!(self, Self::Optimistic { .. })
    }
}

/// Why an optimistic update was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RejectionReason {
    /// The server answered with `success: false`
    Rejected {
        /// Server-provided error message, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// No confirmation arrived within the configured timeout
    #[serde(rename_all = "camelCase")]
    TimedOut {
        /// Age of the update when it was orphaned
        after_ms: u64,
    },
    /// The client was disconnected or disposed with the update pending
    Discarded,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { error: Some(e) } => write!(f, "rejected by server: {}", e),
            Self::Rejected { error: None } => write!(f, "rejected by server"),
            Self::TimedOut { after_ms } => write!(f, "no confirmation after {}ms", after_ms),
            Self::Discarded => write!(f, "discarded on teardown"),
        }
    }
}

/// Every event the client dispatches.
///
/// Serialized with a `type` tag so the stream can be forwarded verbatim to a
/// UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
#[non_exhaustive]
pub enum ClientEvent {
    /// Transport link opened
    Connected {
        /// Name of the transport that opened
        transport: String,
    },
    /// Transport link lost or deliberately closed
    Disconnected {
        /// Close or failure reason
        reason: String,
    },
    /// Opening or authenticating failed
    #[serde(rename_all = "camelCase")]
    ConnectionError {
        /// Failure description
        error: String,
        /// Consecutive failure count
        attempt: u32,
        /// True once retries are exhausted; no further reconnects follow
        persistent: bool,
    },
    /// A reconnect has been scheduled
    #[serde(rename_all = "camelCase")]
    Reconnecting {
        /// Upcoming attempt number
        attempt: u32,
        /// Backoff before the attempt, in milliseconds
        delay_ms: u64,
    },
    /// Server answered the authenticate message
    Authenticated {
        /// Raw status string
        status: String,
        /// Whether the status is a success
        success: bool,
    },
    /// Session is usable
    SessionReady,
    /// New data for a data type
    #[serde(rename_all = "camelCase")]
    DataUpdated {
        /// Data type the payload belongs to
        data_type: DataType,
        /// Opaque payload
        data: serde_json::Value,
        /// Server timestamp, when known
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
        /// Origin of the value
        source: DataSource,
    },
    /// Raw server confirmation of an optimistic update
    #[serde(rename_all = "camelCase")]
    UpdateConfirmed {
        /// Correlation id
        request_id: RequestId,
        /// Whether the server accepted the update
        success: bool,
        /// Server-confirmed value
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        /// Server-provided failure message
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// An optimistic update was committed
    #[serde(rename_all = "camelCase")]
    OptimisticConfirmed {
        /// Correlation id
        request_id: RequestId,
        /// Data type of the update
        data_type: DataType,
        /// Committed value
        data: serde_json::Value,
    },
    /// An optimistic update was rolled back
    #[serde(rename_all = "camelCase")]
    OptimisticRejected {
        /// Correlation id
        request_id: RequestId,
        /// Data type of the update
        data_type: DataType,
        /// Why it was rolled back
        reason: RejectionReason,
    },
    /// Domain event forwarded verbatim from the server
    Domain {
        /// Dotted event name, e.g. `timer.started`
        name: String,
        /// Opaque payload
        payload: serde_json::Value,
    },
}

impl ClientEvent {
    /// Registration key of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::ConnectionError { .. } => EventKind::ConnectionError,
            Self::Reconnecting { .. } => EventKind::Reconnecting,
            Self::Authenticated { .. } => EventKind::Authenticated,
            Self::SessionReady => EventKind::SessionReady,
            Self::DataUpdated { .. } => EventKind::DataUpdated,
            Self::UpdateConfirmed { .. } => EventKind::UpdateConfirmed,
            Self::OptimisticConfirmed { .. } => EventKind::OptimisticConfirmed,
            Self::OptimisticRejected { .. } => EventKind::OptimisticRejected,
            Self::Domain { .. } => EventKind::Domain,
        }
    }

    /// A `DataUpdated` event for a server push.
    pub fn server_data(
        data_type: DataType,
        data: serde_json::Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self::DataUpdated {
            data_type,
            data,
            timestamp,
            source: DataSource::Server,
        }
    }

    /// A `Reconnecting` event for the given backoff.
    pub fn reconnecting(attempt: u32, delay: Duration) -> Self {
        Self::Reconnecting {
            attempt,
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Data type carried by the event, if any.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::DataUpdated { data_type, .. }
            | Self::OptimisticConfirmed { data_type, .. }
            | Self::OptimisticRejected { data_type, .. } => Some(*data_type),
            _ => None,
        }
    }
}
