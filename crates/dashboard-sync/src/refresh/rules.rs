//! Domain event → refresh mapping

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::pattern::event_matches;
use crate::event::DataType;

/// Refresh `data_type` whenever a domain event matching `pattern` arrives,
/// at most once per `throttle_ms` (0 = every time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRule {
    /// Dotted event pattern, e.g. `timer.*` or `*.updated`
    pub pattern: String,
    /// Data type to refresh
    pub data_type: DataType,
    /// Minimum spacing between refreshes triggered for this type
    #[serde(default)]
    pub throttle_ms: u64,
}

impl RefreshRule {
    /// A rule without throttling
    pub fn immediate(pattern: impl Into<String>, data_type: DataType) -> Self {
        Self {
            pattern: pattern.into(),
            data_type,
            throttle_ms: 0,
        }
    }

    /// A throttled rule
    pub fn throttled(pattern: impl Into<String>, data_type: DataType, throttle: Duration) -> Self {
        Self {
            pattern: pattern.into(),
            data_type,
            throttle_ms: throttle.as_millis() as u64,
        }
    }

    /// Whether the rule applies to the domain event `name`
    pub fn matches(&self, name: &str) -> bool {
        event_matches(&self.pattern, name)
    }

    /// Throttle as a Duration
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Rules for the standard dashboard domain events
    pub fn defaults() -> Vec<RefreshRule> {
        let second = Duration::from_secs(1);
        let five = Duration::from_secs(5);
        vec![
            Self::throttled("timer.*", DataType::ActiveTimers, second),
            Self::throttled("time_entry.*", DataType::ActiveTimers, second),
            Self::throttled("time_entry.*", DataType::Metrics, five),
            Self::throttled("client.*", DataType::ClientData, five),
            Self::throttled("team.*", DataType::TeamData, five),
        ]
    }
}
