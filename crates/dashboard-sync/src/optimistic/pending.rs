//! In-flight optimistic updates

use std::time::Duration;
use tokio::time::Instant;

use super::RequestId;
use crate::event::DataType;

/// A speculative write awaiting server confirmation.
///
/// Exists from `apply` until exactly one of confirmation, rejection or
/// timeout removes it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOptimisticUpdate {
    /// Correlation id
    pub request_id: RequestId,
    /// Data type written
    pub data_type: DataType,
    /// Value shown while awaiting confirmation
    pub speculative: serde_json::Value,
    /// When the update was applied
    pub issued_at: Instant,
}

impl PendingOptimisticUpdate {
    /// Age of the update at `now`
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.issued_at)
    }

    /// Whether the update is at least `timeout` old at `now`
    pub fn is_orphaned_at(&self, now: Instant, timeout: Duration) -> bool {
        self.age_at(now) >= timeout
    }
}
