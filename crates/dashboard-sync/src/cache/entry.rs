//! Cached value with its recording time and time-to-live

use std::time::Duration;
use tokio::time::Instant;

/// Last-known value for one data type.
///
/// An entry is fresh while `now - recorded_at <= ttl`; a read at exactly
/// `ttl` is still a hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The cached payload
    pub value: serde_json::Value,
    /// When the value was written
    pub recorded_at: Instant,
    /// How long the value stays fresh
    pub ttl: Duration,
}

impl CacheEntry {
    /// Create an entry recorded now
    pub fn new(value: serde_json::Value, ttl: Duration) -> Self {
        Self::recorded_at(value, ttl, Instant::now())
    }

    /// Create an entry with an explicit recording time
    pub fn recorded_at(value: serde_json::Value, ttl: Duration, recorded_at: Instant) -> Self {
        Self {
            value,
            recorded_at,
            ttl,
        }
    }

    /// Check whether the entry is stale at `now`
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.recorded_at) > self.ttl
    }

    /// Check whether the entry is stale now
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Age of the entry
    pub fn age(&self) -> Duration {
        self.recorded_at.elapsed()
    }

    /// Freshness left before the entry becomes a miss
    pub fn remaining_ttl(&self) -> Duration {
        self.ttl.saturating_sub(self.age())
    }
}
