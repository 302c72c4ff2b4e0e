//! Exponential reconnect backoff

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Delay schedule derived from a [`ReconnectConfig`].
///
/// After the N-th consecutive failure the delay is
/// `min(base * 2^(N-1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    max_attempts: u32,
}

impl Backoff {
    /// Create a schedule from explicit values
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base_ms: base.as_millis() as u64,
            max_ms: max.as_millis() as u64,
            max_attempts,
        }
    }

    /// Delay to wait after `failures` consecutive failures.
    ///
    /// `failures` of 0 is treated as 1.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.max(1) - 1;
        let factor = 2u64.saturating_pow(exponent);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.max_ms))
    }

    /// Whether another attempt is allowed after `failures` consecutive
    /// failures. A bound of 0 never gives up.
    pub fn should_retry(&self, failures: u32) -> bool {
        self.max_attempts == 0 || failures <= self.max_attempts
    }

    /// Configured retry bound (0 = unlimited)
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl From<&ReconnectConfig> for Backoff {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay(), config.max_attempts)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}
