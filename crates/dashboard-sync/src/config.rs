//! Configuration for the synchronization client.
//!
//! [`SyncConfig`] groups the reconnect policy, cache TTLs, refresh rules and
//! timers. Every field has a default, so `SyncConfig::default()` is a working
//! configuration; configurations can also be loaded from JSON.
//!
//! # Example
//! ```rust,ignore
//! use dashboard_sync::{SyncConfig, DataType};
//! use std::time::Duration;
//!
//! let config = SyncConfig::new()
//!     .with_reconnect(ReconnectConfig::new().with_max_attempts(5))
//!     .with_ttl(DataType::ActiveTimers, Duration::from_secs(15))
//!     .with_optimistic_timeout(Duration::from_secs(20));
//!
//! config.validate()?;
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::event::DataType;
use crate::refresh::RefreshRule;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigValidationError {
    /// base_delay_ms must be greater than 0
    #[error("reconnect base_delay_ms must be greater than 0")]
    InvalidBaseDelay,
    /// max_delay_ms must not be below base_delay_ms
    #[error("reconnect max_delay_ms ({max}) must be >= base_delay_ms ({base})")]
    InvalidMaxDelay {
        /// Configured base delay
        base: u64,
        /// Configured max delay
        max: u64,
    },
    /// connect_timeout_ms must be greater than 0
    #[error("connect_timeout_ms must be greater than 0")]
    InvalidConnectTimeout,
    /// heartbeat_interval_ms must be greater than 0
    #[error("heartbeat_interval_ms must be greater than 0")]
    InvalidHeartbeat,
    /// cache max_entries must be greater than 0
    #[error("cache max_entries must be greater than 0")]
    InvalidCacheCapacity,
    /// A TTL of zero makes every entry a miss
    #[error("ttl for '{0}' must be greater than 0")]
    InvalidTtl(String),
    /// optimistic_timeout_ms must be greater than 0
    #[error("optimistic_timeout_ms must be greater than 0")]
    InvalidOptimisticTimeout,
    /// sweep_interval_ms must be greater than 0
    #[error("sweep_interval_ms must be greater than 0")]
    InvalidSweepInterval,
    /// A refresh rule has an empty pattern
    #[error("refresh rule #{0} has an empty pattern")]
    EmptyRulePattern(usize),
    /// The configuration could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

// =============================================================================
// Reconnect
// =============================================================================

/// Reconnection policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt (default: 1000ms)
    pub base_delay_ms: u64,
    /// Upper bound for the exponential delay (default: 10000ms)
    pub max_delay_ms: u64,
    /// Consecutive failures tolerated before giving up (0 = unlimited, default: 10)
    pub max_attempts: u32,
    /// How long a single open may take (default: 10000ms)
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            max_attempts: 10,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ReconnectConfig {
    /// Create a reconnect policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base delay
    #[must_use = "This method returns a new ReconnectConfig and does not modify self"]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the maximum delay
    #[must_use = "This method returns a new ReconnectConfig and does not modify self"]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the number of consecutive failures tolerated (0 = unlimited)
    #[must_use = "This method returns a new ReconnectConfig and does not modify self"]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the connect timeout
    #[must_use = "This method returns a new ReconnectConfig and does not modify self"]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Base delay as a Duration
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Max delay as a Duration
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Connect timeout as a Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Default TTLs per data type, in milliseconds.
pub const DEFAULT_TTLS_MS: [(DataType, u64); 5] = [
    (DataType::ActiveTimers, 30_000),
    (DataType::TeamData, 180_000),
    (DataType::Metrics, 300_000),
    (DataType::ClientData, 600_000),
    (DataType::Comprehensive, 300_000),
];

/// Default maximum number of cache entries
pub const DEFAULT_MAX_ENTRIES: usize = 64;

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Per data type TTL in milliseconds
    pub ttl_ms: BTreeMap<DataType, u64>,
    /// TTL for data types missing from `ttl_ms` (default: 5 minutes)
    pub default_ttl_ms: u64,
    /// Maximum number of entries before LRU eviction
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_TTLS_MS.into_iter().collect(),
            default_ttl_ms: 300_000,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl CacheConfig {
    /// Create a cache configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the TTL for one data type
    #[must_use = "This method returns a new CacheConfig and does not modify self"]
    pub fn with_ttl(mut self, data_type: DataType, ttl: Duration) -> Self {
        self.ttl_ms.insert(data_type, ttl.as_millis() as u64);
        self
    }

    /// Set the maximum number of entries
    #[must_use = "This method returns a new CacheConfig and does not modify self"]
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// TTL applied when caching `data_type`
    pub fn ttl_for(&self, data_type: DataType) -> Duration {
        Duration::from_millis(
            self.ttl_ms
                .get(&data_type)
                .copied()
                .unwrap_or(self.default_ttl_ms),
        )
    }
}

// =============================================================================
// Refresh
// =============================================================================

/// Refresh coordination settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Domain event → refresh mapping, evaluated in order
    pub rules: Vec<RefreshRule>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            rules: RefreshRule::defaults(),
        }
    }
}

impl RefreshConfig {
    /// Refresh settings with the default rule table
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh settings without any domain rules
    pub fn without_rules() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule
    #[must_use = "This method returns a new RefreshConfig and does not modify self"]
    pub fn with_rule(mut self, rule: RefreshRule) -> Self {
        self.rules.push(rule);
        self
    }
}

// =============================================================================
// Top-level
// =============================================================================

/// Client configuration.
///
/// # Fields
///
/// * `reconnect` - Backoff and retry bound for the connection.
/// * `cache` - TTL table and capacity of the cache.
/// * `refresh` - Rules turning domain events into refresh requests.
/// * `heartbeat_interval_ms` - Interval between `ping` messages. Default: 25s.
/// * `optimistic_timeout_ms` - Age at which an unconfirmed optimistic update
///   is rolled back. Default: 30s.
/// * `sweep_interval_ms` - How often pending optimistic updates are checked
///   for timeout. Default: 1s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Reconnect policy
    pub reconnect: ReconnectConfig,
    /// Cache settings
    pub cache: CacheConfig,
    /// Refresh settings
    pub refresh: RefreshConfig,
    /// Heartbeat interval in milliseconds (default: 25000)
    pub heartbeat_interval_ms: u64,
    /// Optimistic update timeout in milliseconds (default: 30000)
    pub optimistic_timeout_ms: u64,
    /// Optimistic timeout sweep interval in milliseconds (default: 1000)
    pub sweep_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            cache: CacheConfig::default(),
            refresh: RefreshConfig::default(),
            heartbeat_interval_ms: 25_000,
            optimistic_timeout_ms: 30_000,
            sweep_interval_ms: 1_000,
        }
    }
}

impl SyncConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigValidationError> {
        let config: SyncConfig = serde_json::from_str(json)
            .map_err(|e| ConfigValidationError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the reconnect policy
    #[must_use = "This method returns a new SyncConfig and does not modify self"]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Replace the cache settings
    #[must_use = "This method returns a new SyncConfig and does not modify self"]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Override the TTL for one data type
    #[must_use = "This method returns a new SyncConfig and does not modify self"]
    pub fn with_ttl(mut self, data_type: DataType, ttl: Duration) -> Self {
        self.cache = self.cache.with_ttl(data_type, ttl);
        self
    }

    /// Replace the refresh settings
    #[must_use = "This method returns a new SyncConfig and does not modify self"]
    pub fn with_refresh(mut self, refresh: RefreshConfig) -> Self {
        self.refresh = refresh;
        self
    }

    /// Set the heartbeat interval
    #[must_use = "This method returns a new SyncConfig and does not modify self"]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the optimistic update timeout
    #[must_use = "This method returns a new SyncConfig and does not modify self"]
    pub fn with_optimistic_timeout(mut self, timeout: Duration) -> Self {
        self.optimistic_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the optimistic timeout sweep interval
    #[must_use = "This method returns a new SyncConfig and does not modify self"]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Heartbeat interval as a Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Optimistic update timeout as a Duration
    pub fn optimistic_timeout(&self) -> Duration {
        Duration::from_millis(self.optimistic_timeout_ms)
    }

    /// Sweep interval as a Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Validate the configuration and return an error if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let reconnect = &self.reconnect;
        if reconnect.base_delay_ms == 0 {
            return Err(ConfigValidationError::InvalidBaseDelay);
        }
        if reconnect.max_delay_ms < reconnect.base_delay_ms {
            return Err(ConfigValidationError::InvalidMaxDelay {
                base: reconnect.base_delay_ms,
                max: reconnect.max_delay_ms,
            });
        }
        if reconnect.connect_timeout_ms == 0 {
            return Err(ConfigValidationError::InvalidConnectTimeout);
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidHeartbeat);
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigValidationError::InvalidCacheCapacity);
        }
        if self.cache.default_ttl_ms == 0 {
            return Err(ConfigValidationError::InvalidTtl("default".to_string()));
        }
        if let Some((data_type, _)) = self.cache.ttl_ms.iter().find(|(_, ttl)| **ttl == 0) {
            return Err(ConfigValidationError::InvalidTtl(data_type.to_string()));
        }
        if self.optimistic_timeout_ms == 0 {
            return Err(ConfigValidationError::InvalidOptimisticTimeout);
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidSweepInterval);
        }
        if let Some(index) = self
            .refresh
            .rules
            .iter()
            .position(|rule| rule.pattern.trim().is_empty())
        {
            return Err(ConfigValidationError::EmptyRulePattern(index));
        }
        Ok(())
    }
}
