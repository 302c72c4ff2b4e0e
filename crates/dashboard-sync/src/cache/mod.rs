//! Local cache of server-calculated dashboard snapshots.
//!
//! One entry per [`DataType`](crate::DataType), each with its own TTL. A
//! stale entry behaves exactly like a missing one.
//!
//! # Example
//! ```rust,ignore
//! use dashboard_sync::cache::CacheStore;
//! use std::time::Duration;
//!
//! let cache = CacheStore::new(64);
//! cache.put(DataType::Metrics, json!({"revenue": 1200}), Duration::from_secs(300));
//! assert!(cache.get(DataType::Metrics).is_some());
//! ```

mod entry;
mod metrics;
mod store;

pub use entry::CacheEntry;
pub use metrics::CacheStats;
pub use store::CacheStore;
