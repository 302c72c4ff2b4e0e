//! TTL-aware store of the last-known value per data type

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;

use super::entry::CacheEntry;
use super::metrics::{CacheMetrics, CacheStats};
use crate::config::DEFAULT_MAX_ENTRIES;
use crate::event::DataType;

/// Thread-safe LRU store with per-entry TTL.
///
/// Stale entries are evicted lazily on read, and every `put` sweeps the
/// remaining stale entries so the store never grows with dead values.
pub struct CacheStore {
    entries: Mutex<LruCache<DataType, CacheEntry>>,
    metrics: CacheMetrics,
    max_entries: usize,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("len", &self.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl CacheStore {
    /// Create a store holding at most `max_entries` values
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            metrics: CacheMetrics::new(),
            max_entries: capacity.get(),
        }
    }

    /// Store `value` for `key`, fresh for `ttl` from now.
    ///
    /// Expired entries are swept afterwards.
    #[tracing::instrument(skip(self, value), fields(ttl_ms = ttl.as_millis() as u64))]
    pub fn put(&self, key: DataType, value: serde_json::Value, ttl: Duration) {
        let now = Instant::now();
        let entry = CacheEntry::recorded_at(value, ttl, now);

        let mut entries = self.entries.lock();
        let will_evict = entries.len() >= entries.cap().get() && !entries.contains(&key);
        entries.put(key, entry);
        if will_evict {
            tracing::debug!("LRU eviction occurred");
            self.metrics.record_eviction();
        }
        let swept = Self::sweep(&mut entries, now);
        drop(entries);

        if swept > 0 {
            self.metrics.record_expirations(swept as u64);
            tracing::trace!(swept, "expired entries swept on put");
        }
        tracing::trace!("cache entry stored");
    }

    /// Read the value for `key` if it is still fresh.
    ///
    /// A stale entry is evicted and reported as a miss.
    #[tracing::instrument(skip(self))]
    pub fn get(&self, key: DataType) -> Option<serde_json::Value> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let lookup = entries
            .get(&key)
            .map(|entry| (!entry.is_expired_at(now)).then(|| entry.value.clone()));

        let expired = match lookup {
            Some(Some(value)) => {
                drop(entries);
                self.metrics.record_hit();
                tracing::trace!("cache hit");
                return Some(value);
            }
            Some(None) => true,
            None => false,
        };

        if expired {
            entries.pop(&key);
            self.metrics.record_expirations(1);
            tracing::debug!("cache entry expired");
        } else {
            tracing::trace!("cache miss");
        }
        self.metrics.record_miss();
        None
    }

    /// The entry for `key`, fresh or stale, without touching recency or
    /// counters
    pub fn peek_entry(&self, key: DataType) -> Option<CacheEntry> {
        self.entries.lock().peek(&key).cloned()
    }

    /// Put back a previously captured entry verbatim, or remove the key when
    /// there was none
    #[tracing::instrument(skip(self, entry), fields(present = entry.is_some()))]
    pub fn restore(&self, key: DataType, entry: Option<CacheEntry>) {
        let mut entries = self.entries.lock();
        match entry {
            Some(entry) => {
                entries.put(key, entry);
            }
            None => {
                entries.pop(&key);
            }
        }
    }

    /// Remove the entry for `key`
    #[tracing::instrument(skip(self))]
    pub fn remove(&self, key: DataType) -> bool {
        let removed = self.entries.lock().pop(&key).is_some();
        if removed {
            self.metrics.record_invalidations(1);
        }
        removed
    }

    /// Drop every entry
    #[tracing::instrument(skip(self))]
    pub fn invalidate_all(&self) {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        drop(entries);

        self.metrics.record_invalidations(count as u64);
        tracing::debug!(count, "cache cleared");
    }

    /// Remove expired entries and return how many were removed
    #[tracing::instrument(skip(self))]
    pub fn cleanup_expired(&self) -> usize {
        let swept = Self::sweep(&mut self.entries.lock(), Instant::now());
        if swept > 0 {
            self.metrics.record_expirations(swept as u64);
            tracing::debug!(swept, "expired entries removed");
        }
        swept
    }

    /// Number of entries held, including stale ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when the store holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Data types with an entry, fresh or stale
    pub fn keys(&self) -> Vec<DataType> {
        let mut keys: Vec<DataType> = self.entries.lock().iter().map(|(k, _)| *k).collect();
        keys.sort();
        keys
    }

    /// Snapshot of counters and size
    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot(self.len(), self.max_entries)
    }

    fn sweep(entries: &mut LruCache<DataType, CacheEntry>, now: Instant) -> usize {
        let expired: Vec<DataType> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::advance;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn test_get_within_ttl_is_hit() {
        let store = CacheStore::default();
        store.put(DataType::ActiveTimers, json!({"running": 2}), TTL);

        advance(TTL).await;
        assert_eq!(store.get(DataType::ActiveTimers), Some(json!({"running": 2})));

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_past_ttl_is_miss_and_evicts() {
        let store = CacheStore::default();
        store.put(DataType::ActiveTimers, json!(1), TTL);

        advance(TTL + Duration::from_millis(1)).await;
        assert_eq!(store.get(DataType::ActiveTimers), None);
        assert!(store.is_empty());

        let stats = store.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_sweeps_expired_entries() {
        let store = CacheStore::default();
        store.put(DataType::ActiveTimers, json!(1), Duration::from_secs(1));
        store.put(DataType::Metrics, json!(2), Duration::from_secs(300));

        advance(Duration::from_secs(2)).await;
        store.put(DataType::TeamData, json!(3), Duration::from_secs(180));

        assert_eq!(store.keys(), vec![DataType::Metrics, DataType::TeamData]);
        assert_eq!(store.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_overwrites_and_resets_age() {
        let store = CacheStore::default();
        store.put(DataType::Metrics, json!("old"), TTL);
        advance(Duration::from_secs(20)).await;
        store.put(DataType::Metrics, json!("new"), TTL);
        advance(Duration::from_secs(20)).await;

        assert_eq!(store.get(DataType::Metrics), Some(json!("new")));
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let store = CacheStore::new(2);
        store.put(DataType::Metrics, json!(1), TTL);
        store.put(DataType::TeamData, json!(2), TTL);
        store.get(DataType::Metrics);
        store.put(DataType::ClientData, json!(3), TTL);

        assert_eq!(store.keys(), vec![DataType::Metrics, DataType::ClientData]);
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_restore_puts_back_captured_entry() {
        let store = CacheStore::default();
        store.put(DataType::Metrics, json!("committed"), TTL);
        let captured = store.peek_entry(DataType::Metrics);

        store.put(DataType::Metrics, json!("speculative"), TTL);
        store.restore(DataType::Metrics, captured.clone());

        assert_eq!(store.peek_entry(DataType::Metrics), captured);
    }

    #[test]
    fn test_restore_none_removes_key() {
        let store = CacheStore::default();
        store.put(DataType::Metrics, json!("speculative"), TTL);
        store.restore(DataType::Metrics, None);
        assert!(store.peek_entry(DataType::Metrics).is_none());
    }

    #[test]
    fn test_peek_does_not_count() {
        let store = CacheStore::default();
        store.put(DataType::Metrics, json!(1), TTL);
        store.peek_entry(DataType::Metrics);
        store.peek_entry(DataType::TeamData);

        let stats = store.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_invalidate_all_and_remove() {
        let store = CacheStore::default();
        store.put(DataType::Metrics, json!(1), TTL);
        store.put(DataType::TeamData, json!(2), TTL);

        assert!(store.remove(DataType::Metrics));
        assert!(!store.remove(DataType::Metrics));
        store.invalidate_all();

        assert!(store.is_empty());
        assert_eq!(store.stats().invalidations, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired() {
        let store = CacheStore::default();
        store.put(DataType::ActiveTimers, json!(1), Duration::from_secs(1));
        store.put(DataType::Metrics, json!(2), Duration::from_secs(1));
        store.put(DataType::ClientData, json!(3), Duration::from_secs(600));

        advance(Duration::from_secs(5)).await;
        assert_eq!(store.cleanup_expired(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.cleanup_expired(), 0);
    }
}
