//! TTL cache for provider responses.
//!
//! Every cloud round-trip is expensive, so providers memoize listing, stat
//! and read results here. Entries carry an absolute expiry; a background
//! task sweeps expired entries at the TTL interval so an idle mount does not
//! accumulate stale data forever.

// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Keyed store with per-entry expiration.
///
/// `get` never returns an entry past its expiry and never resurrects one.
/// Concurrent `set` of the same key is last-writer-wins. There is no size
/// bound and no eviction beyond expiry.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use sisu::cache::Cache;
///
/// # #[tokio::main]
/// # async fn main() {
/// let cache: Cache<String> = Cache::new(Duration::from_secs(300));
/// cache.set("readdir/logs", "listing".to_string());
/// assert_eq!(cache.get("readdir/logs").as_deref(), Some("listing"));
/// assert_eq!(cache.get("readdir/other"), None);
/// # }
/// ```
pub struct Cache<V> {
    entries: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
    ttl: Duration,
}

impl<V: Clone + Send + Sync + 'static> Cache<V> {
    /// Create a cache with the given TTL and start its sweeper task.
    ///
    /// Must be called from within a tokio runtime. The sweeper holds only a
    /// weak reference to the entry map and exits once the cache is dropped.
    pub fn new(ttl: Duration) -> Self {
        let entries = Arc::new(RwLock::new(HashMap::new()));
        let weak: Weak<RwLock<HashMap<String, CacheEntry<V>>>> = Arc::downgrade(&entries);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(ttl).await;
                let Some(entries) = weak.upgrade() else {
                    break;
                };
                let now = Instant::now();
                entries.write().unwrap().retain(|_, e| e.expires_at > now);
            }
        });
        Self { entries, ttl }
    }

    /// Look up a value. Expired entries read as absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            tracing::trace!(key, "cache miss (expired)");
            return None;
        }
        tracing::trace!(key, "cache hit");
        Some(entry.value.clone())
    }

    /// Store a value under the cache-wide TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.ttl);
    }

    /// Store a value with a custom TTL.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().unwrap().insert(key.into(), entry);
    }

    /// Drop a single entry.
    pub fn delete(&self, key: &str) {
        self.entries.write().unwrap().remove(key);
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_stored_value() {
        let cache: Cache<Vec<u8>> = Cache::new(Duration::from_secs(60));
        cache.set("stat/app/key", b"entry".to_vec());
        assert_eq!(cache.get("stat/app/key"), Some(b"entry".to_vec()));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let cache: Cache<u32> = Cache::new(Duration::from_secs(60));
        assert_eq!(cache.get("nope"), None);
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let cache: Cache<u32> = Cache::new(Duration::from_secs(60));
        cache.set_with_ttl("k", 1, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k"), None);
        // A fresh set under the same key works again.
        cache.set("k", 2);
        assert_eq!(cache.get("k"), Some(2));
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let cache: Cache<u32> = Cache::new(Duration::from_secs(60));
        cache.set("k", 1);
        cache.set("k", 2);
        assert_eq!(cache.get("k"), Some(2));
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let cache: Cache<u32> = Cache::new(Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.delete("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        cache.clear();
        assert_eq!(cache.get("b"), None);
    }

    #[tokio::test]
    async fn sweeper_removes_expired_entries() {
        let cache: Cache<u32> = Cache::new(Duration::from_millis(20));
        cache.set_with_ttl("k", 1, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.entries.read().unwrap().is_empty());
    }
}
