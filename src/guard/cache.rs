//! Fixed-capacity LRU cache with per-entry TTL.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};

struct Entry<V> {
    value: V,
    created_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// Hit/miss counters for a cache.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Concurrency-safe LRU cache with TTL expiry.
///
/// `get` on an expired entry behaves as a miss and drops the entry; eviction
/// beyond capacity is strictly least-recently-used.
pub struct TtlCache<V: Clone> {
    inner: Mutex<LruCache<String, Entry<V>>>,
    stats: Mutex<CacheStats>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(CacheStats::default()),
            ttl,
        }
    }

    /// Fetch a value, refreshing its recency. Expired entries are removed.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut cache = self.inner.lock().expect("cache lock poisoned");
        let expired = cache.get(key).map(|e| e.is_expired(self.ttl));
        let result = match expired {
            Some(false) => cache.get(key).map(|e| e.value.clone()),
            Some(true) => {
                cache.pop(key);
                None
            }
            None => None,
        };
        drop(cache);

        let mut stats = self.stats.lock().expect("cache stats lock poisoned");
        if result.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        result
    }

    /// Insert a value, evicting the least-recently-used entry at capacity.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let mut cache = self.inner.lock().expect("cache lock poisoned");
        cache.put(
            key.into(),
            Entry {
                value,
                created_at: Instant::now(),
            },
        );
    }

    /// Whether a live (non-expired) entry exists, without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        let cache = self.inner.lock().expect("cache lock poisoned");
        cache
            .peek(key)
            .map(|e| !e.is_expired(self.ttl))
            .unwrap_or(false)
    }

    /// Number of entries currently held (including not-yet-collected expired ones).
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.inner.lock().expect("cache lock poisoned").clear();
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock().expect("cache stats lock poisoned")
    }
}
