use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug)]
struct Inner<V> {
    entries: LruCache<String, Entry<V>>,
    hits: u64,
    misses: u64,
}

/// LRU cache with per-entry expiry and prefix invalidation.
#[derive(Debug)]
pub struct ResultCache<V> {
    inner: Mutex<Inner<V>>,
    default_ttl: Duration,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
            default_ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let state = inner
            .entries
            .get(key)
            .map(|entry| (entry.expires_at > now).then(|| entry.value.clone()));
        let fresh = match state {
            Some(Some(value)) => Some(value),
            Some(None) => {
                inner.entries.pop(key);
                None
            }
            None => None,
        };
        match fresh {
            Some(_) => inner.hits += 1,
            None => inner.misses += 1,
        }
        fresh
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.put(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drops every key starting with `prefix`; returns how many were dropped.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let doomed: Vec<String> = inner
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            inner.entries.pop(key);
        }
        doomed.len()
    }

    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let n = inner.entries.len();
        inner.entries.clear();
        n
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let total = inner.hits + inner.misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            inner.hits as f64 / total as f64
        };
        CacheStats {
            size: inner.entries.len(),
            capacity: inner.entries.cap().get(),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hits_misses_and_eviction() {
        let cache = ResultCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get("a"), Some(1));
        cache.insert("c", 3);
        assert_eq!(cache.get("b"), None, "least recently used entry is evicted");
        assert_eq!(cache.get("c"), Some(3));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.size, stats.capacity), (2, 1, 2, 2));
    }

    #[test]
    fn expired_entries_are_misses() {
        let cache = ResultCache::new(4, Duration::from_secs(60));
        cache.insert_with_ttl("k", "v", Duration::ZERO);
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn prefix_invalidation_is_scoped() {
        let cache = ResultCache::new(8, Duration::from_secs(60));
        cache.insert("search:a", 1);
        cache.insert("search:b", 2);
        cache.insert("list:all", 3);
        assert_eq!(cache.invalidate_prefix("search:"), 2);
        assert_eq!(cache.get("list:all"), Some(3));
        assert_eq!(cache.clear(), 1);
    }
}
