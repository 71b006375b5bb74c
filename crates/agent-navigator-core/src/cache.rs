//! Fixed-capacity, thread-safe LRU cache with hit/miss counters.
//!
//! Recency is tracked with a monotonically increasing tick per entry and an
//! ordered `tick → key` index, so lookups, inserts and evictions are all
//! `O(log n)`.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Snapshot of cache counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

struct Inner<K, V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &K) {
        let tick = self.next_tick();
        if let Some((_, old)) = self.entries.get_mut(key) {
            self.order.remove(old);
            *old = tick;
            self.order.insert(tick, key.clone());
        }
    }
}

pub struct LruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity: capacity.max(1),
                tick: 0,
                entries: HashMap::new(),
                order: BTreeMap::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        // Poisoning is ignored: a stale cache entry is harmless.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a clone of the cached value and marks it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let value = inner.entries.get(key).map(|(v, _)| v.clone());
        match value {
            Some(v) => {
                inner.touch(key);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(v)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts or replaces `key`, evicting the least recently used entry when full.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.lock();
        let tick = inner.next_tick();
        if let Some((_, old_tick)) = inner.entries.remove(&key) {
            inner.order.remove(&old_tick);
        } else if inner.entries.len() >= inner.capacity {
            if let Some((_, oldest)) = inner.order.pop_first() {
                inner.entries.remove(&oldest);
            }
        }
        inner.order.insert(tick, key.clone());
        inner.entries.insert(key, (value, tick));
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let (size, capacity) = {
            let inner = self.lock();
            (inner.entries.len(), inner.capacity)
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            size,
            capacity,
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_inserted() {
        let cache: LruCache<&str, u32> = LruCache::new(2);
        cache.insert("A", 1);
        cache.insert("B", 2);
        cache.insert("C", 3);

        assert_eq!(cache.get(&"A"), None);
        assert_eq!(cache.get(&"B"), Some(2));
        assert_eq!(cache.get(&"C"), Some(3));

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 2);
    }

    #[test]
    fn get_refreshes_recency() {
        let cache: LruCache<&str, u32> = LruCache::new(2);
        cache.insert("A", 1);
        cache.insert("B", 2);
        assert_eq!(cache.get(&"A"), Some(1));
        cache.insert("C", 3);

        assert_eq!(cache.get(&"B"), None);
        assert_eq!(cache.get(&"A"), Some(1));
    }

    #[test]
    fn reinsert_replaces_without_growing() {
        let cache: LruCache<&str, u32> = LruCache::new(2);
        cache.insert("A", 1);
        cache.insert("A", 10);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"A"), Some(10));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let cache: LruCache<u8, u8> = LruCache::new(0);
        cache.insert(1, 1);
        assert_eq!(cache.stats().capacity, 1);
        assert_eq!(cache.get(&1), Some(1));
    }

    #[test]
    fn hit_rate_and_clear() {
        let cache: LruCache<u8, u8> = LruCache::new(4);
        assert_eq!(cache.stats().hit_rate, 0.0);
        cache.insert(1, 1);
        cache.get(&1);
        cache.get(&2);
        assert!((cache.stats().hit_rate - 0.5).abs() < 1e-9);
        cache.clear();
        assert!(cache.is_empty());
    }
}
