//! Bounded LRU cache for computed content.
//!
//! Used by the differ for diff results and available to loaders for large
//! content. Entries are evicted least-recently-used-first once either the
//! entry count or the aggregate byte budget is exceeded. All access goes
//! through a mutex: background workers may sweep the cache while the
//! review loop reads it, so the interface never assumes exclusivity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Counters describing cache behavior since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Slot<V> {
    value: Arc<V>,
    bytes: usize,
    last_used: u64,
}

struct Inner<V> {
    map: HashMap<String, Slot<V>>,
    total_bytes: usize,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Key→value store bounded by entry count and aggregate bytes.
pub struct ContentCache<V> {
    max_entries: usize,
    max_bytes: usize,
    inner: Mutex<Inner<V>>,
}

impl<V> ContentCache<V> {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            max_bytes,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                total_bytes: 0,
                tick: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// Returns the cached value and marks it most-recently-used.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let inner = &mut *guard;
        inner.tick += 1;
        let tick = inner.tick;
        match inner.map.get_mut(key) {
            Some(slot) => {
                slot.last_used = tick;
                inner.hits += 1;
                Some(Arc::clone(&slot.value))
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Inserts `value` under `key`, evicting least-recently-used entries
    /// until both budgets hold again. `approx_bytes` is the caller's size
    /// estimate; the cache does not inspect values. An entry larger than
    /// the whole byte budget is still stored (alone) so oversized items
    /// remain cacheable for repeated access.
    pub fn put(&self, key: String, value: V, approx_bytes: usize) -> Arc<V> {
        let value = Arc::new(value);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tick += 1;
        let tick = inner.tick;

        if let Some(old) = inner.map.remove(&key) {
            inner.total_bytes -= old.bytes;
        }
        while !inner.map.is_empty()
            && (inner.map.len() >= self.max_entries
                || inner.total_bytes + approx_bytes > self.max_bytes)
        {
            Self::evict_lru(&mut inner);
        }
        inner.total_bytes += approx_bytes;
        inner.map.insert(
            key,
            Slot { value: Arc::clone(&value), bytes: approx_bytes, last_used: tick },
        );
        value
    }

    /// Evicts until both budgets hold. Normally a no-op: `put` maintains
    /// the budgets inline; the background sweeper calls this as a backstop.
    pub fn trim_to_budget(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        while inner.map.len() > self.max_entries
            || (inner.total_bytes > self.max_bytes && !inner.map.is_empty())
        {
            Self::evict_lru(&mut inner);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.map.clear();
        inner.total_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            entries: inner.map.len(),
            bytes: inner.total_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    fn evict_lru(inner: &mut Inner<V>) {
        let lru_key = inner
            .map
            .iter()
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = lru_key {
            if let Some(slot) = inner.map.remove(&key) {
                inner.total_bytes -= slot.bytes;
                inner.evictions += 1;
            }
        }
    }
}
