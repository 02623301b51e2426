//! Byte-budget LRU cache for index artifacts
//!
//! Catalogs, manifests, shards and bloom filters share one budget. Eviction
//! is least-recently-used; statistics are per kind.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Catalog,
    Manifest,
    Shard,
    Bloom,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub catalogs: usize,
    pub manifests: usize,
    pub shards: usize,
    pub blooms: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheSlot {
    kind: CacheKind,
    data: Arc<Vec<u8>>,
    last_used: u64,
}

struct CacheInner {
    slots: HashMap<String, CacheSlot>,
    total_bytes: usize,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Shared cache with a byte budget
pub struct IndexCache {
    max_bytes: usize,
    inner: Mutex<CacheInner>,
}

impl std::fmt::Debug for IndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCache")
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

impl IndexCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(CacheInner {
                slots: HashMap::new(),
                total_bytes: 0,
                tick: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        if let Some(slot) = inner.slots.get_mut(key) {
            slot.last_used = tick;
            let data = Arc::clone(&slot.data);
            inner.hits += 1;
            Some(data)
        } else {
            inner.misses += 1;
            None
        }
    }

    pub fn put(&self, key: impl Into<String>, kind: CacheKind, data: Arc<Vec<u8>>) {
        let key = key.into();
        // Values larger than the whole budget are never cached.
        if data.len() > self.max_bytes {
            return;
        }
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        if let Some(previous) = inner.slots.remove(&key) {
            inner.total_bytes -= previous.data.len();
        }
        inner.total_bytes += data.len();
        inner.slots.insert(
            key,
            CacheSlot {
                kind,
                data,
                last_used: tick,
            },
        );

        while inner.total_bytes > self.max_bytes {
            let Some(victim) = inner
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            if let Some(slot) = inner.slots.remove(&victim) {
                inner.total_bytes -= slot.data.len();
                inner.evictions += 1;
                trace!(key = %victim, "evicted index cache entry");
            }
        }
    }

    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.slots.remove(key) {
            inner.total_bytes -= slot.data.len();
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.slots.clear();
        inner.total_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let mut stats = CacheStats {
            total_bytes: inner.total_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            ..CacheStats::default()
        };
        for slot in inner.slots.values() {
            match slot.kind {
                CacheKind::Catalog => stats.catalogs += 1,
                CacheKind::Manifest => stats.manifests += 1,
                CacheKind::Shard => stats.shards += 1,
                CacheKind::Bloom => stats.blooms += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(len: usize) -> Arc<Vec<u8>> {
        Arc::new(vec![7u8; len])
    }

    #[test]
    fn hit_and_miss_accounting() {
        let cache = IndexCache::new(1024);
        assert!(cache.get("a").is_none());
        cache.put("a", CacheKind::Shard, blob(10));
        assert_eq!(cache.get("a").unwrap().len(), 10);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.shards, 1);
        assert_eq!(stats.total_bytes, 10);
    }

    #[test]
    fn lru_eviction_under_budget_pressure() {
        let cache = IndexCache::new(100);
        cache.put("a", CacheKind::Shard, blob(40));
        cache.put("b", CacheKind::Shard, blob(40));
        // touch "a" so "b" is the LRU victim
        cache.get("a");
        cache.put("c", CacheKind::Shard, blob(40));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.stats().total_bytes <= 100);
    }

    #[test]
    fn replacement_updates_bytes() {
        let cache = IndexCache::new(100);
        cache.put("a", CacheKind::Bloom, blob(30));
        cache.put("a", CacheKind::Bloom, blob(50));
        assert_eq!(cache.stats().total_bytes, 50);
        assert_eq!(cache.stats().blooms, 1);
    }

    #[test]
    fn oversized_values_bypass() {
        let cache = IndexCache::new(10);
        cache.put("huge", CacheKind::Catalog, blob(100));
        assert!(cache.get("huge").is_none());
        assert_eq!(cache.stats().total_bytes, 0);
    }

    #[test]
    fn kinds_share_one_budget() {
        let cache = IndexCache::new(100);
        cache.put("catalog", CacheKind::Catalog, blob(50));
        cache.put("manifest", CacheKind::Manifest, blob(50));
        cache.put("shard", CacheKind::Shard, blob(50));
        let stats = cache.stats();
        assert!(stats.total_bytes <= 100);
        assert_eq!(stats.catalogs + stats.manifests + stats.shards, 2);
    }
}
