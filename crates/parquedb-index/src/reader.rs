//! Index lookups
//!
//! The reader resolves a selector plan against the on-storage artifacts:
//! bloom probe, shard load, manifest range pruning, FTS search. Every byte
//! read lands in the shared cache.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use parquedb_core::error::{Error, Result};
use parquedb_storage::ObjectStore;

use crate::bloom::BloomFilter;
use crate::builder::value_key;
use crate::cache::{CacheKind, IndexCache};
use crate::catalog::{IndexCatalog, IndexEntry};
use crate::fts::FtsIndex;
use crate::manifest::ShardManifest;
use crate::shard::{decode_shard, ShardRecord};

/// Result of an index lookup
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexLookup {
    pub doc_ids: Vec<String>,
    pub row_groups: Vec<u16>,
    /// Whether the doc ids are exactly the matching set (hash lookups) or a
    /// candidate superset needing a residual filter (SST, unsharded).
    pub exact: bool,
}

impl IndexLookup {
    fn from_records(records: Vec<ShardRecord>, exact: bool) -> Self {
        let mut doc_ids = Vec::with_capacity(records.len());
        let mut row_groups = BTreeSet::new();
        let mut seen = BTreeSet::new();
        for record in records {
            row_groups.insert(record.row_group);
            if seen.insert(record.doc_id.clone()) {
                doc_ids.push(record.doc_id);
            }
        }
        Self {
            doc_ids,
            row_groups: row_groups.into_iter().collect(),
            exact,
        }
    }
}

pub struct IndexReader {
    store: Arc<dyn ObjectStore>,
    cache: Arc<IndexCache>,
}

impl std::fmt::Debug for IndexReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexReader").finish_non_exhaustive()
    }
}

impl IndexReader {
    pub fn new(store: Arc<dyn ObjectStore>, cache: Arc<IndexCache>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &Arc<IndexCache> {
        &self.cache
    }

    async fn cached_read(&self, path: &str, kind: CacheKind) -> Result<Arc<Vec<u8>>> {
        if let Some(bytes) = self.cache.get(path) {
            return Ok(bytes);
        }
        let bytes = Arc::new(self.store.read(path).await?.to_vec());
        self.cache.put(path, kind, Arc::clone(&bytes));
        Ok(bytes)
    }

    /// Load the catalog through the cache. A missing catalog is empty.
    pub async fn catalog(&self) -> Result<IndexCatalog> {
        use crate::catalog::CATALOG_PATH;
        match self.cached_read(CATALOG_PATH, CacheKind::Catalog).await {
            Ok(bytes) => Ok(IndexCatalog::from_bytes(&bytes)),
            Err(Error::NotFound(_)) => Ok(IndexCatalog::default()),
            Err(e) => Err(e),
        }
    }

    /// Drop cached catalog bytes after a rebuild.
    pub fn invalidate_catalog(&self) {
        self.cache.invalidate(crate::catalog::CATALOG_PATH);
    }

    async fn manifest(&self, entry: &IndexEntry) -> Result<ShardManifest> {
        let path = entry
            .manifest_path
            .clone()
            .unwrap_or_else(|| format!("{}/_manifest.json", entry.path));
        let bytes = self.cached_read(&path, CacheKind::Manifest).await?;
        ShardManifest::from_bytes(&bytes)
    }

    async fn bloom(&self, path: &str) -> Result<BloomFilter> {
        let bytes = self.cached_read(path, CacheKind::Bloom).await?;
        BloomFilter::from_bytes(&bytes)
    }

    async fn shard(&self, path: &str) -> Result<Vec<ShardRecord>> {
        let bytes = self.cached_read(path, CacheKind::Shard).await?;
        decode_shard(&bytes)
    }

    /// Hash lookup for one or more values (`$in` unions the shards). Only
    /// sharded entries can be probed by value; the selector routes `$in` on
    /// an unsharded blob to the scan path instead of here.
    pub async fn hash_lookup(&self, entry: &IndexEntry, values: &[Value]) -> Result<IndexLookup> {
        if !entry.sharded {
            return Err(Error::InvalidInput(format!(
                "hash index {} is not sharded; lookup requires per-value shards",
                entry.name
            )));
        }

        let manifest = self.manifest(entry).await?;
        let bloom = match &manifest.bloom_path {
            Some(path) => Some(self.bloom(path).await?),
            None => None,
        };

        let mut records = Vec::new();
        for value in values {
            let key = value_key(value);
            if let Some(bloom) = &bloom {
                if !bloom.contains(key.as_bytes()) {
                    debug!(index = %entry.name, %key, "bloom negative, skipping shard");
                    continue;
                }
            }
            if let Some(shard) = manifest.shard_for_value(value) {
                records.extend(self.shard(&shard.path).await?);
            }
        }
        Ok(IndexLookup::from_records(records, true))
    }

    /// Range scan over SST shards: only shards whose `[min, max]` overlaps
    /// the bounds are read. Bounds are `(value, inclusive)`.
    pub async fn sst_range(
        &self,
        entry: &IndexEntry,
        lower: Option<&(Value, bool)>,
        upper: Option<&(Value, bool)>,
    ) -> Result<IndexLookup> {
        let manifest = self.manifest(entry).await?;
        let mut records = Vec::new();
        for shard in &manifest.shards {
            if shard.overlaps_range(lower, upper) {
                records.extend(self.shard(&shard.path).await?);
            }
        }
        // shard granularity makes this a candidate set, not an exact match
        Ok(IndexLookup::from_records(records, false))
    }

    /// Full-text search returning `(doc_id, score)` best-first.
    pub async fn fts_search(&self, entry: &IndexEntry, query: &str) -> Result<Vec<(String, f64)>> {
        let bytes = self.cached_read(&entry.path, CacheKind::Shard).await?;
        let index = FtsIndex::from_bytes(&bytes)?;
        Ok(index.search(query))
    }
}
