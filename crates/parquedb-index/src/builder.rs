//! Index construction
//!
//! Builders take `(doc id, row location, value)` tuples from the
//! materializer and write shards, manifests, bloom filters and the catalog
//! onto the storage plane under the `indexes/` layout:
//!
//! ```text
//! indexes/_catalog.json
//! indexes/fts/<field>.fts.json
//! indexes/secondary/<name>.hash.idx      non-sharded
//! indexes/secondary/<name>/_manifest.json
//! indexes/secondary/<name>/_bloom.bin
//! indexes/secondary/<name>/<shard>.bin
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use parquedb_core::error::Result;
use parquedb_core::query::compare_values;
use parquedb_storage::ObjectStore;

use crate::bloom::{murmur3_32, BloomFilter};
use crate::catalog::{IndexCatalog, IndexEntry, IndexKind, CATALOG_PATH};
use crate::fts::FtsIndex;
use crate::manifest::{ShardInfo, ShardManifest};
use crate::shard::{encode_shard, ShardRecord};

/// Where one document's indexed value lives in the Parquet artifact
#[derive(Debug, Clone, PartialEq)]
pub struct DocLocation {
    pub doc_id: String,
    pub row_group: u16,
    pub row_offset: u64,
    pub value: Value,
}

impl DocLocation {
    fn record(&self) -> ShardRecord {
        ShardRecord {
            row_group: self.row_group,
            row_offset: self.row_offset,
            doc_id: self.doc_id.clone(),
        }
    }
}

/// Canonical byte key for a value: what bloom filters and shard names hash.
pub(crate) fn value_key(value: &Value) -> String {
    value.to_string()
}

pub struct IndexBuilder {
    store: Arc<dyn ObjectStore>,
}

impl IndexBuilder {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Sharded hash index: one shard per distinct value plus a bloom filter
    /// over the value set.
    pub async fn build_hash(&self, name: &str, field: &str, docs: &[DocLocation]) -> Result<IndexEntry> {
        let root = format!("indexes/secondary/{name}");

        let mut groups: BTreeMap<String, (Value, Vec<ShardRecord>)> = BTreeMap::new();
        for doc in docs {
            groups
                .entry(value_key(&doc.value))
                .or_insert_with(|| (doc.value.clone(), Vec::new()))
                .1
                .push(doc.record());
        }

        let max_row_group = docs.iter().map(|d| d.row_group).max().unwrap_or(0);
        let mut bloom = BloomFilter::with_capacity(groups.len().max(1), max_row_group + 1);
        let mut shards = Vec::with_capacity(groups.len());
        let mut total_bytes = 0u64;

        let mut used_names = std::collections::BTreeSet::new();
        for (key, (value, records)) in &groups {
            bloom.insert(key.as_bytes());
            let mut shard_name = format!("{:08x}", murmur3_32(key.as_bytes(), 0));
            // distinct values may collide on the 32-bit name hash
            let mut bump = 0u32;
            while !used_names.insert(shard_name.clone()) {
                bump += 1;
                shard_name = format!("{:08x}-{bump}", murmur3_32(key.as_bytes(), 0));
            }
            let path = format!("{root}/{shard_name}.bin");
            let bytes = encode_shard(records)?;
            total_bytes += bytes.len() as u64;
            self.store
                .write(&path, Bytes::from(bytes), Default::default())
                .await?;
            shards.push(ShardInfo {
                name: shard_name,
                path,
                value: Some(value.clone()),
                min_value: None,
                max_value: None,
                entry_count: records.len() as u64,
            });
        }

        let bloom_path = format!("{root}/_bloom.bin");
        let bloom_bytes = bloom.to_bytes();
        total_bytes += bloom_bytes.len() as u64;
        self.store
            .write(&bloom_path, Bytes::from(bloom_bytes), Default::default())
            .await?;

        let manifest = ShardManifest {
            index: name.to_string(),
            field: field.to_string(),
            shards,
            bloom_path: Some(bloom_path),
        };
        let manifest_path = format!("{root}/_manifest.json");
        self.store
            .write(&manifest_path, Bytes::from(manifest.to_bytes()?), Default::default())
            .await?;

        debug!(index = name, field, values = groups.len(), "built sharded hash index");
        Ok(IndexEntry {
            name: name.to_string(),
            kind: IndexKind::Hash,
            field: field.to_string(),
            path: root,
            size_bytes: total_bytes,
            entry_count: docs.len() as u64,
            sharded: true,
            manifest_path: Some(manifest_path),
        })
    }

    /// Non-sharded hash index: one compact blob holding every posting. The
    /// materializer picks this over [`IndexBuilder::build_hash`] when the
    /// field's distinct-value count exceeds its shard cap; `$in` queries on
    /// such an entry go through the scan path, since the blob carries no
    /// per-value discrimination.
    pub async fn build_hash_unsharded(
        &self,
        name: &str,
        field: &str,
        docs: &[DocLocation],
    ) -> Result<IndexEntry> {
        let records: Vec<ShardRecord> = docs.iter().map(DocLocation::record).collect();
        let bytes = encode_shard(&records)?;
        let path = format!("indexes/secondary/{name}.hash.idx");
        let size_bytes = bytes.len() as u64;
        self.store
            .write(&path, Bytes::from(bytes), Default::default())
            .await?;
        Ok(IndexEntry {
            name: name.to_string(),
            kind: IndexKind::Hash,
            field: field.to_string(),
            path,
            size_bytes,
            entry_count: docs.len() as u64,
            sharded: false,
            manifest_path: None,
        })
    }

    /// SST index: value-sorted shards of bounded size carrying min/max.
    pub async fn build_sst(
        &self,
        name: &str,
        field: &str,
        docs: &[DocLocation],
        shard_size: usize,
    ) -> Result<IndexEntry> {
        let root = format!("indexes/secondary/{name}");
        let shard_size = shard_size.max(1);

        let mut ordered: Vec<&DocLocation> = docs.iter().collect();
        ordered.sort_by(|a, b| {
            compare_values(&a.value, &b.value)
                .unwrap_or_else(|| value_key(&a.value).cmp(&value_key(&b.value)))
        });

        let mut shards = Vec::new();
        let mut total_bytes = 0u64;
        for (n, chunk) in ordered.chunks(shard_size).enumerate() {
            let records: Vec<ShardRecord> = chunk.iter().map(|d| d.record()).collect();
            let bytes = encode_shard(&records)?;
            total_bytes += bytes.len() as u64;
            let shard_name = format!("sst-{n:05}");
            let path = format!("{root}/{shard_name}.bin");
            self.store
                .write(&path, Bytes::from(bytes), Default::default())
                .await?;
            shards.push(ShardInfo {
                name: shard_name,
                path,
                value: None,
                min_value: Some(chunk.first().expect("non-empty chunk").value.clone()),
                max_value: Some(chunk.last().expect("non-empty chunk").value.clone()),
                entry_count: records.len() as u64,
            });
        }

        let manifest = ShardManifest {
            index: name.to_string(),
            field: field.to_string(),
            shards,
            bloom_path: None,
        };
        let manifest_path = format!("{root}/_manifest.json");
        self.store
            .write(&manifest_path, Bytes::from(manifest.to_bytes()?), Default::default())
            .await?;

        Ok(IndexEntry {
            name: name.to_string(),
            kind: IndexKind::Sst,
            field: field.to_string(),
            path: root,
            size_bytes: total_bytes,
            entry_count: docs.len() as u64,
            sharded: true,
            manifest_path: Some(manifest_path),
        })
    }

    /// Full-text index over `(doc_id, text)` pairs.
    pub async fn build_fts(&self, field: &str, docs: &[(String, String)]) -> Result<IndexEntry> {
        let index = FtsIndex::build(field, docs);
        let bytes = index.to_bytes()?;
        let path = format!("indexes/fts/{field}.fts.json");
        let size_bytes = bytes.len() as u64;
        self.store
            .write(&path, Bytes::from(bytes), Default::default())
            .await?;
        Ok(IndexEntry {
            name: format!("{field}-fts"),
            kind: IndexKind::Fts,
            field: field.to_string(),
            path,
            size_bytes,
            entry_count: docs.len() as u64,
            sharded: false,
            manifest_path: None,
        })
    }

    /// Replace the catalog.
    pub async fn write_catalog(&self, entries: Vec<IndexEntry>) -> Result<IndexCatalog> {
        let catalog = IndexCatalog::new(entries);
        self.store
            .write(CATALOG_PATH, Bytes::from(catalog.to_bytes()?), Default::default())
            .await?;
        Ok(catalog)
    }

    /// Drop every index artifact of a dataset.
    pub async fn clear(&self) -> Result<u64> {
        self.store.delete_prefix("indexes/").await
    }
}

impl std::fmt::Debug for IndexBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBuilder").finish_non_exhaustive()
    }
}
