// parquedb-index - Secondary index subsystem
//
// A JSON catalog at indexes/_catalog.json lists the indexes of a dataset:
// sharded hash indexes (compact binary shards + optional bloom pre-filter),
// SST range shards, and full-text indexes. The selector maps a filter onto
// the cheapest applicable access path; the cache keeps hot catalog/manifest/
// shard/bloom bytes under a shared byte budget with LRU eviction.

pub mod bloom;
pub mod builder;
pub mod cache;
pub mod catalog;
pub mod fts;
pub mod manifest;
pub mod reader;
pub mod selector;
pub mod shard;

pub use bloom::BloomFilter;
pub use builder::{DocLocation, IndexBuilder};
pub use cache::{CacheKind, CacheStats, IndexCache};
pub use catalog::{IndexCatalog, IndexEntry, IndexKind, CATALOG_PATH};
pub use fts::FtsIndex;
pub use manifest::{ShardInfo, ShardManifest};
pub use reader::{IndexLookup, IndexReader};
pub use selector::{select_index, IndexPlan, Sharding};
pub use shard::ShardRecord;
