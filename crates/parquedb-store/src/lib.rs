// parquedb-store - The entity/relationship store
//
// CRUD with optimistic versioning over an in-memory working set, event
// sourcing through the WAL, materialization into the canonical Parquet
// artifacts, and per-entity time travel.
//
// The working set is hydrated at open() from data.parquet/rels.parquet plus
// a replay of unflushed WAL batches, so a reopened dataset continues exactly
// where the last writer stopped.

pub mod find;
pub mod links;
pub mod materialize;
pub mod state;
pub mod store;
pub mod time_travel;
pub mod update;

pub use find::{FindOptions, FindResult, SortOrder, SortSpec};
pub use materialize::MaterializeOutcome;
pub use store::{
    CreateOptions, DeleteOptions, EntityStore, GetOptions, IndexSpec, LinkOptions, StoreOptions,
    UpdateOptions,
};
