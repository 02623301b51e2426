//! Materialization
//!
//! flush() turns buffered/WAL state into the canonical artifacts:
//! data.parquet (entity snapshot), rels.parquet (live edges, absent when
//! there are none) and events.parquet (the full log, ts-ascending). A
//! checkpoint records the absorbed event range; covered WAL rows and staged
//! bulk artifacts are deleted afterwards. Secondary indexes rebuild from the
//! fresh snapshot. The same input range always produces the same artifact
//! bytes, so re-running a failed flush is safe.

use std::sync::atomic::Ordering;

use bytes::Bytes;
use tracing::{debug, info};

use parquedb_core::error::{Error, Result};
use parquedb_core::event::Event;
use parquedb_core::parquet as pq;
use parquedb_core::types::Entity;
use parquedb_core::ulid::Ulid;
use parquedb_index::{DocLocation, IndexBuilder, IndexEntry, IndexKind};
use parquedb_storage::WriteOptions;
use parquedb_wal::Checkpoint;

use crate::store::EntityStore;

#[derive(Debug, Clone, Default)]
pub struct MaterializeOutcome {
    pub events_written: usize,
    pub entities: usize,
    pub edges: usize,
    pub checkpoint: Option<Checkpoint>,
    pub wal_rows_deleted: usize,
    pub indexes_rebuilt: usize,
}

impl EntityStore {
    /// Flush buffers, materialize artifacts, advance the checkpoint and
    /// rebuild indexes.
    pub async fn flush(&self) -> Result<MaterializeOutcome> {
        let mut outcome = MaterializeOutcome::default();

        // 1. in-memory buffers become WAL rows
        self.wal().flush_all().await?;
        let unflushed = self.wal().wal().list_unflushed().await?;
        let pending = self.wal().pending().list().await?;

        let absorbed: Vec<&Event> = unflushed.iter().flat_map(|b| b.events.iter()).collect();
        outcome.events_written = absorbed.len();

        // 2. canonical artifacts from the working set
        let properties = || {
            pq::parse_compression(&self.options().compression)
                .map(pq::writer_properties_with)
                .map_err(|e| Error::InvalidInput(e.to_string()))
        };

        let (entities, live_edges) = {
            let state = self.state.read();
            let entities: Vec<Entity> = state.all_entities().into_iter().cloned().collect();
            let edges: Vec<_> = state.live_edges().into_iter().cloned().collect();
            (entities, edges)
        };
        outcome.entities = entities.len();
        outcome.edges = live_edges.len();

        let entity_batch = pq::entities_to_batch(&entities)?;
        let entity_bytes = pq::write_parquet_with(&[entity_batch], properties()?)
            .map_err(|e| Error::Codec(format!("data.parquet: {e}")))?;
        self.storage()
            .write_atomic("data.parquet", Bytes::from(entity_bytes), WriteOptions::default())
            .await?;

        if live_edges.is_empty() {
            // rels.parquet is absent when no edges exist
            self.storage().delete("rels.parquet").await?;
        } else {
            let rel_batch = pq::relationships_to_batch(&live_edges)?;
            let rel_bytes = pq::write_parquet_with(&[rel_batch], properties()?)
                .map_err(|e| Error::Codec(format!("rels.parquet: {e}")))?;
            self.storage()
                .write_atomic("rels.parquet", Bytes::from(rel_bytes), WriteOptions::default())
                .await?;
        }

        let mut all_events: Vec<Event> = Vec::new();
        for ns in self.time_travel.namespaces() {
            all_events.extend(self.time_travel.events(&ns));
        }
        if !all_events.is_empty() {
            let event_batch = pq::events_to_batch(&all_events)?;
            let event_bytes = pq::write_parquet_with(&[event_batch], properties()?)
                .map_err(|e| Error::Codec(format!("events.parquet: {e}")))?;
            self.storage()
                .write_atomic("events.parquet", Bytes::from(event_bytes), WriteOptions::default())
                .await?;
        }

        // 3. checkpoint the absorbed range, then discard covered WAL rows
        if !absorbed.is_empty() {
            let first = absorbed.iter().map(|e| e.id).min().unwrap_or(Ulid::NIL);
            let last = absorbed.iter().map(|e| e.id).max().unwrap_or(Ulid::NIL);
            let checkpoint = Checkpoint {
                id: self.next_event_id(),
                created_at: self.clock().now_ns(),
                event_count: absorbed.len() as u64,
                first_event_id: first,
                last_event_id: last,
                parquet_path: "events.parquet".to_string(),
            };
            self.wal().checkpoints().insert(&checkpoint).await?;
            outcome.checkpoint = Some(checkpoint);
        }
        for batch in &unflushed {
            if self.wal().wal().delete(batch).await? {
                outcome.wal_rows_deleted += 1;
            }
        }
        for record in &pending {
            self.wal().pending().delete(record.id).await?;
            self.storage().delete(&record.path).await?;
        }

        // 4. secondary indexes rebuild from the fresh snapshot
        outcome.indexes_rebuilt = self.rebuild_indexes(&entities).await?;
        self.dirty.store(0, Ordering::Relaxed);

        info!(
            events = outcome.events_written,
            entities = outcome.entities,
            edges = outcome.edges,
            wal_rows = outcome.wal_rows_deleted,
            "materialized dataset",
        );
        Ok(outcome)
    }

    async fn rebuild_indexes(&self, entities: &[Entity]) -> Result<usize> {
        // Per-value shards stop paying off once the value space explodes
        // into thousands of tiny objects. Above this many distinct values a
        // hash index is written as the single compact blob instead, and the
        // selector serves `$in` on it through the scan path.
        const MAX_HASH_SHARDS: usize = 256;

        let specs = self.options().indexes.clone();
        if specs.is_empty() {
            return Ok(0);
        }
        let builder = IndexBuilder::new(std::sync::Arc::clone(self.storage()));
        let mut catalog_entries: Vec<IndexEntry> = Vec::with_capacity(specs.len());

        for spec in &specs {
            // row locations follow data.parquet write order
            let locate = |position: usize| {
                (
                    (position / pq::MAX_ROW_GROUP_SIZE) as u16,
                    (position % pq::MAX_ROW_GROUP_SIZE) as u64,
                )
            };
            match spec.kind {
                IndexKind::Fts => {
                    let docs: Vec<(String, String)> = entities
                        .iter()
                        .filter(|e| !e.is_deleted())
                        .filter_map(|e| {
                            let text = if spec.field == "name" {
                                Some(e.name.clone())
                            } else {
                                e.data.get(&spec.field)?.as_str().map(str::to_string)
                            };
                            text.map(|t| (e.path(), t))
                        })
                        .collect();
                    catalog_entries.push(builder.build_fts(&spec.field, &docs).await?);
                }
                IndexKind::Hash | IndexKind::Sst => {
                    let docs: Vec<DocLocation> = entities
                        .iter()
                        .enumerate()
                        .filter(|(_, e)| !e.is_deleted())
                        .filter_map(|(position, e)| {
                            let value = e.data.get(&spec.field)?.clone();
                            let (row_group, row_offset) = locate(position);
                            Some(DocLocation {
                                doc_id: e.path(),
                                row_group,
                                row_offset,
                                value,
                            })
                        })
                        .collect();
                    let name = format!("by-{}", spec.field);
                    let entry = match spec.kind {
                        IndexKind::Hash => {
                            let distinct: std::collections::BTreeSet<String> =
                                docs.iter().map(|d| d.value.to_string()).collect();
                            if distinct.len() > MAX_HASH_SHARDS {
                                builder.build_hash_unsharded(&name, &spec.field, &docs).await?
                            } else {
                                builder.build_hash(&name, &spec.field, &docs).await?
                            }
                        }
                        IndexKind::Sst => builder.build_sst(&name, &spec.field, &docs, 1024).await?,
                        IndexKind::Fts => unreachable!("handled above"),
                    };
                    catalog_entries.push(entry);
                }
            }
        }

        let count = catalog_entries.len();
        builder.write_catalog(catalog_entries).await?;
        self.index_reader.invalidate_catalog();
        debug!(count, "rebuilt secondary indexes");
        Ok(count)
    }
}
