//! find(): filtered, sorted, paginated queries
//!
//! Candidate selection goes through the index subsystem when the
//! materialized indexes are fresh (no mutations since the last flush);
//! otherwise the in-memory working set is scanned. The full filter is always
//! re-applied to candidates, so inexact index results (SST shards, unsharded
//! blobs) stay correct. Time-travel queries reconstruct each candidate
//! before filtering.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use serde_json::Value;
use tracing::debug;

use parquedb_core::error::Result;
use parquedb_core::query::{compare_values, matches_filter};
use parquedb_core::types::{Entity, EntityRef};
use parquedb_index::{select_index, IndexPlan};

use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub limit: Option<usize>,
    pub offset: usize,
    pub sort: Option<SortSpec>,
    pub as_of: Option<i64>,
    pub include_deleted: bool,
    /// Resolve related entity names onto outbound link fields
    pub hydrate: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FindResult {
    pub items: Vec<Entity>,
    pub total: usize,
    pub has_more: bool,
}

impl EntityStore {
    pub async fn find(&self, ns: &str, filter: Value, opts: FindOptions) -> Result<FindResult> {
        let candidates = if let Some(as_of) = opts.as_of {
            self.candidates_as_of(ns, as_of)?
        } else {
            self.candidates_live(ns, &filter).await?
        };

        let mut matched: Vec<Entity> = candidates
            .into_iter()
            .filter(|e| opts.include_deleted || !e.is_deleted())
            .filter(|e| matches_filter(&e.to_document(), &filter))
            .collect();

        match &opts.sort {
            Some(spec) => {
                let field = spec.field.clone();
                matched.sort_by(|a, b| {
                    let doc_a = a.to_document();
                    let doc_b = b.to_document();
                    let ordering = match (doc_a.get(&field), doc_b.get(&field)) {
                        (Some(x), Some(y)) => {
                            compare_values(x, y).unwrap_or(std::cmp::Ordering::Equal)
                        }
                        (Some(_), None) => std::cmp::Ordering::Less,
                        (None, Some(_)) => std::cmp::Ordering::Greater,
                        (None, None) => std::cmp::Ordering::Equal,
                    };
                    match spec.order {
                        SortOrder::Asc => ordering,
                        SortOrder::Desc => ordering.reverse(),
                    }
                });
            }
            None => matched.sort_by_key(|e| e.id),
        }

        let total = matched.len();
        let mut items: Vec<Entity> = matched
            .into_iter()
            .skip(opts.offset)
            .take(opts.limit.unwrap_or(usize::MAX))
            .collect();
        let has_more = opts.offset + items.len() < total;

        if opts.hydrate {
            self.hydrate_names(&mut items);
        }
        Ok(FindResult {
            items,
            total,
            has_more,
        })
    }

    fn candidates_as_of(&self, ns: &str, as_of: i64) -> Result<Vec<Entity>> {
        let mut out = Vec::new();
        for path in self.time_travel.entity_paths(ns) {
            if let Some(entity) = self.time_travel.get(ns, &path, as_of)? {
                out.push(entity);
            }
        }
        Ok(out)
    }

    async fn candidates_live(&self, ns: &str, filter: &Value) -> Result<Vec<Entity>> {
        // indexes lag the working set until the next flush
        if self.dirty.load(Ordering::Relaxed) == 0 {
            let catalog = self.index_reader.catalog().await?;
            let plan = select_index(&catalog, filter);
            match plan {
                IndexPlan::FullText { entry, query } => {
                    let hits = self.index_reader.fts_search(entry, &query).await?;
                    let ids: Vec<String> = hits.into_iter().map(|(id, _)| id).collect();
                    debug!(ns, hits = ids.len(), "find served by fts index");
                    return Ok(self.entities_by_paths(ns, &ids));
                }
                IndexPlan::HashLookup { entry, values } => {
                    let lookup = self.index_reader.hash_lookup(entry, &values).await?;
                    debug!(ns, hits = lookup.doc_ids.len(), "find served by hash index");
                    return Ok(self.entities_by_paths(ns, &lookup.doc_ids));
                }
                IndexPlan::SstRange { entry, lower, upper } => {
                    let lookup = self
                        .index_reader
                        .sst_range(entry, lower.as_ref(), upper.as_ref())
                        .await?;
                    debug!(ns, candidates = lookup.doc_ids.len(), "find served by sst index");
                    return Ok(self.entities_by_paths(ns, &lookup.doc_ids));
                }
                // equality rides the scan with page statistics; nothing extra
                IndexPlan::Pushdown { .. } | IndexPlan::FullScan => {}
            }
        }

        let state = self.state.read();
        Ok(state
            .namespace(ns)
            .map(|n| n.entities.values().cloned().collect())
            .unwrap_or_default())
    }

    fn entities_by_paths(&self, ns: &str, doc_ids: &[String]) -> Vec<Entity> {
        let state = self.state.read();
        doc_ids
            .iter()
            .filter_map(|path| path.parse::<EntityRef>().ok())
            .filter(|entity_ref| entity_ref.ns == ns)
            .filter_map(|entity_ref| state.entity(&entity_ref.ns, entity_ref.id).cloned())
            .collect()
    }

    /// Replace outbound link fields with `{display, name}` objects, resolving
    /// names with one batched pass per target namespace.
    fn hydrate_names(&self, entities: &mut [Entity]) {
        let state = self.state.read();

        // collect (entity index, predicate, target) for every outbound edge
        let mut wanted: Vec<(usize, String, EntityRef)> = Vec::new();
        for (position, entity) in entities.iter().enumerate() {
            let entity_ref = entity.entity_ref();
            if let Some(namespace) = state.namespace(&entity.ns) {
                for edge in namespace.edges.iter().filter(|e| !e.is_deleted()) {
                    if edge.from == entity_ref {
                        wanted.push((position, edge.predicate.clone(), edge.to.clone()));
                    }
                }
            }
        }

        // one name-resolution pass per target namespace
        let mut names: HashMap<String, String> = HashMap::new();
        let mut by_ns: HashMap<&str, Vec<&EntityRef>> = HashMap::new();
        for (_, _, target) in &wanted {
            by_ns.entry(target.ns.as_str()).or_default().push(target);
        }
        for (ns, targets) in by_ns {
            if let Some(namespace) = state.namespace(ns) {
                for target in targets {
                    if let Some(entity) = namespace.entities.get(&target.id) {
                        names.insert(target.to_string(), entity.name.clone());
                    }
                }
            }
        }
        drop(state);

        for (position, predicate, target) in wanted {
            let path = target.to_string();
            let mut link = serde_json::Map::new();
            link.insert("display".into(), Value::String(path.clone()));
            if let Some(name) = names.get(&path) {
                link.insert("name".into(), Value::String(name.clone()));
            }
            entities[position]
                .data
                .insert(predicate, Value::Object(link));
        }
    }
}
