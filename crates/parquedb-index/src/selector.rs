//! Index selection
//!
//! Maps a filter onto an access path by priority: `$text` goes to FTS,
//! equality rides the Parquet-native predicate (page statistics make a
//! secondary hash unnecessary), `$in` uses a sharded hash index, ranges use
//! SST shards. Logical operators are not themselves selectable; the
//! selector recurses into `$and` branches (any branch narrows the candidate
//! set) and into `$or` only when it has a single branch.

use serde_json::Value;

use crate::catalog::{IndexCatalog, IndexEntry, IndexKind};

/// How an index is partitioned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharding {
    None,
    ByValue,
    ByRange,
}

/// The chosen access path
#[derive(Debug, Clone, PartialEq)]
pub enum IndexPlan<'a> {
    /// `$text` through an FTS index
    FullText { entry: &'a IndexEntry, query: String },
    /// `$in` (or equality) through a sharded hash index
    HashLookup {
        entry: &'a IndexEntry,
        values: Vec<Value>,
    },
    /// Equality served by Parquet-native predicate pushdown
    Pushdown { field: String, values: Vec<Value> },
    /// Range over SST shards; bounds are `(value, inclusive)`
    SstRange {
        entry: &'a IndexEntry,
        lower: Option<(Value, bool)>,
        upper: Option<(Value, bool)>,
    },
    /// Nothing applicable; scan and filter
    FullScan,
}

impl IndexPlan<'_> {
    pub fn is_full_scan(&self) -> bool {
        matches!(self, IndexPlan::FullScan)
    }
}

fn range_bounds(ops: &serde_json::Map<String, Value>) -> (Option<(Value, bool)>, Option<(Value, bool)>) {
    let mut lower = None;
    let mut upper = None;
    for (op, operand) in ops {
        match op.as_str() {
            "$gt" => lower = Some((operand.clone(), false)),
            "$gte" => lower = Some((operand.clone(), true)),
            "$lt" => upper = Some((operand.clone(), false)),
            "$lte" => upper = Some((operand.clone(), true)),
            _ => {}
        }
    }
    (lower, upper)
}

fn select_field<'a>(
    catalog: &'a IndexCatalog,
    field: &str,
    condition: &Value,
) -> IndexPlan<'a> {
    match condition {
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            // $text first: highest priority, and it must never be served by
            // an equality or range structure.
            if let Some(query) = ops.get("$text").and_then(Value::as_str) {
                if let Some(entry) = catalog.find_fts(Some(field)) {
                    return IndexPlan::FullText {
                        entry,
                        query: query.to_string(),
                    };
                }
                return IndexPlan::FullScan;
            }
            if let Some(value) = ops.get("$eq") {
                return IndexPlan::Pushdown {
                    field: field.to_string(),
                    values: vec![value.clone()],
                };
            }
            if let Some(candidates) = ops.get("$in").and_then(Value::as_array) {
                if let Some(entry) = catalog.find(IndexKind::Hash, field) {
                    if entry.sharded {
                        return IndexPlan::HashLookup {
                            entry,
                            values: candidates.clone(),
                        };
                    }
                }
                return IndexPlan::Pushdown {
                    field: field.to_string(),
                    values: candidates.clone(),
                };
            }
            let (lower, upper) = range_bounds(ops);
            if lower.is_some() || upper.is_some() {
                if let Some(entry) = catalog.find(IndexKind::Sst, field) {
                    return IndexPlan::SstRange { entry, lower, upper };
                }
            }
            IndexPlan::FullScan
        }
        // bare equality
        value => IndexPlan::Pushdown {
            field: field.to_string(),
            values: vec![value.clone()],
        },
    }
}

/// Pick an access path for a filter.
pub fn select_index<'a>(catalog: &'a IndexCatalog, filter: &Value) -> IndexPlan<'a> {
    let Value::Object(clauses) = filter else {
        return IndexPlan::FullScan;
    };
    for (key, condition) in clauses {
        let plan = match key.as_str() {
            "$and" => condition
                .as_array()
                .map(|subs| {
                    subs.iter()
                        .map(|sub| select_index(catalog, sub))
                        .find(|p| !p.is_full_scan())
                        .unwrap_or(IndexPlan::FullScan)
                })
                .unwrap_or(IndexPlan::FullScan),
            "$or" => match condition.as_array() {
                // a multi-branch $or cannot be narrowed by one branch's index
                Some(subs) if subs.len() == 1 => select_index(catalog, &subs[0]),
                _ => IndexPlan::FullScan,
            },
            "$not" => IndexPlan::FullScan,
            field => select_field(catalog, field, condition),
        };
        if !plan.is_full_scan() {
            return plan;
        }
    }
    IndexPlan::FullScan
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> IndexCatalog {
        let entry = |name: &str, kind, field: &str, sharded| IndexEntry {
            name: name.into(),
            kind,
            field: field.into(),
            path: format!("indexes/secondary/{name}"),
            size_bytes: 1,
            entry_count: 1,
            sharded,
            manifest_path: sharded.then(|| format!("indexes/secondary/{name}/_manifest.json")),
        };
        IndexCatalog::new(vec![
            entry("by-status", IndexKind::Hash, "status", true),
            // high-cardinality fields get the single-blob variant
            entry("by-slug", IndexKind::Hash, "slug", false),
            entry("by-views", IndexKind::Sst, "views", true),
            entry("title-fts", IndexKind::Fts, "title", false),
        ])
    }

    #[test]
    fn text_beats_everything() {
        let catalog = catalog();
        let plan = select_index(
            &catalog,
            &json!({"status": "x", "title": {"$text": "parquet"}}),
        );
        // first non-fullscan clause wins; equality on status is already a
        // pushdown, so order matters here: text-only filter picks FTS
        let plan_text = select_index(&catalog, &json!({"title": {"$text": "parquet"}}));
        assert!(matches!(plan_text, IndexPlan::FullText { query, .. } if query == "parquet"));
        assert!(!plan.is_full_scan());
    }

    #[test]
    fn equality_uses_pushdown_not_hash() {
        let cat = catalog();
        let plan = select_index(&cat, &json!({"status": "published"}));
        assert!(
            matches!(plan, IndexPlan::Pushdown { ref field, ref values } if field == "status" && values == &vec![json!("published")])
        );
    }

    #[test]
    fn in_uses_sharded_hash() {
        let catalog = catalog();
        let plan = select_index(&catalog, &json!({"status": {"$in": ["a", "b"]}}));
        assert!(matches!(plan, IndexPlan::HashLookup { entry, .. } if entry.name == "by-status"));

        // $in on an unsharded hash entry has no per-value shards to probe
        let plan = select_index(&catalog, &json!({"slug": {"$in": ["slug-1"]}}));
        assert!(matches!(plan, IndexPlan::Pushdown { .. }));

        // $in on an unindexed field falls back to pushdown
        let plan = select_index(&catalog, &json!({"category": {"$in": ["a"]}}));
        assert!(matches!(plan, IndexPlan::Pushdown { .. }));
    }

    #[test]
    fn ranges_use_sst() {
        let catalog = catalog();
        let plan = select_index(&catalog, &json!({"views": {"$gte": 10, "$lt": 20}}));
        match plan {
            IndexPlan::SstRange { entry, lower, upper } => {
                assert_eq!(entry.name, "by-views");
                assert_eq!(lower, Some((json!(10), true)));
                assert_eq!(upper, Some((json!(20), false)));
            }
            other => panic!("expected SstRange, got {other:?}"),
        }
    }

    #[test]
    fn logical_operators() {
        let catalog = catalog();
        // $and recurses into the first indexable branch
        let plan = select_index(
            &catalog,
            &json!({"$and": [{"draft": {"$exists": true}}, {"views": {"$gt": 5}}]}),
        );
        assert!(matches!(plan, IndexPlan::SstRange { .. }));

        // multi-branch $or is never narrowed
        let plan = select_index(
            &catalog,
            &json!({"$or": [{"views": {"$gt": 5}}, {"status": "x"}]}),
        );
        assert!(plan.is_full_scan());

        // single-branch $or is
        let plan = select_index(&catalog, &json!({"$or": [{"views": {"$gt": 5}}]}));
        assert!(matches!(plan, IndexPlan::SstRange { .. }));
    }

    #[test]
    fn text_without_fts_index_scans() {
        let catalog = IndexCatalog::default();
        let plan = select_index(&catalog, &json!({"title": {"$text": "x"}}));
        assert!(plan.is_full_scan());
    }
}
