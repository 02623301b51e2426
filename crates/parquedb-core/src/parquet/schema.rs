//! Canonical Arrow schemas for the materialized artifacts
//!
//! Variant columns are plain binary; readers identify them by column name
//! (`$data`, `before`, `after`, `metadata`).

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema};
use once_cell::sync::Lazy;

/// data.parquet: exactly four columns.
pub fn entity_schema() -> Arc<Schema> {
    static SCHEMA: Lazy<Arc<Schema>> = Lazy::new(|| {
        Arc::new(Schema::new(vec![
            Field::new("$id", DataType::Utf8, false),
            Field::new("$type", DataType::Utf8, false),
            Field::new("$name", DataType::Utf8, false),
            Field::new("$data", DataType::Binary, false),
        ]))
    });
    Arc::clone(&SCHEMA)
}

/// rels.parquet: one row per live edge.
pub fn relationship_schema() -> Arc<Schema> {
    static SCHEMA: Lazy<Arc<Schema>> = Lazy::new(|| {
        Arc::new(Schema::new(vec![
            Field::new("sourceId", DataType::Utf8, false),
            Field::new("sourceField", DataType::Utf8, false),
            Field::new("targetId", DataType::Utf8, false),
            Field::new("createdAt", DataType::Int64, false),
        ]))
    });
    Arc::clone(&SCHEMA)
}

/// events.parquet: rows ordered by `ts` ascending.
pub fn event_schema() -> Arc<Schema> {
    static SCHEMA: Lazy<Arc<Schema>> = Lazy::new(|| {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("ts", DataType::Int64, false),
            Field::new("op", DataType::Utf8, false),
            Field::new("target", DataType::Utf8, false),
            Field::new("before", DataType::Binary, true),
            Field::new("after", DataType::Binary, true),
            Field::new("actor", DataType::Utf8, false),
            Field::new("metadata", DataType::Binary, true),
        ]))
    });
    Arc::clone(&SCHEMA)
}
