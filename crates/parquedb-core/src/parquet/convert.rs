//! Row <-> RecordBatch conversions for the canonical artifacts

use std::sync::Arc;

use arrow::array::{
    Array, BinaryArray, BinaryBuilder, Int64Array, Int64Builder, RecordBatch, StringArray,
    StringBuilder,
};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::types::{Entity, EntityRef, Relationship};
use crate::variant;

use super::schema::{entity_schema, event_schema, relationship_schema};

/// A row of rels.parquet. The snapshot keeps only the traversal columns, so
/// reading one back does not recover audit fields or edge data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipRow {
    pub source: EntityRef,
    pub source_field: String,
    pub target: EntityRef,
    pub created_at: i64,
}

impl From<&Relationship> for RelationshipRow {
    fn from(rel: &Relationship) -> Self {
        Self {
            source: rel.from.clone(),
            source_field: rel.predicate.clone(),
            target: rel.to.clone(),
            created_at: rel.created_at,
        }
    }
}

/// The `$data` document: everything except the three dedicated columns.
fn entity_data_document(entity: &Entity) -> Value {
    let mut doc = entity.to_document();
    if let Some(obj) = doc.as_object_mut() {
        obj.remove("$id");
        obj.remove("$type");
        obj.remove("name");
    }
    doc
}

/// Build a data.parquet batch: `$id, $type, $name, $data`.
pub fn entities_to_batch(entities: &[Entity]) -> Result<RecordBatch> {
    let mut ids = StringBuilder::new();
    let mut types = StringBuilder::new();
    let mut names = StringBuilder::new();
    let mut data = BinaryBuilder::new();

    for entity in entities {
        ids.append_value(entity.path());
        types.append_value(&entity.entity_type);
        names.append_value(&entity.name);
        data.append_value(variant::encode_json(&entity_data_document(entity))?);
    }

    RecordBatch::try_new(
        entity_schema(),
        vec![
            Arc::new(ids.finish()),
            Arc::new(types.finish()),
            Arc::new(names.finish()),
            Arc::new(data.finish()),
        ],
    )
    .map_err(|e| Error::Codec(format!("entity batch: {e}")))
}

/// Read entities back out of a data.parquet batch.
pub fn batch_to_entities(batch: &RecordBatch) -> Result<Vec<Entity>> {
    let ids = string_column(batch, "$id")?;
    let types = string_column(batch, "$type")?;
    let names = string_column(batch, "$name")?;
    let data = binary_column(batch, "$data")?;

    let mut entities = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut doc = variant::decode_json(data.value(row))?;
        let obj = doc
            .as_object_mut()
            .ok_or_else(|| Error::Codec("$data is not an object".into()))?;
        obj.insert("$id".into(), Value::String(ids.value(row).to_string()));
        obj.insert("$type".into(), Value::String(types.value(row).to_string()));
        obj.insert("name".into(), Value::String(names.value(row).to_string()));
        entities.push(Entity::from_document(&doc)?);
    }
    Ok(entities)
}

/// Build a rels.parquet batch from live edges.
pub fn relationships_to_batch(rels: &[Relationship]) -> Result<RecordBatch> {
    let mut sources = StringBuilder::new();
    let mut fields = StringBuilder::new();
    let mut targets = StringBuilder::new();
    let mut created = Int64Builder::new();

    for rel in rels {
        sources.append_value(rel.from.to_string());
        fields.append_value(&rel.predicate);
        targets.append_value(rel.to.to_string());
        created.append_value(rel.created_at);
    }

    RecordBatch::try_new(
        relationship_schema(),
        vec![
            Arc::new(sources.finish()),
            Arc::new(fields.finish()),
            Arc::new(targets.finish()),
            Arc::new(created.finish()),
        ],
    )
    .map_err(|e| Error::Codec(format!("relationship batch: {e}")))
}

/// Read relationship rows out of a rels.parquet batch.
pub fn batch_to_relationships(batch: &RecordBatch) -> Result<Vec<RelationshipRow>> {
    let sources = string_column(batch, "sourceId")?;
    let fields = string_column(batch, "sourceField")?;
    let targets = string_column(batch, "targetId")?;
    let created = int64_column(batch, "createdAt")?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        rows.push(RelationshipRow {
            source: sources.value(row).parse()?,
            source_field: fields.value(row).to_string(),
            target: targets.value(row).parse()?,
            created_at: created.value(row),
        });
    }
    Ok(rows)
}

/// Build an events.parquet batch. Rows are sorted by `(ts, id)` ascending
/// regardless of input order.
pub fn events_to_batch(events: &[Event]) -> Result<RecordBatch> {
    let mut ordered: Vec<&Event> = events.iter().collect();
    ordered.sort_by_key(|e| (e.ts, e.id));

    let mut ids = StringBuilder::new();
    let mut timestamps = Int64Builder::new();
    let mut ops = StringBuilder::new();
    let mut targets = StringBuilder::new();
    let mut befores = BinaryBuilder::new();
    let mut afters = BinaryBuilder::new();
    let mut actors = StringBuilder::new();
    let mut metadata = BinaryBuilder::new();

    for event in ordered {
        ids.append_value(event.id.to_string());
        timestamps.append_value(event.ts);
        ops.append_value(event.op.as_str());
        targets.append_value(event.target.to_string());
        append_optional_variant(&mut befores, event.before.as_ref())?;
        append_optional_variant(&mut afters, event.after.as_ref())?;
        actors.append_value(&event.actor);
        append_optional_variant(&mut metadata, event.metadata.as_ref())?;
    }

    RecordBatch::try_new(
        event_schema(),
        vec![
            Arc::new(ids.finish()),
            Arc::new(timestamps.finish()),
            Arc::new(ops.finish()),
            Arc::new(targets.finish()),
            Arc::new(befores.finish()),
            Arc::new(afters.finish()),
            Arc::new(actors.finish()),
            Arc::new(metadata.finish()),
        ],
    )
    .map_err(|e| Error::Codec(format!("event batch: {e}")))
}

/// Read events back out of an events.parquet batch.
pub fn batch_to_events(batch: &RecordBatch) -> Result<Vec<Event>> {
    let ids = string_column(batch, "id")?;
    let timestamps = int64_column(batch, "ts")?;
    let ops = string_column(batch, "op")?;
    let targets = string_column(batch, "target")?;
    let befores = binary_column(batch, "before")?;
    let afters = binary_column(batch, "after")?;
    let actors = string_column(batch, "actor")?;
    let metadata = binary_column(batch, "metadata")?;

    let mut events = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        events.push(Event {
            id: ids.value(row).parse()?,
            ts: timestamps.value(row),
            op: ops.value(row).parse()?,
            target: targets.value(row).parse()?,
            before: optional_variant(befores, row)?,
            after: optional_variant(afters, row)?,
            actor: actors.value(row).to_string(),
            metadata: optional_variant(metadata, row)?,
        });
    }
    Ok(events)
}

fn append_optional_variant(builder: &mut BinaryBuilder, value: Option<&Value>) -> Result<()> {
    match value {
        Some(v) => builder.append_value(variant::encode_json(v)?),
        None => builder.append_null(),
    }
    Ok(())
}

fn optional_variant(column: &BinaryArray, row: usize) -> Result<Option<Value>> {
    if column.is_null(row) {
        Ok(None)
    } else {
        variant::decode_json(column.value(row)).map(Some)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    column(batch, name)?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::Codec(format!("column {name} is not utf8")))
}

fn binary_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a BinaryArray> {
    column(batch, name)?
        .as_any()
        .downcast_ref::<BinaryArray>()
        .ok_or_else(|| Error::Codec(format!("column {name} is not binary")))
}

fn int64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    column(batch, name)?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| Error::Codec(format!("column {name} is not int64")))
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a arrow::array::ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::Codec(format!("missing column {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventOp, EventTarget};
    use crate::parquet::writer::{read_parquet, write_parquet};
    use crate::ulid::Ulid;
    use serde_json::Map;

    fn entity(n: u64) -> Entity {
        let mut data = Map::new();
        data.insert("title".into(), Value::String(format!("post {n}")));
        Entity {
            ns: "posts".into(),
            id: Ulid::from_parts(1000 + n, n as u128),
            entity_type: "Post".into(),
            name: format!("Post {n}"),
            version: 1,
            created_at: 1000 + n as i64,
            created_by: "amy".into(),
            updated_at: 1000 + n as i64,
            updated_by: "amy".into(),
            deleted_at: None,
            deleted_by: None,
            data,
        }
    }

    #[test]
    fn entities_roundtrip_through_parquet() {
        let entities: Vec<Entity> = (0..5).map(entity).collect();
        let batch = entities_to_batch(&entities).unwrap();
        assert_eq!(batch.num_columns(), 4);

        let bytes = write_parquet(&[batch]).unwrap();
        let batches = read_parquet(bytes).unwrap();
        let rebuilt: Vec<Entity> = batches
            .iter()
            .flat_map(|b| batch_to_entities(b).unwrap())
            .collect();
        assert_eq!(rebuilt, entities);
    }

    #[test]
    fn events_sorted_by_ts() {
        let make = |ts: i64, n: u128| Event {
            id: Ulid::from_parts(ts as u64, n),
            ts,
            op: EventOp::Create,
            target: EventTarget::entity("posts", Ulid::from_parts(1, n)),
            before: None,
            after: Some(serde_json::json!({"n": ts})),
            actor: "amy".into(),
            metadata: None,
        };
        let events = vec![make(30, 3), make(10, 1), make(20, 2)];
        let batch = events_to_batch(&events).unwrap();
        let decoded = batch_to_events(&batch).unwrap();
        let ts: Vec<i64> = decoded.iter().map(|e| e.ts).collect();
        assert_eq!(ts, vec![10, 20, 30]);
        assert!(decoded.iter().all(|e| e.before.is_none()));
    }

    #[test]
    fn relationship_rows_roundtrip() {
        let rel = Relationship {
            from: EntityRef::new("posts", Ulid::from_parts(1, 1)),
            predicate: "author".into(),
            reverse: "authors".into(),
            to: EntityRef::new("users", Ulid::from_parts(1, 2)),
            version: 1,
            created_at: 7,
            created_by: "amy".into(),
            updated_at: 7,
            updated_by: "amy".into(),
            deleted_at: None,
            deleted_by: None,
            data: None,
        };
        let batch = relationships_to_batch(std::slice::from_ref(&rel)).unwrap();
        let rows = batch_to_relationships(&batch).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], RelationshipRow::from(&rel));
    }
}
