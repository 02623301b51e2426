// Parquet glue for the canonical ParqueDB artifacts
//
// data.parquet, rels.parquet and events.parquet share nothing with each
// other except the writer configuration, so the schemas, the row <-> batch
// conversions and the writer live side by side here.

pub mod convert;
pub mod schema;
pub mod writer;

pub use convert::{
    batch_to_entities, batch_to_events, batch_to_relationships, entities_to_batch,
    events_to_batch, relationships_to_batch,
};
pub use schema::{entity_schema, event_schema, relationship_schema};
pub use writer::{
    parse_compression, read_parquet, write_parquet, write_parquet_with, writer_properties,
    writer_properties_with, MAX_ROW_GROUP_SIZE,
};
