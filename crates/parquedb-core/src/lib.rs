// parquedb-core - Platform-agnostic core logic
//
// This crate contains the PURE data model for ParqueDB. No I/O, no async,
// no runtime dependencies:
// - Entity / relationship / event types and their invariants
// - ULID identifiers (lexicographic order aligns with creation time)
// - The variant codec (self-describing binary values with key dictionaries)
// - Arrow/Parquet glue for the canonical data/rels/events artifacts
//
// Everything that touches storage, buffering or scheduling lives in the
// sibling crates (parquedb-storage, parquedb-wal, parquedb-store).

pub mod clock;
pub mod error;
pub mod event;
pub mod parquet;
pub mod query;
pub mod types;
pub mod ulid;
pub mod variant;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use event::{Event, EventOp, EventTarget};
pub use types::{Entity, EntityRef, Relationship};
pub use ulid::{Ulid, UlidGenerator};
pub use variant::Variant;
