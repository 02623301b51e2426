// parquedb-wal - Write-ahead log and event buffering
//
// Writes enter an in-memory buffer per namespace; on threshold (count or
// bytes) the buffered events become one WAL row on the storage plane. The
// conditional create of the row object is the atomic INSERT: a partially
// written row simply does not exist. Flush failures leave the buffer intact
// so retries are safe.
//
// Bulk creates bypass the buffer entirely: rows stream to a staging Parquet
// artifact and a single pending-row-group record keeps sequence numbers
// dense.

pub mod buffer;
pub mod checkpoint;
pub mod manager;
pub mod pending;
pub mod wal;

pub use buffer::EventBuffer;
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use manager::{WalConfig, WalManager};
pub use pending::{PendingRowGroup, PendingStore};
pub use wal::{BlobEncoding, WalBatch, WalStore};
