// parquedb-storage - I/O and persistence layer
//
// This crate handles the storage concerns of ParqueDB:
// - A uniform object interface over filesystem / S3 / R2 / memory / KV-SQLite
//   (one OpenDAL-backed implementation covers every backend)
// - Conditional and atomic writes, range reads with slice semantics,
//   cursor-based listing, buffered multipart uploads
// - The observed wrapper dispatching metrics hooks
// - The circuit breaker guarding a flaky backend
//
// Higher layers (WAL, materializer, indexes) only ever see `ObjectStore`.

pub mod backend;
pub mod breaker;
pub mod multipart;
pub mod observe;
mod opendal_store;
pub mod store;

pub use backend::OpendalStore;
pub use breaker::{BreakerStore, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use multipart::MultipartUpload;
pub use observe::{
    clear_hooks, observe, register_hook, HookContext, HookResult, ObservedStore, OperationType,
    StorageHook,
};
pub use store::{
    FileInfo, ListOptions, ListPage, ObjectStore, StatInfo, WriteOptions, WriteResult,
};
