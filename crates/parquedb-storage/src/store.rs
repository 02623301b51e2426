//! The uniform object interface
//!
//! Every backend exposes the same contract; capability differences (native
//! preconditions, append, rename) are absorbed by the implementation, never
//! by callers. Range reads follow slice semantics: `end` is exclusive and
//! both bounds clamp to the object size.

use async_trait::async_trait;
use bytes::Bytes;

use parquedb_core::error::Result;

/// Lightweight metadata from `stat`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatInfo {
    pub size: u64,
    pub etag: Option<String>,
    /// Last-modified, epoch milliseconds
    pub modified: Option<i64>,
}

/// Result of a successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    pub etag: String,
    pub size: u64,
}

/// Preconditions for `write`
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// `Some("*")` fails with `PreconditionFailed` when the object exists.
    pub if_none_match: Option<String>,
    /// Fails with `PreconditionFailed` unless the stored etag matches.
    pub if_match: Option<String>,
}

impl WriteOptions {
    pub fn if_not_exists() -> Self {
        Self {
            if_none_match: Some("*".to_string()),
            if_match: None,
        }
    }
}

/// One listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub etag: Option<String>,
}

/// Options for `list`
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Resume after the path returned in a previous page's `cursor`.
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    /// Group children under common prefixes instead of recursing.
    pub delimiter: bool,
}

/// One page of listing results
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub files: Vec<FileInfo>,
    pub delimited_prefixes: Vec<String>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

/// The storage plane contract
///
/// All paths are posix-like relative strings; `..` traversal is rejected.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Backend scheme, used in logs and circuit names.
    fn backend_name(&self) -> &str;

    /// Marker for the observed wrapper so decorating twice is the identity.
    fn is_observed(&self) -> bool {
        false
    }

    async fn read(&self, path: &str) -> Result<Bytes>;

    /// `end` is exclusive; out-of-range bounds clamp to the object size.
    async fn read_range(&self, path: &str, start: u64, end: u64) -> Result<Bytes>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// `None` when the object does not exist.
    async fn stat(&self, path: &str) -> Result<Option<StatInfo>>;

    async fn write(&self, path: &str, data: Bytes, opts: WriteOptions) -> Result<WriteResult>;

    /// Atomic from the reader's perspective (staged write + rename where the
    /// backend distinguishes it from a plain put).
    async fn write_atomic(&self, path: &str, data: Bytes, opts: WriteOptions)
        -> Result<WriteResult>;

    /// Optimistic-concurrency write. `expected_etag = None` means the object
    /// must not exist yet.
    async fn write_conditional(
        &self,
        path: &str,
        data: Bytes,
        expected_etag: Option<&str>,
    ) -> Result<WriteResult>;

    /// Not required to be atomic across concurrent appenders.
    async fn append(&self, path: &str, data: Bytes) -> Result<()>;

    /// Returns whether the object existed.
    async fn delete(&self, path: &str) -> Result<bool>;

    /// Returns the number of objects removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    async fn list(&self, prefix: &str, opts: ListOptions) -> Result<ListPage>;

    async fn copy(&self, from: &str, to: &str) -> Result<()>;

    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// No-op on backends without directory concepts.
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// No-op on backends without directory concepts.
    async fn rmdir(&self, path: &str, recursive: bool) -> Result<()>;

    /// Multipart capability discovery; uploads are created through
    /// [`crate::MultipartUpload::create`].
    fn supports_multipart(&self) -> bool {
        false
    }
}
