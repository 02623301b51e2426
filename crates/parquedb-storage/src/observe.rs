//! Observed wrapper and hook registry
//!
//! Hooks are registered once at startup into a global registry and receive
//! `(context, result)` pairs for read/write/delete traffic plus errors.
//! Hook failures are isolated per hook and never alter the operation's
//! outcome. Lightweight operations (`exists`, `stat`, `mkdir`) emit nothing.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::warn;

use parquedb_core::error::{Error, Result};

use crate::store::{
    FileInfo, ListOptions, ListPage, ObjectStore, StatInfo, WriteOptions, WriteResult,
};

/// What kind of storage operation a hook observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Read,
    ReadRange,
    List,
    Write,
    Append,
    Copy,
    Rename,
    Delete,
    DeletePrefix,
}

/// Context passed to every hook
#[derive(Debug, Clone)]
pub struct HookContext {
    pub operation: OperationType,
    pub path: String,
    /// `(start, end)` for range reads
    pub range: Option<(u64, u64)>,
}

/// Result record passed to success hooks
#[derive(Debug, Clone, Default)]
pub struct HookResult {
    pub bytes_transferred: u64,
    pub file_count: Option<u64>,
    pub etag: Option<String>,
    pub duration_ms: u64,
}

/// Observer of storage traffic. All methods default to no-ops so hooks
/// implement only what they care about.
pub trait StorageHook: Send + Sync {
    fn on_read(&self, _context: &HookContext, _result: &HookResult) {}
    fn on_write(&self, _context: &HookContext, _result: &HookResult) {}
    fn on_delete(&self, _context: &HookContext, _result: &HookResult) {}
    fn on_error(&self, _context: &HookContext, _error: &Error) {}
}

static REGISTRY: Lazy<RwLock<Vec<Arc<dyn StorageHook>>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Register a hook for the lifetime of the process.
pub fn register_hook(hook: Arc<dyn StorageHook>) {
    REGISTRY.write().push(hook);
}

/// Drop every registered hook (tests).
pub fn clear_hooks() {
    REGISTRY.write().clear();
}

enum HookKind {
    Read,
    Write,
    Delete,
}

fn dispatch(kind: HookKind, context: &HookContext, result: &HookResult) {
    for hook in REGISTRY.read().iter() {
        let outcome = catch_unwind(AssertUnwindSafe(|| match kind {
            HookKind::Read => hook.on_read(context, result),
            HookKind::Write => hook.on_write(context, result),
            HookKind::Delete => hook.on_delete(context, result),
        }));
        if outcome.is_err() {
            warn!(path = %context.path, "storage hook panicked; ignoring");
        }
    }
}

fn dispatch_error(context: &HookContext, error: &Error) {
    for hook in REGISTRY.read().iter() {
        let outcome = catch_unwind(AssertUnwindSafe(|| hook.on_error(context, error)));
        if outcome.is_err() {
            warn!(path = %context.path, "storage error hook panicked; ignoring");
        }
    }
}

/// Wrap a store with observation. Wrapping an already-observed store is the
/// identity.
pub fn observe(store: Arc<dyn ObjectStore>) -> Arc<dyn ObjectStore> {
    if store.is_observed() {
        return store;
    }
    Arc::new(ObservedStore::new(store))
}

/// Transparent decorator dispatching hooks around an inner store
pub struct ObservedStore {
    inner: Arc<dyn ObjectStore>,
}

impl ObservedStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    /// Typed reference to the wrapped store.
    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.inner
    }

    async fn observed<T, F, Fut, R>(
        &self,
        kind: HookKind,
        context: HookContext,
        op: F,
        into_result: R,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
        R: FnOnce(&T, u64) -> HookResult,
    {
        let started = Instant::now();
        match op().await {
            Ok(value) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let result = into_result(&value, duration_ms);
                dispatch(kind, &context, &result);
                Ok(value)
            }
            Err(error) => {
                dispatch_error(&context, &error);
                Err(error)
            }
        }
    }
}

fn context(operation: OperationType, path: &str) -> HookContext {
    HookContext {
        operation,
        path: path.to_string(),
        range: None,
    }
}

#[async_trait]
impl ObjectStore for ObservedStore {
    fn backend_name(&self) -> &str {
        self.inner.backend_name()
    }

    fn is_observed(&self) -> bool {
        true
    }

    async fn read(&self, path: &str) -> Result<Bytes> {
        self.observed(
            HookKind::Read,
            context(OperationType::Read, path),
            || self.inner.read(path),
            |data: &Bytes, duration_ms| HookResult {
                bytes_transferred: data.len() as u64,
                duration_ms,
                ..HookResult::default()
            },
        )
        .await
    }

    async fn read_range(&self, path: &str, start: u64, end: u64) -> Result<Bytes> {
        let mut ctx = context(OperationType::ReadRange, path);
        ctx.range = Some((start, end));
        self.observed(
            HookKind::Read,
            ctx,
            || self.inner.read_range(path, start, end),
            |data: &Bytes, duration_ms| HookResult {
                bytes_transferred: data.len() as u64,
                duration_ms,
                ..HookResult::default()
            },
        )
        .await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn stat(&self, path: &str) -> Result<Option<StatInfo>> {
        self.inner.stat(path).await
    }

    async fn write(&self, path: &str, data: Bytes, opts: WriteOptions) -> Result<WriteResult> {
        let size = data.len() as u64;
        self.observed(
            HookKind::Write,
            context(OperationType::Write, path),
            || self.inner.write(path, data, opts),
            move |result: &WriteResult, duration_ms| HookResult {
                bytes_transferred: size,
                etag: Some(result.etag.clone()),
                duration_ms,
                ..HookResult::default()
            },
        )
        .await
    }

    async fn write_atomic(
        &self,
        path: &str,
        data: Bytes,
        opts: WriteOptions,
    ) -> Result<WriteResult> {
        let size = data.len() as u64;
        self.observed(
            HookKind::Write,
            context(OperationType::Write, path),
            || self.inner.write_atomic(path, data, opts),
            move |result: &WriteResult, duration_ms| HookResult {
                bytes_transferred: size,
                etag: Some(result.etag.clone()),
                duration_ms,
                ..HookResult::default()
            },
        )
        .await
    }

    async fn write_conditional(
        &self,
        path: &str,
        data: Bytes,
        expected_etag: Option<&str>,
    ) -> Result<WriteResult> {
        let size = data.len() as u64;
        self.observed(
            HookKind::Write,
            context(OperationType::Write, path),
            || self.inner.write_conditional(path, data, expected_etag),
            move |result: &WriteResult, duration_ms| HookResult {
                bytes_transferred: size,
                etag: Some(result.etag.clone()),
                duration_ms,
                ..HookResult::default()
            },
        )
        .await
    }

    async fn append(&self, path: &str, data: Bytes) -> Result<()> {
        let size = data.len() as u64;
        self.observed(
            HookKind::Write,
            context(OperationType::Append, path),
            || self.inner.append(path, data),
            move |_: &(), duration_ms| HookResult {
                bytes_transferred: size,
                duration_ms,
                ..HookResult::default()
            },
        )
        .await
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        self.observed(
            HookKind::Delete,
            context(OperationType::Delete, path),
            || self.inner.delete(path),
            |existed: &bool, duration_ms| HookResult {
                file_count: Some(u64::from(*existed)),
                duration_ms,
                ..HookResult::default()
            },
        )
        .await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        self.observed(
            HookKind::Delete,
            context(OperationType::DeletePrefix, prefix),
            || self.inner.delete_prefix(prefix),
            |count: &u64, duration_ms| HookResult {
                file_count: Some(*count),
                duration_ms,
                ..HookResult::default()
            },
        )
        .await
    }

    async fn list(&self, prefix: &str, opts: ListOptions) -> Result<ListPage> {
        self.observed(
            HookKind::Read,
            context(OperationType::List, prefix),
            || self.inner.list(prefix, opts),
            |page: &ListPage, duration_ms| HookResult {
                bytes_transferred: page.files.iter().map(|f: &FileInfo| f.size).sum(),
                file_count: Some(page.files.len() as u64),
                duration_ms,
                ..HookResult::default()
            },
        )
        .await
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.observed(
            HookKind::Write,
            context(OperationType::Copy, to),
            || self.inner.copy(from, to),
            |_: &(), duration_ms| HookResult {
                duration_ms,
                ..HookResult::default()
            },
        )
        .await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.observed(
            HookKind::Write,
            context(OperationType::Rename, to),
            || self.inner.rename(from, to),
            |_: &(), duration_ms| HookResult {
                duration_ms,
                ..HookResult::default()
            },
        )
        .await
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        self.inner.mkdir(path).await
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<()> {
        self.inner.rmdir(path, recursive).await
    }

    fn supports_multipart(&self) -> bool {
        self.inner.supports_multipart()
    }
}
