// OpenDAL-backed implementation of the storage plane
//
// One implementation covers every backend; capability gaps (native
// preconditions, append, rename) fall back to emulations that preserve the
// contract under the single-writer-per-namespace model.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use opendal::{ErrorKind, Operator};
use tracing::debug;

use parquedb_core::error::{Error, Result};

use crate::store::{
    FileInfo, ListOptions, ListPage, ObjectStore, StatInfo, WriteOptions, WriteResult,
};

/// Uniform store over an OpenDAL operator
#[derive(Clone)]
pub struct OpendalStore {
    op: Operator,
    scheme: String,
}

impl std::fmt::Debug for OpendalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpendalStore")
            .field("scheme", &self.scheme)
            .finish()
    }
}

impl OpendalStore {
    pub fn new(op: Operator) -> Self {
        let scheme = op.info().scheme().to_string();
        Self { op, scheme }
    }

    /// Direct access to the underlying operator.
    pub fn operator(&self) -> &Operator {
        &self.op
    }

    /// Posix-like cleanup; `..` traversal is forbidden.
    fn normalize(&self, path: &str) -> Result<String> {
        let mut segments = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    return Err(Error::InvalidInput(format!(
                        "path traversal is not allowed: {path}"
                    )))
                }
                other => segments.push(other),
            }
        }
        let mut normalized = segments.join("/");
        if path.ends_with('/') && !normalized.is_empty() {
            normalized.push('/');
        }
        Ok(normalized)
    }

    async fn current_etag(&self, path: &str) -> Result<Option<String>> {
        match self.op.stat(path).await {
            Ok(meta) => {
                if let Some(etag) = meta.etag() {
                    return Ok(Some(etag.to_string()));
                }
                // Backend keeps no etag: hash the content instead, matching
                // the etag our own writes report.
                let data = self.op.read(path).await.map_err(map_err(path))?;
                Ok(Some(synthetic_etag(&data.to_bytes())))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_err(path)(e)),
        }
    }

    /// Enforce `if_none_match` / `if_match` preconditions without native
    /// backend support.
    async fn check_preconditions(&self, path: &str, opts: &WriteOptions) -> Result<()> {
        if let Some(token) = &opts.if_none_match {
            if token != "*" {
                return Err(Error::InvalidInput(
                    "if_none_match only supports '*'".into(),
                ));
            }
            if self.exists_inner(path).await? {
                return Err(Error::PreconditionFailed(format!(
                    "object already exists: {path}"
                )));
            }
        }
        if let Some(expected) = &opts.if_match {
            match self.current_etag(path).await? {
                Some(actual) if actual == *expected => {}
                Some(actual) => {
                    return Err(Error::PreconditionFailed(format!(
                        "etag mismatch on {path}: expected {expected}, found {actual}"
                    )))
                }
                None => {
                    return Err(Error::PreconditionFailed(format!(
                        "object vanished under if_match: {path}"
                    )))
                }
            }
        }
        Ok(())
    }

    async fn exists_inner(&self, path: &str) -> Result<bool> {
        match self.op.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_err(path)(e)),
        }
    }

    async fn write_inner(&self, path: &str, data: Bytes, opts: &WriteOptions) -> Result<WriteResult> {
        let capability = self.op.info().full_capability();
        let size = data.len() as u64;
        let etag = synthetic_etag(&data);

        // Native preconditions when the backend has them; emulation elsewhere
        // is safe under the single-writer model.
        if opts.if_none_match.as_deref() == Some("*") && capability.write_with_if_not_exists {
            let meta = self
                .op
                .write_with(path, data)
                .if_not_exists(true)
                .await
                .map_err(map_err(path))?;
            return Ok(WriteResult {
                etag: meta.etag().map(str::to_string).unwrap_or(etag),
                size,
            });
        }
        if let (Some(expected), true) = (&opts.if_match, capability.write_with_if_match) {
            let meta = self
                .op
                .write_with(path, data)
                .if_match(expected)
                .await
                .map_err(map_err(path))?;
            return Ok(WriteResult {
                etag: meta.etag().map(str::to_string).unwrap_or(etag),
                size,
            });
        }

        self.check_preconditions(path, opts).await?;
        let meta = self.op.write(path, data).await.map_err(map_err(path))?;
        Ok(WriteResult {
            etag: meta.etag().map(str::to_string).unwrap_or(etag),
            size,
        })
    }
}

#[async_trait]
impl ObjectStore for OpendalStore {
    fn backend_name(&self) -> &str {
        &self.scheme
    }

    async fn read(&self, path: &str) -> Result<Bytes> {
        let path = self.normalize(path)?;
        let buffer = self.op.read(&path).await.map_err(map_err(&path))?;
        Ok(buffer.to_bytes())
    }

    async fn read_range(&self, path: &str, start: u64, end: u64) -> Result<Bytes> {
        let path = self.normalize(path)?;
        let meta = self.op.stat(&path).await.map_err(map_err(&path))?;
        let size = meta.content_length();
        let start = start.min(size);
        let end = end.min(size);
        if start >= end {
            return Ok(Bytes::new());
        }
        let buffer = self
            .op
            .read_with(&path)
            .range(start..end)
            .await
            .map_err(map_err(&path))?;
        Ok(buffer.to_bytes())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = self.normalize(path)?;
        self.exists_inner(&path).await
    }

    async fn stat(&self, path: &str) -> Result<Option<StatInfo>> {
        let path = self.normalize(path)?;
        match self.op.stat(&path).await {
            Ok(meta) => Ok(Some(StatInfo {
                size: meta.content_length(),
                etag: meta.etag().map(str::to_string),
                modified: meta.last_modified().map(|t| t.timestamp_millis()),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_err(&path)(e)),
        }
    }

    async fn write(&self, path: &str, data: Bytes, opts: WriteOptions) -> Result<WriteResult> {
        let path = self.normalize(path)?;
        self.write_inner(&path, data, &opts).await
    }

    async fn write_atomic(
        &self,
        path: &str,
        data: Bytes,
        opts: WriteOptions,
    ) -> Result<WriteResult> {
        let path = self.normalize(path)?;
        let capability = self.op.info().full_capability();
        if !capability.rename {
            // No rename: a plain conditional write is already atomic from
            // the reader's perspective on object stores.
            return self.write_inner(&path, data, &opts).await;
        }

        self.check_preconditions(&path, &opts).await?;
        let etag = synthetic_etag(&data);
        let size = data.len() as u64;
        let staging = format!("{path}.tmp-{}", &etag[..8]);
        self.op.write(&staging, data).await.map_err(map_err(&staging))?;
        self.op
            .rename(&staging, &path)
            .await
            .map_err(map_err(&path))?;
        Ok(WriteResult { etag, size })
    }

    async fn write_conditional(
        &self,
        path: &str,
        data: Bytes,
        expected_etag: Option<&str>,
    ) -> Result<WriteResult> {
        let opts = match expected_etag {
            None => WriteOptions::if_not_exists(),
            Some(etag) => WriteOptions {
                if_none_match: None,
                if_match: Some(etag.to_string()),
            },
        };
        self.write(path, data, opts).await
    }

    async fn append(&self, path: &str, data: Bytes) -> Result<()> {
        let path = self.normalize(path)?;
        let capability = self.op.info().full_capability();
        if capability.write_can_append {
            self.op
                .write_with(&path, data)
                .append(true)
                .await
                .map_err(map_err(&path))?;
            return Ok(());
        }
        // Read-modify-write fallback; append makes no atomicity promise.
        let mut combined = match self.op.read(&path).await {
            Ok(existing) => existing.to_vec(),
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(map_err(&path)(e)),
        };
        combined.extend_from_slice(&data);
        self.op
            .write(&path, combined)
            .await
            .map_err(map_err(&path))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let path = self.normalize(path)?;
        let existed = self.exists_inner(&path).await?;
        if existed {
            self.op.delete(&path).await.map_err(map_err(&path))?;
        }
        Ok(existed)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let prefix = self.normalize(prefix)?;
        let mut lister = self
            .op
            .lister_with(&prefix)
            .recursive(true)
            .await
            .map_err(map_err(&prefix))?;
        let mut count = 0u64;
        while let Some(entry) = lister.try_next().await.map_err(map_err(&prefix))? {
            if entry.metadata().mode().is_dir() {
                continue;
            }
            self.op
                .delete(entry.path())
                .await
                .map_err(map_err(entry.path()))?;
            count += 1;
        }
        debug!(prefix = %prefix, count, "deleted objects under prefix");
        Ok(count)
    }

    async fn list(&self, prefix: &str, opts: ListOptions) -> Result<ListPage> {
        let prefix = self.normalize(prefix)?;
        let mut lister = if opts.delimiter {
            self.op.lister_with(&prefix).await.map_err(map_err(&prefix))?
        } else {
            self.op
                .lister_with(&prefix)
                .recursive(true)
                .await
                .map_err(map_err(&prefix))?
        };

        let mut file_paths = Vec::new();
        let mut prefixes = Vec::new();
        while let Some(entry) = lister.try_next().await.map_err(map_err(&prefix))? {
            let path = entry.path().to_string();
            if path == prefix {
                continue;
            }
            if entry.metadata().mode().is_dir() {
                if opts.delimiter {
                    prefixes.push(path);
                }
            } else {
                file_paths.push(path);
            }
        }
        // Deterministic paging requires a stable order.
        file_paths.sort();
        prefixes.sort();

        if let Some(cursor) = &opts.cursor {
            file_paths.retain(|p| p.as_str() > cursor.as_str());
        }

        let limit = opts.limit.unwrap_or(usize::MAX);
        let has_more = file_paths.len() > limit;
        file_paths.truncate(limit);

        let mut files = Vec::with_capacity(file_paths.len());
        for path in file_paths {
            let stat = self.stat(&path).await?.ok_or_else(|| {
                Error::Transient(format!("object disappeared during listing: {path}"))
            })?;
            files.push(FileInfo {
                path,
                size: stat.size,
                etag: stat.etag,
            });
        }

        let cursor = if has_more {
            files.last().map(|f| f.path.clone())
        } else {
            None
        };
        Ok(ListPage {
            files,
            delimited_prefixes: prefixes,
            cursor,
            has_more,
        })
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let from = self.normalize(from)?;
        let to = self.normalize(to)?;
        let capability = self.op.info().full_capability();
        if capability.copy {
            return self.op.copy(&from, &to).await.map_err(map_err(&from));
        }
        let data = self.op.read(&from).await.map_err(map_err(&from))?;
        self.op
            .write(&to, data.to_bytes())
            .await
            .map_err(map_err(&to))?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = self.normalize(from)?;
        let to = self.normalize(to)?;
        let capability = self.op.info().full_capability();
        if capability.rename {
            return self.op.rename(&from, &to).await.map_err(map_err(&from));
        }
        self.copy(&from, &to).await?;
        self.delete(&from).await?;
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let path = self.normalize(path)?;
        let capability = self.op.info().full_capability();
        if capability.create_dir {
            let dir = if path.ends_with('/') {
                path
            } else {
                format!("{path}/")
            };
            self.op.create_dir(&dir).await.map_err(map_err(&dir))?;
        }
        Ok(())
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<()> {
        let path = self.normalize(path)?;
        let dir = if path.ends_with('/') {
            path
        } else {
            format!("{path}/")
        };
        if recursive {
            self.op.remove_all(&dir).await.map_err(map_err(&dir))?;
            return Ok(());
        }
        let page = self
            .list(
                &dir,
                ListOptions {
                    limit: Some(1),
                    ..ListOptions::default()
                },
            )
            .await?;
        if !page.files.is_empty() || !page.delimited_prefixes.is_empty() {
            return Err(Error::InvalidInput(format!("directory not empty: {dir}")));
        }
        let capability = self.op.info().full_capability();
        if capability.create_dir {
            self.op.delete(&dir).await.map_err(map_err(&dir))?;
        }
        Ok(())
    }

    fn supports_multipart(&self) -> bool {
        true
    }
}

fn synthetic_etag(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Translate OpenDAL errors into the stable error kinds.
fn map_err(path: &str) -> impl Fn(opendal::Error) -> Error + '_ {
    move |e: opendal::Error| match e.kind() {
        ErrorKind::NotFound => Error::NotFound(path.to_string()),
        ErrorKind::ConditionNotMatch => {
            Error::PreconditionFailed(format!("precondition not met: {path}"))
        }
        ErrorKind::AlreadyExists => {
            Error::PreconditionFailed(format!("object already exists: {path}"))
        }
        ErrorKind::PermissionDenied | ErrorKind::Unsupported => {
            Error::Permanent(format!("{path}: {e}"))
        }
        _ => Error::Transient(format!("{path}: {e}")),
    }
}
