//! Buffered multipart uploads
//!
//! Parts are 1-based and may arrive out of order; `complete` concatenates in
//! part-number order and lands the object with a single atomic write. The
//! buffered implementation makes multipart available on every backend, which
//! is why `supports_multipart` defaults to true for the OpenDAL store.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use parquedb_core::error::{Error, Result};

use crate::store::{ObjectStore, WriteOptions, WriteResult};

/// Etag for an uploaded part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    pub part_number: u32,
    pub etag: String,
}

/// An in-flight multipart upload
pub struct MultipartUpload {
    store: Arc<dyn ObjectStore>,
    path: String,
    upload_id: String,
    parts: Mutex<Vec<(u32, Bytes)>>,
}

impl std::fmt::Debug for MultipartUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartUpload")
            .field("path", &self.path)
            .field("upload_id", &self.upload_id)
            .finish()
    }
}

impl MultipartUpload {
    /// Start an upload targeting `path`.
    pub fn create(store: Arc<dyn ObjectStore>, path: &str) -> Result<Self> {
        if !store.supports_multipart() {
            return Err(Error::Permanent(format!(
                "backend {} does not support multipart uploads",
                store.backend_name()
            )));
        }
        let upload_id = format!("mpu-{}", blake3::hash(path.as_bytes()).to_hex());
        Ok(Self {
            store,
            path: path.to_string(),
            upload_id,
            parts: Mutex::new(Vec::new()),
        })
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Buffer one part. Part numbers start at 1; re-uploading a number
    /// replaces the previous bytes.
    pub fn upload_part(&self, part_number: u32, data: Bytes) -> Result<PartInfo> {
        if part_number == 0 {
            return Err(Error::InvalidInput("part numbers are 1-based".into()));
        }
        let etag = blake3::hash(&data).to_hex().to_string();
        let mut parts = self.parts.lock();
        parts.retain(|(n, _)| *n != part_number);
        parts.push((part_number, data));
        Ok(PartInfo { part_number, etag })
    }

    /// Concatenate the named parts in part-number order and write the final
    /// object. Parts uploaded but not listed are dropped.
    pub async fn complete(self, part_numbers: &[u32]) -> Result<WriteResult> {
        let mut buffered = self.parts.into_inner();
        buffered.sort_by_key(|(n, _)| *n);

        let mut selected = Vec::with_capacity(part_numbers.len());
        for number in part_numbers {
            let part = buffered
                .iter()
                .find(|(n, _)| n == number)
                .ok_or_else(|| Error::InvalidInput(format!("part {number} was never uploaded")))?;
            selected.push(part.clone());
        }
        selected.sort_by_key(|(n, _)| *n);

        let total: usize = selected.iter().map(|(_, d)| d.len()).sum();
        let mut combined = Vec::with_capacity(total);
        for (_, data) in &selected {
            combined.extend_from_slice(data);
        }
        self.store
            .write_atomic(&self.path, Bytes::from(combined), WriteOptions::default())
            .await
    }

    /// Drop all buffered parts without writing anything.
    pub fn abort(self) {
        self.parts.lock().clear();
    }
}

#[cfg(test)]
#[cfg(feature = "services-memory")]
mod tests {
    use super::*;
    use crate::backend;

    fn store() -> Arc<dyn ObjectStore> {
        Arc::new(backend::new_memory().unwrap())
    }

    #[tokio::test]
    async fn parts_concatenate_in_number_order() {
        let store = store();
        let upload = MultipartUpload::create(Arc::clone(&store), "big.bin").unwrap();
        // uploaded out of order
        upload.upload_part(2, Bytes::from_static(b"world")).unwrap();
        upload.upload_part(1, Bytes::from_static(b"hello ")).unwrap();
        let result = upload.complete(&[1, 2]).await.unwrap();
        assert_eq!(result.size, 11);
        assert_eq!(
            store.read("big.bin").await.unwrap(),
            Bytes::from_static(b"hello world")
        );
    }

    #[tokio::test]
    async fn zero_part_number_rejected() {
        let upload = MultipartUpload::create(store(), "x.bin").unwrap();
        assert!(upload.upload_part(0, Bytes::new()).is_err());
    }

    #[tokio::test]
    async fn completing_unknown_part_fails() {
        let store = store();
        let upload = MultipartUpload::create(Arc::clone(&store), "x.bin").unwrap();
        upload.upload_part(1, Bytes::from_static(b"a")).unwrap();
        assert!(upload.complete(&[1, 2]).await.is_err());
        assert!(!store.exists("x.bin").await.unwrap());
    }

    #[tokio::test]
    async fn abort_writes_nothing() {
        let store = store();
        let upload = MultipartUpload::create(Arc::clone(&store), "gone.bin").unwrap();
        upload.upload_part(1, Bytes::from_static(b"a")).unwrap();
        upload.abort();
        assert!(!store.exists("gone.bin").await.unwrap());
    }
}
