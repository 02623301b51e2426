//! Pending row groups for the bulk-create path
//!
//! A bulk create streams its rows straight to a staging Parquet artifact and
//! records one metadata row here instead of buffering per-event. Sequence
//! ranges stay dense because the buffer reserves them up front.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use parquedb_core::error::{Error, Result};
use parquedb_core::ulid::Ulid;
use parquedb_storage::ObjectStore;

pub const PENDING_PREFIX: &str = "_wal_pending";

/// Metadata for one staged Parquet artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRowGroup {
    pub id: Ulid,
    pub ns: String,
    /// Path of the staging Parquet artifact on the storage plane
    pub path: String,
    pub row_count: u64,
    pub first_seq: u64,
    pub last_seq: u64,
    pub created_at: i64,
}

impl PendingRowGroup {
    fn record_path(id: Ulid) -> String {
        format!("{PENDING_PREFIX}/{id}.json")
    }
}

/// Persistence for pending row-group records
pub struct PendingStore {
    store: Arc<dyn ObjectStore>,
}

impl PendingStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn insert(&self, record: &PendingRowGroup) -> Result<()> {
        let bytes = serde_json::to_vec(record)
            .map_err(|e| Error::Codec(format!("pending row group: {e}")))?;
        self.store
            .write_conditional(&PendingRowGroup::record_path(record.id), Bytes::from(bytes), None)
            .await?;
        Ok(())
    }

    /// All pending records in id (creation) order.
    pub async fn list(&self) -> Result<Vec<PendingRowGroup>> {
        let page = self
            .store
            .list(&format!("{PENDING_PREFIX}/"), Default::default())
            .await?;
        let mut records = Vec::with_capacity(page.files.len());
        for file in page.files {
            let bytes = self.store.read(&file.path).await?;
            let record: PendingRowGroup = serde_json::from_slice(&bytes)
                .map_err(|e| Error::Codec(format!("pending row group: {e}")))?;
            records.push(record);
        }
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    pub async fn delete(&self, id: Ulid) -> Result<bool> {
        self.store.delete(&PendingRowGroup::record_path(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquedb_storage::backend;

    fn record(n: u64) -> PendingRowGroup {
        PendingRowGroup {
            id: Ulid::from_parts(n, n as u128),
            ns: "posts".into(),
            path: format!("_staging/posts/{n}.parquet"),
            row_count: 10,
            first_seq: n * 10 + 1,
            last_seq: n * 10 + 10,
            created_at: n as i64,
        }
    }

    #[tokio::test]
    async fn insert_list_delete() {
        let pending = PendingStore::new(Arc::new(backend::new_memory().unwrap()));
        pending.insert(&record(2)).await.unwrap();
        pending.insert(&record(1)).await.unwrap();

        let listed = pending.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], record(1));
        assert_eq!(listed[1], record(2));

        assert!(pending.delete(record(1).id).await.unwrap());
        assert_eq!(pending.list().await.unwrap().len(), 1);
    }
}
