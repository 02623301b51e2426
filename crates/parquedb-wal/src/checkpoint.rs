//! Checkpoints
//!
//! A checkpoint names a materialized Parquet artifact that has absorbed a
//! closed range of events. Once a checkpoint covers a WAL batch, the batch
//! can be discarded.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use parquedb_core::error::{Error, Result};
use parquedb_core::ulid::Ulid;
use parquedb_storage::ObjectStore;

pub const CHECKPOINT_PREFIX: &str = "_checkpoints";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Ulid,
    pub created_at: i64,
    pub event_count: u64,
    pub first_event_id: Ulid,
    pub last_event_id: Ulid,
    pub parquet_path: String,
}

impl Checkpoint {
    fn record_path(id: Ulid) -> String {
        format!("{CHECKPOINT_PREFIX}/{id}.json")
    }

    /// Whether an event id falls inside this checkpoint's closed range.
    pub fn covers(&self, event_id: Ulid) -> bool {
        self.first_event_id <= event_id && event_id <= self.last_event_id
    }
}

pub struct CheckpointStore {
    store: Arc<dyn ObjectStore>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn insert(&self, checkpoint: &Checkpoint) -> Result<()> {
        let bytes = serde_json::to_vec(checkpoint)
            .map_err(|e| Error::Codec(format!("checkpoint: {e}")))?;
        self.store
            .write_conditional(&Checkpoint::record_path(checkpoint.id), Bytes::from(bytes), None)
            .await?;
        Ok(())
    }

    /// All checkpoints in creation order.
    pub async fn list(&self) -> Result<Vec<Checkpoint>> {
        let page = self
            .store
            .list(&format!("{CHECKPOINT_PREFIX}/"), Default::default())
            .await?;
        let mut checkpoints = Vec::with_capacity(page.files.len());
        for file in page.files {
            let bytes = self.store.read(&file.path).await?;
            let checkpoint: Checkpoint = serde_json::from_slice(&bytes)
                .map_err(|e| Error::Codec(format!("checkpoint: {e}")))?;
            checkpoints.push(checkpoint);
        }
        checkpoints.sort_by_key(|c| c.id);
        Ok(checkpoints)
    }

    pub async fn latest(&self) -> Result<Option<Checkpoint>> {
        Ok(self.list().await?.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquedb_storage::backend;

    fn checkpoint(n: u64) -> Checkpoint {
        Checkpoint {
            id: Ulid::from_parts(n, 0),
            created_at: n as i64,
            event_count: 5,
            first_event_id: Ulid::from_parts(n * 100, 0),
            last_event_id: Ulid::from_parts(n * 100 + 50, 0),
            parquet_path: format!("events-{n}.parquet"),
        }
    }

    #[tokio::test]
    async fn latest_is_newest() {
        let store = CheckpointStore::new(Arc::new(backend::new_memory().unwrap()));
        assert!(store.latest().await.unwrap().is_none());
        store.insert(&checkpoint(1)).await.unwrap();
        store.insert(&checkpoint(2)).await.unwrap();
        assert_eq!(store.latest().await.unwrap().unwrap(), checkpoint(2));
    }

    #[test]
    fn coverage_is_closed_range() {
        let cp = checkpoint(1);
        assert!(cp.covers(Ulid::from_parts(100, 0)));
        assert!(cp.covers(Ulid::from_parts(150, 0)));
        assert!(cp.covers(Ulid::from_parts(120, 55)));
        assert!(!cp.covers(Ulid::from_parts(151, 0)));
        assert!(!cp.covers(Ulid::from_parts(99, u128::MAX & ((1 << 80) - 1))));
    }
}
