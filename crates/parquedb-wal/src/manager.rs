//! WAL manager
//!
//! Owns the per-namespace buffers and the persistence stores. The manager is
//! the single writer's view of the WAL: appends assign dense sequence
//! numbers, threshold crossings flush a batch, and a failed flush restores
//! the buffer so the retry sees identical state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use parquedb_core::clock::{Clock, SystemClock};
use parquedb_core::error::Result;
use parquedb_core::event::Event;
use parquedb_core::ulid::UlidGenerator;
use parquedb_storage::ObjectStore;

use crate::buffer::EventBuffer;
use crate::checkpoint::CheckpointStore;
use crate::pending::{PendingRowGroup, PendingStore};
use crate::wal::{WalBatch, WalStore};

/// Buffering thresholds
#[derive(Debug, Clone)]
pub struct WalConfig {
    pub max_buffer_size: usize,
    pub max_buffer_bytes: usize,
    /// Bulk creates at or above this size bypass the event buffer.
    pub bulk_threshold: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 100,
            max_buffer_bytes: 64 * 1024,
            bulk_threshold: 5,
        }
    }
}

pub struct WalManager {
    wal: WalStore,
    pending: PendingStore,
    checkpoints: CheckpointStore,
    config: WalConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<UlidGenerator>,
    buffers: Mutex<HashMap<String, EventBuffer>>,
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WalManager {
    pub fn new(store: Arc<dyn ObjectStore>, config: WalConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock), Arc::new(UlidGenerator::new()))
    }

    pub fn with_clock(
        store: Arc<dyn ObjectStore>,
        config: WalConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<UlidGenerator>,
    ) -> Self {
        Self {
            wal: WalStore::new(Arc::clone(&store)),
            pending: PendingStore::new(Arc::clone(&store)),
            checkpoints: CheckpointStore::new(store),
            config,
            clock,
            ids,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    pub fn wal(&self) -> &WalStore {
        &self.wal
    }

    pub fn pending(&self) -> &PendingStore {
        &self.pending
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Sequence counters initialize by scanning the highest persisted
    /// sequence for the namespace (WAL rows and pending row groups).
    async fn ensure_buffer<'a>(
        &self,
        buffers: &'a mut HashMap<String, EventBuffer>,
        ns: &str,
    ) -> Result<&'a mut EventBuffer> {
        if !buffers.contains_key(ns) {
            let wal_max = self.wal.max_seq(ns).await?;
            let pending_max = self
                .pending
                .list()
                .await?
                .into_iter()
                .filter(|r| r.ns == ns)
                .map(|r| r.last_seq)
                .max();
            let next = wal_max
                .into_iter()
                .chain(pending_max)
                .max()
                .map_or(1, |m| m + 1);
            debug!(ns, next_seq = next, "recovered namespace sequence");
            buffers.insert(ns.to_string(), EventBuffer::new(ns, next));
        }
        Ok(buffers.get_mut(ns).expect("buffer just ensured"))
    }

    /// Append one event; flushes the buffer when a threshold is crossed.
    /// Returns the assigned sequence. A flush failure surfaces the storage
    /// error but keeps the appended events buffered.
    pub async fn append(&self, ns: &str, event: Event) -> Result<u64> {
        let mut buffers = self.buffers.lock().await;
        let buffer = self.ensure_buffer(&mut buffers, ns).await?;
        let seq = buffer.append(event);
        if buffer.should_flush(&self.config) {
            self.flush_buffer(buffer).await?;
        }
        Ok(seq)
    }

    async fn flush_buffer(&self, buffer: &mut EventBuffer) -> Result<Option<WalBatch>> {
        let Some(batch) = buffer.drain(self.clock.now_ns()) else {
            return Ok(None);
        };
        match self.wal.insert(&batch).await {
            Ok(()) => Ok(Some(batch)),
            Err(e) => {
                buffer.restore(batch);
                Err(e)
            }
        }
    }

    /// Explicit flush of one namespace.
    pub async fn flush_namespace(&self, ns: &str) -> Result<Option<WalBatch>> {
        let mut buffers = self.buffers.lock().await;
        let buffer = self.ensure_buffer(&mut buffers, ns).await?;
        self.flush_buffer(buffer).await
    }

    /// Flush every namespace with buffered events.
    pub async fn flush_all(&self) -> Result<Vec<WalBatch>> {
        let mut buffers = self.buffers.lock().await;
        let mut flushed = Vec::new();
        for buffer in buffers.values_mut() {
            if let Some(batch) = self.flush_buffer(buffer).await? {
                flushed.push(batch);
            }
        }
        Ok(flushed)
    }

    /// Record a bulk create: reserves a dense sequence range and writes one
    /// pending-row-group record. Buffered events flush first so the range
    /// stays contiguous.
    pub async fn record_bulk(
        &self,
        ns: &str,
        staging_path: &str,
        row_count: u64,
    ) -> Result<PendingRowGroup> {
        let mut buffers = self.buffers.lock().await;
        let buffer = self.ensure_buffer(&mut buffers, ns).await?;
        if !buffer.is_empty() {
            self.flush_buffer(buffer).await?;
        }
        let (first_seq, last_seq) = buffer.reserve_seqs(row_count);
        let record = PendingRowGroup {
            id: self.ids.generate(self.clock.now_ms() as u64),
            ns: ns.to_string(),
            path: staging_path.to_string(),
            row_count,
            first_seq,
            last_seq,
            created_at: self.clock.now_ns(),
        };
        self.pending.insert(&record).await?;
        Ok(record)
    }

    /// The multiset of appended-but-unmaterialized events for a namespace:
    /// unflushed WAL rows plus the in-memory buffer, in sequence order.
    pub async fn unflushed_events(&self, ns: &str) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for batch in self.wal.list_namespace(ns).await? {
            if !batch.flushed {
                events.extend(batch.events);
            }
        }
        let buffers = self.buffers.lock().await;
        if let Some(buffer) = buffers.get(ns) {
            events.extend_from_slice(buffer.events());
        }
        Ok(events)
    }

    /// Count of events currently buffered in memory for a namespace.
    pub async fn buffered_len(&self, ns: &str) -> usize {
        self.buffers
            .lock()
            .await
            .get(ns)
            .map_or(0, EventBuffer::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquedb_core::event::{EventOp, EventTarget};
    use parquedb_core::ulid::Ulid;
    use parquedb_storage::backend;

    fn event(n: u128) -> Event {
        Event {
            id: Ulid::from_parts(1000 + n as u64, n),
            ts: 1_000 + n as i64,
            op: EventOp::Create,
            target: EventTarget::entity("posts", Ulid::from_parts(1, n)),
            before: None,
            after: Some(serde_json::json!({"n": n as u64})),
            actor: "amy".into(),
            metadata: None,
        }
    }

    fn manager(store: Arc<dyn ObjectStore>, max_buffer_size: usize) -> WalManager {
        WalManager::new(
            store,
            WalConfig {
                max_buffer_size,
                max_buffer_bytes: usize::MAX,
                bulk_threshold: 5,
            },
        )
    }

    #[tokio::test]
    async fn hundred_appends_make_one_row() {
        let store: Arc<dyn ObjectStore> = Arc::new(backend::new_memory().unwrap());
        let wal = manager(Arc::clone(&store), 100);
        for n in 0..100 {
            wal.append("posts", event(n)).await.unwrap();
        }
        let rows = wal.wal().list_namespace("posts").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count(), 100);
        assert_eq!((rows[0].first_seq, rows[0].last_seq), (1, 100));
        assert_eq!(wal.buffered_len("posts").await, 0);
    }

    #[tokio::test]
    async fn under_threshold_stays_buffered() {
        let store: Arc<dyn ObjectStore> = Arc::new(backend::new_memory().unwrap());
        let wal = manager(Arc::clone(&store), 100);
        for n in 0..99 {
            wal.append("posts", event(n)).await.unwrap();
        }
        assert!(wal.wal().list_namespace("posts").await.unwrap().is_empty());
        assert_eq!(wal.buffered_len("posts").await, 99);

        wal.flush_namespace("posts").await.unwrap().unwrap();
        let rows = wal.wal().list_namespace("posts").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count(), 99);
    }

    #[tokio::test]
    async fn sequence_recovery_after_reopen() {
        let store: Arc<dyn ObjectStore> = Arc::new(backend::new_memory().unwrap());
        {
            let wal = manager(Arc::clone(&store), 2);
            for n in 0..4 {
                wal.append("posts", event(n)).await.unwrap();
            }
        }
        // new manager over the same storage resumes after seq 4
        let wal = manager(Arc::clone(&store), 2);
        let seq = wal.append("posts", event(4)).await.unwrap();
        assert_eq!(seq, 5);
    }

    #[tokio::test]
    async fn namespaces_are_independent() {
        let store: Arc<dyn ObjectStore> = Arc::new(backend::new_memory().unwrap());
        let wal = manager(store, 2);
        assert_eq!(wal.append("posts", event(0)).await.unwrap(), 1);
        assert_eq!(wal.append("users", event(1)).await.unwrap(), 1);
        assert_eq!(wal.append("posts", event(2)).await.unwrap(), 2);
        assert_eq!(wal.append("users", event(3)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unflushed_events_conserved() {
        let store: Arc<dyn ObjectStore> = Arc::new(backend::new_memory().unwrap());
        let wal = manager(store, 3);
        let appended: Vec<Event> = (0..7).map(event).collect();
        for e in &appended {
            wal.append("posts", e.clone()).await.unwrap();
        }
        // 7 events: two flushed rows of 3, one buffered
        let observed = wal.unflushed_events("posts").await.unwrap();
        assert_eq!(observed, appended);
    }

    #[tokio::test]
    async fn bulk_reserves_dense_range_and_writes_no_rows() {
        let store: Arc<dyn ObjectStore> = Arc::new(backend::new_memory().unwrap());
        let wal = manager(store, 100);
        let record = wal
            .record_bulk("posts", "_staging/posts/0.parquet", 10)
            .await
            .unwrap();
        assert_eq!((record.first_seq, record.last_seq), (1, 10));
        assert!(wal.wal().list_namespace("posts").await.unwrap().is_empty());
        assert_eq!(wal.pending().list().await.unwrap().len(), 1);

        // the next ordinary append continues after the reserved range
        let seq = wal.append("posts", event(0)).await.unwrap();
        assert_eq!(seq, 11);
    }

    #[tokio::test]
    async fn bulk_flushes_buffered_events_first() {
        let store: Arc<dyn ObjectStore> = Arc::new(backend::new_memory().unwrap());
        let wal = manager(store, 100);
        wal.append("posts", event(0)).await.unwrap();
        wal.append("posts", event(1)).await.unwrap();
        let record = wal.record_bulk("posts", "_staging/x.parquet", 5).await.unwrap();
        assert_eq!((record.first_seq, record.last_seq), (3, 7));
        let rows = wal.wal().list_namespace("posts").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].first_seq, rows[0].last_seq), (1, 2));
    }
}
