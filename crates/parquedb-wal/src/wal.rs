//! WAL rows on the storage plane
//!
//! One object per batch under `_wal/<ns>/`, named by zero-padded sequence
//! range so a plain listing is already in order. The object layout is
//! `[headerLen:u32 BE][header JSON][event blob]`; the blob is a JSON array
//! or CBOR, distinguished by sniffing its first byte on read.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use parquedb_core::error::{Error, Result};
use parquedb_core::event::Event;
use parquedb_storage::ObjectStore;

pub const WAL_PREFIX: &str = "_wal";

/// Event blob encodings accepted on read; writes default to JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlobEncoding {
    #[default]
    Json,
    Cbor,
}

/// Header persisted in front of the event blob
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalHeader {
    ns: String,
    first_seq: u64,
    last_seq: u64,
    count: usize,
    min_ts: i64,
    max_ts: i64,
    flushed: bool,
    created_at: i64,
}

/// One WAL batch: N buffered events plus the sequence bookkeeping
#[derive(Debug, Clone)]
pub struct WalBatch {
    pub ns: String,
    pub first_seq: u64,
    pub last_seq: u64,
    pub min_ts: i64,
    pub max_ts: i64,
    pub flushed: bool,
    pub created_at: i64,
    pub events: Vec<Event>,
}

impl WalBatch {
    pub fn new(ns: String, first_seq: u64, last_seq: u64, events: Vec<Event>, now_ns: i64) -> Self {
        let min_ts = events.iter().map(|e| e.ts).min().unwrap_or(0);
        let max_ts = events.iter().map(|e| e.ts).max().unwrap_or(0);
        Self {
            ns,
            first_seq,
            last_seq,
            min_ts,
            max_ts,
            flushed: false,
            created_at: now_ns,
            events,
        }
    }

    pub fn count(&self) -> usize {
        self.events.len()
    }

    /// Storage path of this batch's row object.
    pub fn path(&self) -> String {
        batch_path(&self.ns, self.first_seq, self.last_seq)
    }
}

pub fn batch_path(ns: &str, first_seq: u64, last_seq: u64) -> String {
    format!("{WAL_PREFIX}/{ns}/{first_seq:020}-{last_seq:020}.wal")
}

fn encode_events(events: &[Event], encoding: BlobEncoding) -> Result<Vec<u8>> {
    match encoding {
        BlobEncoding::Json => {
            serde_json::to_vec(events).map_err(|e| Error::Codec(format!("wal blob encode: {e}")))
        }
        BlobEncoding::Cbor => {
            let mut blob = Vec::new();
            ciborium::into_writer(&events, &mut blob)
                .map_err(|e| Error::Codec(format!("wal blob encode: {e}")))?;
            Ok(blob)
        }
    }
}

/// Sniff the first byte: a JSON array opens with '['; anything else is CBOR.
fn decode_events(blob: &[u8]) -> Result<Vec<Event>> {
    match blob.first() {
        None => Ok(Vec::new()),
        Some(b'[') => {
            serde_json::from_slice(blob).map_err(|e| Error::Codec(format!("wal blob decode: {e}")))
        }
        Some(_) => ciborium::from_reader(blob)
            .map_err(|e| Error::Codec(format!("wal blob decode: {e}"))),
    }
}

fn encode_row(batch: &WalBatch, encoding: BlobEncoding) -> Result<Vec<u8>> {
    let header = WalHeader {
        ns: batch.ns.clone(),
        first_seq: batch.first_seq,
        last_seq: batch.last_seq,
        count: batch.events.len(),
        min_ts: batch.min_ts,
        max_ts: batch.max_ts,
        flushed: batch.flushed,
        created_at: batch.created_at,
    };
    let header_bytes =
        serde_json::to_vec(&header).map_err(|e| Error::Codec(format!("wal header: {e}")))?;
    let blob = encode_events(&batch.events, encoding)?;

    let mut row = Vec::with_capacity(4 + header_bytes.len() + blob.len());
    row.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    row.extend_from_slice(&header_bytes);
    row.extend_from_slice(&blob);
    Ok(row)
}

fn decode_row(bytes: &[u8]) -> Result<WalBatch> {
    if bytes.len() < 4 {
        return Err(Error::Codec("wal row too short".into()));
    }
    let header_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let header_end = 4 + header_len;
    if bytes.len() < header_end {
        return Err(Error::Codec("wal row header truncated".into()));
    }
    let header: WalHeader = serde_json::from_slice(&bytes[4..header_end])
        .map_err(|e| Error::Codec(format!("wal header: {e}")))?;
    let events = decode_events(&bytes[header_end..])?;
    if events.len() != header.count {
        return Err(Error::Codec(format!(
            "wal row count mismatch: header {} vs blob {}",
            header.count,
            events.len()
        )));
    }
    Ok(WalBatch {
        ns: header.ns,
        first_seq: header.first_seq,
        last_seq: header.last_seq,
        min_ts: header.min_ts,
        max_ts: header.max_ts,
        flushed: header.flushed,
        created_at: header.created_at,
        events,
    })
}

/// WAL persistence over the storage plane
pub struct WalStore {
    store: Arc<dyn ObjectStore>,
    encoding: BlobEncoding,
}

impl std::fmt::Debug for WalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalStore")
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl WalStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            encoding: BlobEncoding::default(),
        }
    }

    pub fn with_encoding(mut self, encoding: BlobEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Persist a batch. The conditional create is the atomic INSERT; hitting
    /// an existing row means sequence accounting went wrong somewhere.
    pub async fn insert(&self, batch: &WalBatch) -> Result<()> {
        let row = encode_row(batch, self.encoding)?;
        let path = batch.path();
        self.store
            .write_conditional(&path, Bytes::from(row), None)
            .await?;
        debug!(
            ns = %batch.ns,
            first_seq = batch.first_seq,
            last_seq = batch.last_seq,
            count = batch.count(),
            "inserted wal row",
        );
        Ok(())
    }

    pub async fn load(&self, path: &str) -> Result<WalBatch> {
        let bytes = self.store.read(path).await?;
        decode_row(&bytes)
    }

    /// All batches for one namespace, in sequence order.
    pub async fn list_namespace(&self, ns: &str) -> Result<Vec<WalBatch>> {
        let prefix = format!("{WAL_PREFIX}/{ns}/");
        let page = self.store.list(&prefix, Default::default()).await?;
        let mut batches = Vec::with_capacity(page.files.len());
        for file in page.files {
            batches.push(self.load(&file.path).await?);
        }
        batches.sort_by_key(|b| b.first_seq);
        Ok(batches)
    }

    /// Every unflushed batch across all namespaces, grouped in listing order.
    pub async fn list_unflushed(&self) -> Result<Vec<WalBatch>> {
        let prefix = format!("{WAL_PREFIX}/");
        let page = self.store.list(&prefix, Default::default()).await?;
        let mut batches = Vec::new();
        for file in page.files {
            let batch = self.load(&file.path).await?;
            if !batch.flushed {
                batches.push(batch);
            }
        }
        batches.sort_by(|a, b| (&a.ns, a.first_seq).cmp(&(&b.ns, b.first_seq)));
        Ok(batches)
    }

    /// Rewrite the row with `flushed = 1`.
    pub async fn mark_flushed(&self, batch: &mut WalBatch) -> Result<()> {
        batch.flushed = true;
        let row = encode_row(batch, self.encoding)?;
        self.store
            .write(&batch.path(), Bytes::from(row), Default::default())
            .await?;
        Ok(())
    }

    pub async fn delete(&self, batch: &WalBatch) -> Result<bool> {
        self.store.delete(&batch.path()).await
    }

    /// Highest persisted sequence for a namespace, from the row names alone.
    pub async fn max_seq(&self, ns: &str) -> Result<Option<u64>> {
        let prefix = format!("{WAL_PREFIX}/{ns}/");
        let page = self.store.list(&prefix, Default::default()).await?;
        let mut max = None;
        for file in page.files {
            if let Some(last) = parse_last_seq(&file.path) {
                max = Some(max.map_or(last, |m: u64| m.max(last)));
            }
        }
        Ok(max)
    }
}

/// Pull `last_seq` back out of `.../<first>-<last>.wal`.
fn parse_last_seq(path: &str) -> Option<u64> {
    let name = path.rsplit('/').next()?;
    let stem = name.strip_suffix(".wal")?;
    let (_, last) = stem.split_once('-')?;
    last.parse().ok()
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

    fn batch(first: u64, count: u64) -> WalBatch {
        let events = (0..count).map(|n| event(n as u128)).collect();
        WalBatch::new("posts".into(), first, first + count - 1, events, 42)
    }

    fn wal() -> WalStore {
        WalStore::new(Arc::new(backend::new_memory().unwrap()))
    }

    #[tokio::test]
    async fn insert_load_roundtrip() {
        let wal = wal();
        let batch = batch(1, 3);
        wal.insert(&batch).await.unwrap();

        let loaded = wal.load(&batch.path()).await.unwrap();
        assert_eq!(loaded.ns, "posts");
        assert_eq!((loaded.first_seq, loaded.last_seq), (1, 3));
        assert_eq!(loaded.count(), 3);
        assert_eq!(loaded.min_ts, 1_000);
        assert_eq!(loaded.max_ts, 1_002);
        assert!(!loaded.flushed);
        assert_eq!(loaded.events, batch.events);
    }

    #[tokio::test]
    async fn cbor_rows_decode_by_sniffing() {
        let store: Arc<dyn ObjectStore> = Arc::new(backend::new_memory().unwrap());
        let writer = WalStore::new(Arc::clone(&store)).with_encoding(BlobEncoding::Cbor);
        let reader = WalStore::new(store);

        let batch = batch(1, 2);
        writer.insert(&batch).await.unwrap();
        let loaded = reader.load(&batch.path()).await.unwrap();
        assert_eq!(loaded.events, batch.events);
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let wal = wal();
        let batch = batch(1, 2);
        wal.insert(&batch).await.unwrap();
        let err = wal.insert(&batch).await.unwrap_err();
        assert_eq!(err.name(), "PreconditionFailed");
    }

    #[tokio::test]
    async fn namespace_listing_in_sequence_order() {
        let wal = wal();
        wal.insert(&batch(4, 2)).await.unwrap();
        wal.insert(&batch(1, 3)).await.unwrap();
        let batches = wal.list_namespace("posts").await.unwrap();
        assert_eq!(
            batches.iter().map(|b| b.first_seq).collect::<Vec<_>>(),
            vec![1, 4]
        );
        // contiguity: next batch starts right after the previous
        assert_eq!(batches[0].last_seq + 1, batches[1].first_seq);
    }

    #[tokio::test]
    async fn flushed_rows_leave_unflushed_listing() {
        let wal = wal();
        let mut first = batch(1, 2);
        wal.insert(&first).await.unwrap();
        wal.insert(&batch(3, 2)).await.unwrap();

        assert_eq!(wal.list_unflushed().await.unwrap().len(), 2);
        wal.mark_flushed(&mut first).await.unwrap();
        let unflushed = wal.list_unflushed().await.unwrap();
        assert_eq!(unflushed.len(), 1);
        assert_eq!(unflushed[0].first_seq, 3);
    }

    #[tokio::test]
    async fn max_seq_scans_row_names() {
        let wal = wal();
        assert_eq!(wal.max_seq("posts").await.unwrap(), None);
        wal.insert(&batch(1, 3)).await.unwrap();
        wal.insert(&batch(4, 5)).await.unwrap();
        assert_eq!(wal.max_seq("posts").await.unwrap(), Some(8));
    }

    #[test]
    fn corrupt_rows_rejected() {
        assert!(decode_row(b"xy").is_err());
        assert!(decode_row(&[0, 0, 0, 99, b'{']).is_err());
    }
}
