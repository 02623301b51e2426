//! CDC production
//!
//! Sequences are monotone per producer; timestamps come from the injected
//! clock in nanoseconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use parquedb_core::clock::{Clock, SystemClock};

use crate::record::{CdcOp, CdcRecord, CdcSource};

pub struct CdcProducer {
    source: CdcSource,
    seq: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CdcProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdcProducer")
            .field("source", &self.source)
            .field("seq", &self.seq.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CdcProducer {
    pub fn new(source: CdcSource) -> Self {
        Self::with_clock(source, Arc::new(SystemClock))
    }

    pub fn with_clock(source: CdcSource, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            seq: AtomicU64::new(0),
            clock,
        }
    }

    fn record(
        &self,
        id: &str,
        op: CdcOp,
        before: Option<Value>,
        after: Option<Value>,
        txn: Option<String>,
    ) -> CdcRecord {
        CdcRecord {
            id: id.to_string(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            op,
            before,
            after,
            ts: self.clock.now_ns(),
            source: self.source.clone(),
            txn,
        }
    }

    pub fn create(&self, id: &str, after: Value, txn: Option<String>) -> CdcRecord {
        self.record(id, CdcOp::Create, None, Some(after), txn)
    }

    pub fn update(&self, id: &str, before: Value, after: Value, txn: Option<String>) -> CdcRecord {
        self.record(id, CdcOp::Update, Some(before), Some(after), txn)
    }

    pub fn delete(&self, id: &str, before: Value, txn: Option<String>) -> CdcRecord {
        self.record(id, CdcOp::Delete, Some(before), None, txn)
    }

    /// Snapshot: one `r` record per entity, `_before = null`.
    pub fn snapshot(&self, entities: &[(String, Value)]) -> Vec<CdcRecord> {
        entities
            .iter()
            .map(|(id, state)| self.record(id, CdcOp::Read, None, Some(state.clone()), None))
            .collect()
    }

    /// The next sequence that will be assigned.
    pub fn get_sequence(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    pub fn reset_sequence(&self, n: u64) {
        self.seq.store(n, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquedb_core::clock::ManualClock;
    use serde_json::json;

    fn producer() -> CdcProducer {
        CdcProducer::with_clock(
            CdcSource::with_collection("parquedb", "main", "posts"),
            Arc::new(ManualClock::new(1_000)),
        )
    }

    #[test]
    fn sequences_are_monotone() {
        let producer = producer();
        let a = producer.create("posts/1", json!({"n": 1}), None);
        let b = producer.update("posts/1", json!({"n": 1}), json!({"n": 2}), None);
        let c = producer.delete("posts/1", json!({"n": 2}), None);
        assert_eq!((a.seq, b.seq, c.seq), (0, 1, 2));
        assert_eq!(producer.get_sequence(), 3);
    }

    #[test]
    fn record_shapes() {
        let producer = producer();
        let create = producer.create("posts/1", json!({"n": 1}), Some("txn-1".into()));
        assert_eq!(create.op, CdcOp::Create);
        assert!(create.before.is_none());
        assert_eq!(create.txn.as_deref(), Some("txn-1"));
        assert_eq!(create.ts, 1_000);

        let update = producer.update("posts/1", json!({"n": 1}), json!({"n": 2}), None);
        assert!(update.before.is_some() && update.after.is_some());

        let delete = producer.delete("posts/1", json!({"n": 2}), None);
        assert!(delete.after.is_none());
    }

    #[test]
    fn snapshot_emits_reads() {
        let producer = producer();
        let records = producer.snapshot(&[
            ("posts/1".into(), json!({"n": 1})),
            ("posts/2".into(), json!({"n": 2})),
        ]);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.op == CdcOp::Read && r.before.is_none()));
        assert_eq!(records[1].seq, 1);
    }

    #[test]
    fn reset_rewinds() {
        let producer = producer();
        producer.create("posts/1", json!({}), None);
        producer.reset_sequence(0);
        assert_eq!(producer.get_sequence(), 0);
        let record = producer.create("posts/2", json!({}), None);
        assert_eq!(record.seq, 0);
    }
}
