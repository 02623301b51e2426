//! Per-namespace in-memory event buffer
//!
//! Sequence numbers are dense per namespace: the buffer owns the counter and
//! every append assigns `last_seq + 1`. A drained batch can be restored after
//! a failed flush, which re-establishes exactly the pre-drain state.

use parquedb_core::event::Event;

use crate::manager::WalConfig;
use crate::wal::WalBatch;

#[derive(Debug)]
pub struct EventBuffer {
    ns: String,
    events: Vec<Event>,
    /// Sequence of the first buffered event (meaningless while empty)
    first_seq: u64,
    /// Sequence of the last appended event; `first_seq - 1` while empty
    last_seq: u64,
    size_bytes: usize,
}

impl EventBuffer {
    /// `next_seq` is one past the highest sequence already persisted for the
    /// namespace (1 for a fresh namespace).
    pub fn new(ns: impl Into<String>, next_seq: u64) -> Self {
        Self {
            ns: ns.into(),
            events: Vec::new(),
            first_seq: next_seq,
            last_seq: next_seq.saturating_sub(1),
            size_bytes: 0,
        }
    }

    pub fn ns(&self) -> &str {
        &self.ns
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Sequence that the next appended event will receive.
    pub fn next_seq(&self) -> u64 {
        self.last_seq + 1
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Append never fails; it returns the assigned sequence.
    pub fn append(&mut self, event: Event) -> u64 {
        self.size_bytes += event.encoded_size();
        self.events.push(event);
        self.last_seq += 1;
        self.last_seq
    }

    /// Reserve `count` sequence numbers without buffering events (bulk path).
    pub fn reserve_seqs(&mut self, count: u64) -> (u64, u64) {
        debug_assert!(self.is_empty(), "bulk reservation on a non-empty buffer");
        let first = self.last_seq + 1;
        self.last_seq += count;
        self.first_seq = self.last_seq + 1;
        (first, self.last_seq)
    }

    pub fn should_flush(&self, config: &WalConfig) -> bool {
        self.events.len() >= config.max_buffer_size || self.size_bytes >= config.max_buffer_bytes
    }

    /// Drain everything into a WAL batch. Returns `None` while empty.
    pub fn drain(&mut self, now_ns: i64) -> Option<WalBatch> {
        if self.events.is_empty() {
            return None;
        }
        let events = std::mem::take(&mut self.events);
        let batch = WalBatch::new(
            self.ns.clone(),
            self.first_seq,
            self.last_seq,
            events,
            now_ns,
        );
        self.first_seq = self.last_seq + 1;
        self.size_bytes = 0;
        Some(batch)
    }

    /// Undo a drain after a failed flush. The batch's events come back in
    /// front of anything appended since.
    pub fn restore(&mut self, batch: WalBatch) {
        let mut events = batch.events;
        self.size_bytes += events.iter().map(Event::encoded_size).sum::<usize>();
        events.append(&mut self.events);
        self.events = events;
        self.first_seq = batch.first_seq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquedb_core::event::{EventOp, EventTarget};
    use parquedb_core::ulid::Ulid;

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

    fn config(max_size: usize, max_bytes: usize) -> WalConfig {
        WalConfig {
            max_buffer_size: max_size,
            max_buffer_bytes: max_bytes,
            ..WalConfig::default()
        }
    }

    #[test]
    fn sequences_are_dense() {
        let mut buffer = EventBuffer::new("posts", 1);
        assert_eq!(buffer.append(event(0)), 1);
        assert_eq!(buffer.append(event(1)), 2);
        assert_eq!(buffer.append(event(2)), 3);
        assert_eq!(buffer.next_seq(), 4);
    }

    #[test]
    fn count_threshold() {
        let cfg = config(3, usize::MAX);
        let mut buffer = EventBuffer::new("posts", 1);
        buffer.append(event(0));
        buffer.append(event(1));
        assert!(!buffer.should_flush(&cfg));
        buffer.append(event(2));
        assert!(buffer.should_flush(&cfg));
    }

    #[test]
    fn byte_threshold() {
        let cfg = config(usize::MAX, 64);
        let mut buffer = EventBuffer::new("posts", 1);
        assert!(!buffer.should_flush(&cfg));
        buffer.append(event(0));
        // one serialized event easily exceeds 64 bytes
        assert!(buffer.should_flush(&cfg));
    }

    #[test]
    fn drain_and_continue() {
        let mut buffer = EventBuffer::new("posts", 1);
        buffer.append(event(0));
        buffer.append(event(1));
        let batch = buffer.drain(99).unwrap();
        assert_eq!((batch.first_seq, batch.last_seq), (1, 2));
        assert_eq!(batch.count(), 2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.size_bytes(), 0);

        assert_eq!(buffer.append(event(2)), 3);
        let batch = buffer.drain(100).unwrap();
        assert_eq!((batch.first_seq, batch.last_seq), (3, 3));
    }

    #[test]
    fn drain_empty_is_none() {
        let mut buffer = EventBuffer::new("posts", 5);
        assert!(buffer.drain(0).is_none());
        assert_eq!(buffer.next_seq(), 5);
    }

    #[test]
    fn restore_rewinds_state() {
        let mut buffer = EventBuffer::new("posts", 1);
        buffer.append(event(0));
        buffer.append(event(1));
        let bytes_before = buffer.size_bytes();
        let batch = buffer.drain(0).unwrap();
        buffer.restore(batch);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.size_bytes(), bytes_before);
        assert_eq!(buffer.next_seq(), 3);
        // a fresh drain yields the same sequence range
        let batch = buffer.drain(0).unwrap();
        assert_eq!((batch.first_seq, batch.last_seq), (1, 2));
    }

    #[test]
    fn bulk_reservation_keeps_density() {
        let mut buffer = EventBuffer::new("posts", 1);
        let (first, last) = buffer.reserve_seqs(10);
        assert_eq!((first, last), (1, 10));
        assert_eq!(buffer.append(event(0)), 11);
    }
}
