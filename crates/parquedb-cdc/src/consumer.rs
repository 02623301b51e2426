//! CDC consumption
//!
//! A consumer holds a cursor and a handler list. Records failing the
//! sequence/operation/timestamp filters are dropped; otherwise handlers run
//! in registration order and the cursor advances to `seq + 1`. Duplicate
//! delivery after a seek is the caller's responsibility.

use parquedb_core::error::{Error, Result};

use crate::record::{CdcOp, CdcRecord};

type Handler = dyn Fn(&CdcRecord) -> Result<()> + Send + Sync;

/// Initial filters
#[derive(Debug, Clone, Default)]
pub struct ConsumerOptions {
    pub from_seq: u64,
    /// Only these operations, when set
    pub operations: Option<Vec<CdcOp>>,
    /// Drop records older than this (epoch nanoseconds), when set
    pub from_timestamp: Option<i64>,
}

pub struct CdcConsumer {
    position: u64,
    operations: Option<Vec<CdcOp>>,
    from_timestamp: Option<i64>,
    handlers: Vec<Box<Handler>>,
}

impl std::fmt::Debug for CdcConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdcConsumer")
            .field("position", &self.position)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl CdcConsumer {
    pub fn new(options: ConsumerOptions) -> Self {
        Self {
            position: options.from_seq,
            operations: options.operations,
            from_timestamp: options.from_timestamp,
            handlers: Vec::new(),
        }
    }

    pub fn on_record<F>(&mut self, handler: F)
    where
        F: Fn(&CdcRecord) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Reset the cursor to a sequence.
    pub fn seek_to(&mut self, seq: u64) {
        self.position = seq;
    }

    /// Reset the cursor to a timestamp; sequence filtering restarts.
    pub fn seek_to_timestamp(&mut self, ts: i64) {
        self.position = 0;
        self.from_timestamp = Some(ts);
    }

    fn accepts(&self, record: &CdcRecord) -> bool {
        if record.seq < self.position {
            return false;
        }
        if let Some(ops) = &self.operations {
            if !ops.contains(&record.op) {
                return false;
            }
        }
        if let Some(from_ts) = self.from_timestamp {
            if record.ts < from_ts {
                return false;
            }
        }
        true
    }

    /// Returns whether the record was handled. A handler error propagates
    /// without advancing the cursor.
    pub fn process(&mut self, record: &CdcRecord) -> Result<bool> {
        if !self.accepts(record) {
            return Ok(false);
        }
        for handler in &self.handlers {
            handler(record)?;
        }
        self.position = self.position.max(record.seq + 1);
        Ok(true)
    }
}
