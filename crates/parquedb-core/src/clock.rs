//! Injectable time source
//!
//! The retry utility and circuit breaker take an explicit clock so tests
//! never depend on the wall clock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A source of time in epoch nanoseconds/milliseconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_ns(&self) -> i64;

    fn now_ms(&self) -> i64 {
        self.now_ns() / 1_000_000
    }
}

/// Wall-clock time via `chrono`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> i64 {
        chrono::Utc::now()
            .timestamp_nanos_opt()
            .expect("system time within supported range")
    }
}

/// Manually advanced clock for tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ns: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(now_ns: i64) -> Self {
        Self {
            now_ns: Arc::new(AtomicI64::new(now_ns)),
        }
    }

    pub fn advance_ms(&self, ms: i64) {
        self.now_ns.fetch_add(ms * 1_000_000, Ordering::SeqCst);
    }

    pub fn advance_ns(&self, ns: i64) {
        self.now_ns.fetch_add(ns, Ordering::SeqCst);
    }

    pub fn set_ns(&self, ns: i64) {
        self.now_ns.store(ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> i64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(0);
        assert_eq!(clock.now_ns(), 0);
        clock.advance_ms(5);
        assert_eq!(clock.now_ms(), 5);
        clock.advance_ns(1);
        assert_eq!(clock.now_ns(), 5_000_001);
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }
}
