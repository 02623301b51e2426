//! Circuit breaker
//!
//! Three states guard a flaky backend: CLOSED counts consecutive failures
//! inside a sliding window, OPEN fails fast until the reset timeout elapses,
//! HALF_OPEN admits probes and re-opens on the first failure. `NotFound`
//! never trips the breaker. The clock is injectable.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{info, warn};

use parquedb_core::clock::{Clock, SystemClock};
use parquedb_core::error::{Error, Result};

use crate::store::{
    ListOptions, ListPage, ObjectStore, StatInfo, WriteOptions, WriteResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

type FailurePredicate = dyn Fn(&Error) -> bool + Send + Sync;
type StateChangeCallback = dyn Fn(CircuitState, CircuitState) + Send + Sync;

/// Breaker configuration with defaults suited to object storage.
pub struct CircuitBreakerConfig {
    /// Consecutive failures inside the window that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive HALF_OPEN successes that close it again.
    pub success_threshold: u32,
    /// How long OPEN rejects before admitting a probe.
    pub reset_timeout: Duration,
    /// Failures older than this no longer count as consecutive.
    pub failure_window: Duration,
    /// Which errors count as failures. Default: everything except NotFound.
    pub is_failure: Option<Box<FailurePredicate>>,
    pub on_state_change: Option<Box<StateChangeCallback>>,
}

impl std::fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("success_threshold", &self.success_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("failure_window", &self.failure_window)
            .finish_non_exhaustive()
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            failure_window: Duration::from_secs(60),
            is_failure: None,
            on_state_change: None,
        }
    }
}

/// Lifetime counters, monotone
#[derive(Debug, Default)]
pub struct BreakerMetrics {
    pub total_requests: AtomicU64,
    pub total_successes: AtomicU64,
    pub total_failures: AtomicU64,
    pub rejected: AtomicU64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    window_start_ms: i64,
    half_open_successes: u32,
    opened_at_ms: i64,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
    metrics: BreakerMetrics,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state.lock().state)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                window_start_ms: 0,
                half_open_successes: 0,
                opened_at_ms: 0,
            }),
            metrics: BreakerMetrics::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    pub fn metrics(&self) -> &BreakerMetrics {
        &self.metrics
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let from = state.state;
        if from == to {
            return;
        }
        state.state = to;
        info!(circuit = %self.name, ?from, ?to, "circuit state change");
        if let Some(callback) = &self.config.on_state_change {
            callback(from, to);
        }
    }

    /// Admission check. Rejections count toward total requests.
    fn admit(&self) -> Result<()> {
        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let now_ms = self.clock.now_ms();
                let elapsed = now_ms - state.opened_at_ms;
                let reset_ms = self.config.reset_timeout.as_millis() as i64;
                if elapsed >= reset_ms {
                    self.transition(&mut state, CircuitState::HalfOpen);
                    state.half_open_successes = 0;
                    Ok(())
                } else {
                    self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                    Err(Error::CircuitOpen {
                        circuit_name: self.name.clone(),
                        remaining_ms: (reset_ms - elapsed).max(0) as u64,
                    })
                }
            }
        }
    }

    fn record_success(&self) {
        self.metrics.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                state.half_open_successes += 1;
                if state.half_open_successes >= self.config.success_threshold {
                    self.transition(&mut state, CircuitState::Closed);
                    state.consecutive_failures = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, error: &Error) {
        let counts = match &self.config.is_failure {
            Some(predicate) => predicate(error),
            None => error.name() != "NotFound",
        };
        if !counts {
            // Treated like a success for circuit accounting.
            self.record_success();
            return;
        }
        self.metrics.total_failures.fetch_add(1, Ordering::Relaxed);

        let now_ms = self.clock.now_ms();
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => {
                let window_ms = self.config.failure_window.as_millis() as i64;
                if state.consecutive_failures == 0 || now_ms - state.window_start_ms > window_ms {
                    state.consecutive_failures = 0;
                    state.window_start_ms = now_ms;
                }
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(circuit = %self.name, failures = state.consecutive_failures, "opening circuit");
                    self.transition(&mut state, CircuitState::Open);
                    state.opened_at_ms = now_ms;
                }
            }
            CircuitState::HalfOpen => {
                // Any failure while probing re-opens immediately.
                self.transition(&mut state, CircuitState::Open);
                state.opened_at_ms = now_ms;
            }
            CircuitState::Open => {}
        }
    }

    /// Run `op` through the breaker.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure(&error);
                Err(error)
            }
        }
    }
}

/// Store wrapper routing every operation through a shared breaker
pub struct BreakerStore {
    inner: Arc<dyn ObjectStore>,
    breaker: Arc<CircuitBreaker>,
}

impl BreakerStore {
    pub fn new(inner: Arc<dyn ObjectStore>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl ObjectStore for BreakerStore {
    fn backend_name(&self) -> &str {
        self.inner.backend_name()
    }

    async fn read(&self, path: &str) -> Result<Bytes> {
        self.breaker.call(|| self.inner.read(path)).await
    }

    async fn read_range(&self, path: &str, start: u64, end: u64) -> Result<Bytes> {
        self.breaker
            .call(|| self.inner.read_range(path, start, end))
            .await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.breaker.call(|| self.inner.exists(path)).await
    }

    async fn stat(&self, path: &str) -> Result<Option<StatInfo>> {
        self.breaker.call(|| self.inner.stat(path)).await
    }

    async fn write(&self, path: &str, data: Bytes, opts: WriteOptions) -> Result<WriteResult> {
        self.breaker.call(|| self.inner.write(path, data, opts)).await
    }

    async fn write_atomic(
        &self,
        path: &str,
        data: Bytes,
        opts: WriteOptions,
    ) -> Result<WriteResult> {
        self.breaker
            .call(|| self.inner.write_atomic(path, data, opts))
            .await
    }

    async fn write_conditional(
        &self,
        path: &str,
        data: Bytes,
        expected_etag: Option<&str>,
    ) -> Result<WriteResult> {
        self.breaker
            .call(|| self.inner.write_conditional(path, data, expected_etag))
            .await
    }

    async fn append(&self, path: &str, data: Bytes) -> Result<()> {
        self.breaker.call(|| self.inner.append(path, data)).await
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        self.breaker.call(|| self.inner.delete(path)).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        self.breaker.call(|| self.inner.delete_prefix(prefix)).await
    }

    async fn list(&self, prefix: &str, opts: ListOptions) -> Result<ListPage> {
        self.breaker.call(|| self.inner.list(prefix, opts)).await
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.breaker.call(|| self.inner.copy(from, to)).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.breaker.call(|| self.inner.rename(from, to)).await
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        self.breaker.call(|| self.inner.mkdir(path)).await
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<()> {
        self.breaker.call(|| self.inner.rmdir(path, recursive)).await
    }

    fn supports_multipart(&self) -> bool {
        self.inner.supports_multipart()
    }
}
