//! Retry with exponential backoff and jitter
//!
//! `delay_n = min(max_delay, base_delay * multiplier^n)`, optionally spread
//! by symmetric jitter `delay * (1 ± jitter_factor * rand)` and clamped to
//! zero. An error is retried only when the predicate recognizes it; the
//! default accepts `ConcurrencyError`, `VersionMismatchError` and transient
//! failures. Both the delay scheduler and the entropy source are injectable
//! so tests never sleep or depend on the wall clock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::{Rng, RngCore};
use tracing::debug;

use parquedb_core::clock::{Clock, SystemClock};
use parquedb_core::error::Error;

mod abort;
mod sleeper;

pub use abort::AbortToken;
pub use sleeper::{RecordingSleeper, Sleeper, TokioSleeper};

/// Backoff configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
            jitter_factor: 0.5,
        }
    }
}

/// Per-call observability, attached to the terminal error on failure.
#[derive(Debug, Clone, Default)]
pub struct RetryMetrics {
    pub attempts: u32,
    pub retries: u32,
    pub succeeded: bool,
    pub errors: Vec<String>,
    pub delays: Vec<Duration>,
    pub elapsed: Duration,
}

/// Passed to the `on_retry` callback before each delay.
#[derive(Debug, Clone)]
pub struct RetryInfo<'a> {
    /// 1-based attempt that just failed
    pub attempt: u32,
    pub error: &'a Error,
    pub next_delay: Duration,
}

/// Terminal retry failure: the last error plus the metrics of the whole call.
#[derive(Debug)]
pub struct RetryFailure {
    pub error: Error,
    pub metrics: RetryMetrics,
}

impl std::fmt::Display for RetryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} attempts)", self.error, self.metrics.attempts)
    }
}

impl std::error::Error for RetryFailure {}

impl From<RetryFailure> for Error {
    fn from(failure: RetryFailure) -> Self {
        failure.error
    }
}

type RetryPredicate = dyn Fn(&Error) -> bool + Send + Sync;
type RetryCallback = dyn Fn(&RetryInfo<'_>) -> bool + Send + Sync;

/// Retry executor
pub struct Retry {
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    rng: Mutex<Box<dyn RngCore + Send>>,
    is_retryable: Box<RetryPredicate>,
    on_retry: Option<Box<RetryCallback>>,
}

impl std::fmt::Debug for Retry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
            rng: Mutex::new(Box::new(rand::rngs::OsRng)),
            is_retryable: Box::new(Error::is_retryable),
            on_retry: None,
        }
    }

    /// Replace the delay scheduler (tests use [`RecordingSleeper`]).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_rng(mut self, rng: Box<dyn RngCore + Send>) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Box::new(predicate);
        self
    }

    /// Callback invoked before each delay; returning `false` vetoes further
    /// retries and surfaces the current error.
    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RetryInfo<'_>) -> bool + Send + Sync + 'static,
    {
        self.on_retry = Some(Box::new(callback));
        self
    }

    /// Nominal delay before retry `n` (0-based), pre-jitter.
    fn nominal_delay(&self, retry: u32) -> Duration {
        let exp = self.config.base_delay.as_secs_f64() * self.config.multiplier.powi(retry as i32);
        Duration::from_secs_f64(exp.min(self.config.max_delay.as_secs_f64()))
    }

    /// Apply symmetric jitter, clamped to non-negative.
    fn jittered(&self, delay: Duration) -> Duration {
        if !self.config.jitter {
            return delay;
        }
        let spread: f64 = self.rng.lock().gen_range(-1.0..=1.0);
        let factor = (1.0 + self.config.jitter_factor * spread).max(0.0);
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }

    /// Run `op` with retries. The closure receives the 1-based attempt
    /// number. Cancellation via `token` surfaces `AbortError`: immediately
    /// when the token is already aborted, or mid-delay otherwise.
    pub async fn run<T, F, Fut>(
        &self,
        task_name: &str,
        token: &AbortToken,
        mut op: F,
    ) -> Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let started_ns = self.clock.now_ns();
        let mut metrics = RetryMetrics::default();

        loop {
            if token.is_aborted() {
                return Err(self.fail(Error::Aborted, metrics, started_ns));
            }

            metrics.attempts += 1;
            let attempt = metrics.attempts;
            match op(attempt).await {
                Ok(value) => {
                    metrics.succeeded = true;
                    metrics.elapsed = elapsed_since(self.clock.as_ref(), started_ns);
                    return Ok(value);
                }
                Err(error) => {
                    metrics.errors.push(error.name().to_string());
                    let retries_left = metrics.attempts <= self.config.max_retries;
                    if !retries_left || !(self.is_retryable)(&error) {
                        return Err(self.fail(error, metrics, started_ns));
                    }

                    let delay = self.jittered(self.nominal_delay(metrics.attempts - 1));
                    if let Some(callback) = &self.on_retry {
                        let info = RetryInfo {
                            attempt,
                            error: &error,
                            next_delay: delay,
                        };
                        if !callback(&info) {
                            return Err(self.fail(error, metrics, started_ns));
                        }
                    }

                    debug!(
                        task_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after backoff",
                    );
                    metrics.retries += 1;
                    metrics.delays.push(delay);

                    tokio::select! {
                        _ = self.sleeper.sleep(delay) => {}
                        _ = token.cancelled() => {
                            return Err(self.fail(Error::Aborted, metrics, started_ns));
                        }
                    }
                }
            }
        }
    }

    fn fail(&self, error: Error, mut metrics: RetryMetrics, started_ns: i64) -> RetryFailure {
        metrics.elapsed = elapsed_since(self.clock.as_ref(), started_ns);
        RetryFailure { error, metrics }
    }
}

fn elapsed_since(clock: &dyn Clock, started_ns: i64) -> Duration {
    Duration::from_nanos((clock.now_ns() - started_ns).max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retry_for_tests(config: RetryConfig) -> (Retry, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let retry = Retry::new(config)
            .with_sleeper(Arc::clone(&sleeper) as Arc<dyn Sleeper>)
            .with_rng(Box::new(StepRng::new(u64::MAX / 2, 0)));
        (retry, sleeper)
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let (retry, sleeper) = retry_for_tests(RetryConfig::default());
        let result = retry
            .run("ok", &AbortToken::new(), |_| async { Ok::<_, Error>(42) })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let (retry, sleeper) = retry_for_tests(RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        });
        let calls = AtomicU32::new(0);
        let result = retry
            .run("flaky", &AbortToken::new(), |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::Concurrency("contended".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 2);
        // deterministic exponential sequence without jitter
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn attempt_bound_is_max_retries_plus_one() {
        let (retry, _) = retry_for_tests(RetryConfig {
            max_retries: 3,
            jitter: false,
            ..RetryConfig::default()
        });
        let calls = AtomicU32::new(0);
        let failure = retry
            .run("always-fails", &AbortToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Error::Transient("boom".into())) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(failure.metrics.attempts, 4);
        assert_eq!(failure.metrics.retries, 3);
        assert_eq!(failure.metrics.errors.len(), 4);
        assert!(!failure.metrics.succeeded);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let (retry, sleeper) = retry_for_tests(RetryConfig::default());
        let failure = retry
            .run("fatal", &AbortToken::new(), |_| async {
                Err::<(), _>(Error::NotFound("gone".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(failure.metrics.attempts, 1);
        assert!(sleeper.delays().is_empty());
        assert_eq!(failure.error.name(), "NotFound");
    }

    #[tokio::test]
    async fn delays_stay_within_max() {
        let (retry, sleeper) = retry_for_tests(RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            jitter: false,
            jitter_factor: 0.5,
        });
        let _ = retry
            .run("capped", &AbortToken::new(), |_| async {
                Err::<(), _>(Error::Transient("again".into()))
            })
            .await;
        let delays = sleeper.delays();
        assert_eq!(delays.len(), 10);
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(350)));
        assert_eq!(delays[2], Duration::from_millis(350)); // 400ms capped
    }

    #[tokio::test]
    async fn jitter_never_negative() {
        // StepRng at minimum drives gen_range(-1.0..=1.0) to the low end
        let sleeper = Arc::new(RecordingSleeper::default());
        let retry = Retry::new(RetryConfig {
            jitter_factor: 2.0, // 1 - 2.0 would go negative without clamping
            ..RetryConfig::default()
        })
        .with_sleeper(Arc::clone(&sleeper) as Arc<dyn Sleeper>)
        .with_rng(Box::new(StepRng::new(0, 0)));
        let _ = retry
            .run("jittered", &AbortToken::new(), |_| async {
                Err::<(), _>(Error::Transient("x".into()))
            })
            .await;
        assert!(sleeper.delays().iter().all(|d| *d >= Duration::ZERO));
    }

    #[tokio::test]
    async fn pre_aborted_token_short_circuits() {
        let (retry, _) = retry_for_tests(RetryConfig::default());
        let token = AbortToken::new();
        token.abort();
        let calls = AtomicU32::new(0);
        let failure = retry
            .run("aborted", &token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Error>(1) }
            })
            .await
            .unwrap_err();
        assert_eq!(failure.error.name(), "AbortError");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn abort_interrupts_delay() {
        // A sleeper that never completes forces the select onto the token.
        let retry = Retry::new(RetryConfig::default())
            .with_sleeper(Arc::new(sleeper::PendingSleeper))
            .with_rng(Box::new(StepRng::new(0, 0)));
        let token = AbortToken::new();
        let aborter = token.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            aborter.abort();
        });
        let failure = retry
            .run("interrupted", &token, |_| async {
                Err::<(), _>(Error::Transient("keeps failing".into()))
            })
            .await
            .unwrap_err();
        handle.await.unwrap();
        assert_eq!(failure.error.name(), "AbortError");
    }

    #[tokio::test]
    async fn on_retry_can_veto() {
        let (retry, _) = retry_for_tests(RetryConfig::default());
        let retry = retry.on_retry(|info| info.attempt < 2);
        let failure = retry
            .run("vetoed", &AbortToken::new(), |_| async {
                Err::<(), _>(Error::Transient("x".into()))
            })
            .await
            .unwrap_err();
        // attempt 1 fails, callback allows one retry; attempt 2 fails and is vetoed
        assert_eq!(failure.metrics.attempts, 2);
    }
}
