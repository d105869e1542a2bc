//! Retry logic with exponential backoff and a wall-clock deadline
//!
//! Every failure is retried until the deadline has elapsed; the delay between
//! attempts starts at `initial_delay` and is multiplied by
//! `multiplicative_factor` after each attempt, capped at `maximum_delay`.
//! Waits race the run's cancellation token.
//!
//! # Example
//!
//! ```no_run
//! use idr_client::retry::Retry;
//! use idr_client::error::Error;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Error> {
//! let retry = Retry::default();
//! let cancel = CancellationToken::new();
//! let rows = retry
//!     .run(&cancel, || async {
//!         // A call that may fail transiently
//!         Ok::<_, Error>(42)
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{Error, Result, RetryError};
use crate::task::Task;

/// Retry policy with exponential backoff bounded by a deadline
#[derive(Clone, Debug, PartialEq)]
pub struct Retry {
    initial_delay: Duration,
    maximum_delay: Duration,
    multiplicative_factor: f64,
    deadline: Duration,
    enabled: bool,
    jitter: bool,
}

impl Default for Retry {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl Retry {
    /// Build a policy from validated configuration values
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            initial_delay: config.initial_delay,
            maximum_delay: config.maximum_delay,
            multiplicative_factor: config.multiplicative_factor,
            deadline: config.deadline,
            enabled: config.enabled,
            jitter: config.jitter,
        }
    }

    /// A policy that makes exactly one attempt
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Override the delay before the first retry
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Override the cap on a single delay
    pub fn with_maximum_delay(mut self, delay: Duration) -> Self {
        self.maximum_delay = delay;
        self
    }

    /// Override the backoff multiplier
    pub fn with_multiplicative_factor(mut self, factor: f64) -> Self {
        self.multiplicative_factor = factor;
        self
    }

    /// Override the wall-clock deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Enable or disable randomized delays
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether failures are retried at all
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The wall-clock deadline
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// The unjittered backoff schedule: `initial, initial·f, initial·f², …`
    /// capped at the maximum delay. The iterator never ends.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        std::iter::successors(Some(self.initial_delay.min(self.maximum_delay)), |delay| {
            Some(self.next_delay(*delay))
        })
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.multiplicative_factor)
            .unwrap_or(self.maximum_delay)
            .min(self.maximum_delay)
    }

    /// Run `operation` until it succeeds, the deadline elapses or `cancel` fires
    ///
    /// A [`Error::Cancelled`] returned by the operation is passed through
    /// without further attempts.
    pub async fn run<F, Fut, T>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut delays = self.delays();
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempts += 1;

            let err = match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!(attempts, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_cancelled() || !self.enabled => return Err(e),
                Err(e) => e,
            };

            if started.elapsed() >= self.deadline {
                tracing::error!(
                    error = %err,
                    attempts,
                    deadline_secs = self.deadline.as_secs_f64(),
                    "operation failed, retry deadline exceeded"
                );
                return Err(RetryError {
                    deadline: self.deadline,
                    attempts,
                    source: Box::new(err),
                }
                .into());
            }

            // successors() never yields None
            let delay = delays.next().unwrap_or(self.maximum_delay);
            let delay = if self.jitter {
                add_jitter(delay).min(self.maximum_delay)
            } else {
                delay
            };

            tracing::warn!(
                error = %err,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "operation failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Stretch a delay by a uniform random factor in `[1, 2)`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + factor)).unwrap_or(delay)
}

/// A [`Task`] whose every execution runs under a [`Retry`] policy
///
/// Each attempt receives a clone of the original input.
pub struct RetryTask<T> {
    inner: T,
    retry: Retry,
    cancel: CancellationToken,
}

impl<T> RetryTask<T> {
    /// Wrap `inner` in `retry`, observing `cancel` between attempts
    pub fn new(inner: T, retry: Retry, cancel: CancellationToken) -> Self {
        Self {
            inner,
            retry,
            cancel,
        }
    }
}

#[async_trait]
impl<T, I, O> Task<I, O> for RetryTask<T>
where
    T: Task<I, O>,
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    async fn execute(&self, input: I) -> Result<O> {
        self.retry
            .run(&self.cancel, || self.inner.execute(input.clone()))
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> Error {
        Error::Transport(TransportError::Connection("connection reset".to_string()))
    }

    #[test]
    fn delays_grow_geometrically_up_to_the_maximum() {
        let retry = Retry::default();
        let delays: Vec<u64> = retry.delays().take(8).map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn delays_with_custom_factor() {
        let retry = Retry::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_multiplicative_factor(3.0)
            .with_maximum_delay(Duration::from_secs(1));
        let delays: Vec<u128> = retry.delays().take(4).map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![100, 300, 900, 1000]);
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt_does_not_sleep() {
        let retry = Retry::default();
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let value = retry.run(&cancel, || async { Ok(42) }).await.unwrap();

        assert_eq!(value, 42);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_then_success() {
        let retry = Retry::default();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let value = retry
            .run(&cancel, || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_operation_exhausts_the_deadline() {
        let retry = Retry::default();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let err = retry
            .run(&cancel, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(transient())
                }
            })
            .await
            .unwrap_err();

        // Attempts at 0, 1, 3, 7, 15, 31 and 63 seconds
        assert_eq!(calls.load(Ordering::SeqCst), 7);
        assert_eq!(start.elapsed(), Duration::from_secs(63));
        match err {
            Error::Retry(retry_err) => {
                assert_eq!(retry_err.attempts, 7);
                assert_eq!(retry_err.deadline, Duration::from_secs(60));
                assert!(matches!(retry_err.last_error(), Error::Transport(_)));
            }
            other => panic!("expected retry error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_policy_makes_exactly_one_attempt() {
        let retry = Retry::disabled();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let err = retry
            .run(&cancel, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(transient())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_backoff_wait() {
        let retry = Retry::default();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = retry
            .run(&cancel, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(transient())
                }
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_error_from_operation_is_not_retried() {
        let retry = Retry::default();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let err = retry
            .run(&cancel, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Error::Cancelled)
                }
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_token_prevents_the_first_attempt() {
        let retry = Retry::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicU32::new(0));

        let err = retry
            .run(&cancel, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn add_jitter_stays_within_bounds_over_many_iterations() {
        let delay = Duration::from_millis(100);
        for _ in 0..1000 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay, "jitter should never shorten the delay");
            assert!(
                jittered < delay * 2,
                "jitter should stay below double the delay, got {jittered:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn jittered_waits_never_exceed_the_maximum_delay() {
        let retry = Retry::default()
            .with_initial_delay(Duration::from_secs(1))
            .with_maximum_delay(Duration::from_secs(1))
            .with_deadline(Duration::from_secs(5))
            .with_jitter(true);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let _ = retry
            .run(&cancel, || async { Err::<(), _>(transient()) })
            .await;

        // Every wait is capped at 1s, so attempts land on whole seconds
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    struct Flaky {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl Task<u32, u32> for Flaky {
        async fn execute(&self, input: u32) -> Result<u32> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(transient());
            }
            Ok(input * 2)
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_task_reuses_the_input_for_each_attempt() {
        let task = RetryTask::new(
            Flaky {
                failures_left: AtomicU32::new(3),
            },
            Retry::default(),
            CancellationToken::new(),
        );

        assert_eq!(task.execute(21).await.unwrap(), 42);
        assert_eq!(task.name(), "flaky");
    }
}
