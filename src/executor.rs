//! Concurrent executor for fan-out stages
//!
//! [`ConcurrentExecutor`] runs a batch of invocations on the tokio runtime,
//! bounded by an optional worker budget, and gathers their results in input
//! order. Failures and panics stay confined to their own position.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result, TaskError};
use crate::task::Task;

/// Runs invocations concurrently and waits for all of them
///
/// The executor is disposed when dropped; after [`dispose`](Self::dispose) it
/// refuses new submissions and aborts whatever is still running.
#[derive(Debug)]
pub struct ConcurrentExecutor {
    permits: Option<Arc<Semaphore>>,
    max_workers: Option<usize>,
    disposed: AtomicBool,
    shutdown: CancellationToken,
}

impl ConcurrentExecutor {
    /// Create an executor
    ///
    /// `None` runs every invocation at once; `Some(n)` keeps at most `n`
    /// (at least 1) in flight.
    pub fn new(max_workers: Option<usize>) -> Self {
        let max_workers = max_workers.map(|n| n.max(1));
        Self {
            permits: max_workers.map(|n| Arc::new(Semaphore::new(n))),
            max_workers,
            disposed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// The worker budget, if bounded
    pub fn max_workers(&self) -> Option<usize> {
        self.max_workers
    }

    /// Whether [`dispose`](Self::dispose) has been called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Refuse further submissions and abort in-flight work
    ///
    /// Calling this more than once has no further effect.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(permits) = &self.permits {
            permits.close();
        }
        self.shutdown.cancel();
        tracing::debug!("concurrent executor disposed");
    }

    /// Run every invocation and return their results in input order
    ///
    /// Returns [`Error::ExecutorDisposed`] if the executor no longer accepts
    /// work. Otherwise the outer result is always `Ok` and holds exactly one
    /// entry per invocation. If `cancel` fires first, invocations that have
    /// not started never start and every unfinished position holds
    /// [`Error::Cancelled`].
    pub async fn execute_all<I, F, T>(
        &self,
        cancel: &CancellationToken,
        invocations: I,
    ) -> Result<Vec<Result<T>>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_disposed() {
            return Err(Error::ExecutorDisposed);
        }

        let mut set = JoinSet::new();
        let mut results: Vec<Option<Result<T>>> = Vec::new();

        for (index, invocation) in invocations.into_iter().enumerate() {
            results.push(None);
            let permits = self.permits.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let _permit = match permits {
                    Some(permits) => tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return (index, Err(Error::Cancelled)),
                        permit = permits.acquire_owned() => match permit {
                            Ok(permit) => Some(permit),
                            Err(_) => return (index, Err(Error::ExecutorDisposed)),
                        },
                    },
                    None => None,
                };
                if cancel.is_cancelled() {
                    return (index, Err(Error::Cancelled));
                }
                let outcome = match AssertUnwindSafe(invocation).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(payload) => {
                        let message = panic_message(payload);
                        tracing::error!(index, panic = %message, "invocation panicked");
                        Err(TaskError::panicked(format!("invocation {index}"), message).into())
                    }
                };
                (index, outcome)
            });
        }

        tracing::debug!(
            invocations = results.len(),
            max_workers = ?self.max_workers,
            "executing invocations"
        );

        let interrupted = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Some(InterruptReason::Cancelled),
                _ = self.shutdown.cancelled() => break Some(InterruptReason::Disposed),
                joined = set.join_next() => match joined {
                    Some(Ok((index, outcome))) => results[index] = Some(outcome),
                    Some(Err(join_err)) => {
                        tracing::error!(error = %join_err, "executor worker failed to join");
                    }
                    None => break None,
                },
            }
        };

        if let Some(reason) = interrupted {
            set.abort_all();
            let unfinished = results.iter().filter(|r| r.is_none()).count();
            tracing::warn!(unfinished, ?reason, "execution interrupted, aborting in-flight invocations");
        }

        Ok(results
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| match interrupted {
                    Some(InterruptReason::Disposed) => Err(Error::ExecutorDisposed),
                    _ => Err(Error::Cancelled),
                })
            })
            .collect())
    }

    /// Run `task` once per input and return the results in input order
    pub async fn execute_each<T, In, Out>(
        &self,
        cancel: &CancellationToken,
        task: Arc<T>,
        inputs: Vec<In>,
    ) -> Result<Vec<Result<Out>>>
    where
        T: Task<In, Out> + ?Sized + 'static,
        In: Send + 'static,
        Out: Send + 'static,
    {
        let invocations = inputs.into_iter().map(|input| {
            let task = task.clone();
            async move { task.execute(input).await }
        });
        self.execute_all(cancel, invocations).await
    }
}

impl Drop for ConcurrentExecutor {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[derive(Clone, Copy, Debug)]
enum InterruptReason {
    Cancelled,
    Disposed,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn results_follow_input_order_not_completion_order() {
        let executor = ConcurrentExecutor::new(None);
        let cancel = CancellationToken::new();

        // Later inputs finish first
        let invocations = (0..5u64).map(|i| async move {
            tokio::time::sleep(Duration::from_millis(100 * (5 - i))).await;
            Ok(i)
        });

        let results = executor.execute_all(&cancel, invocations).await.unwrap();
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failures_stay_at_their_own_position() {
        let executor = ConcurrentExecutor::new(Some(2));
        let cancel = CancellationToken::new();

        let invocations = (0..4u32).map(|i| async move {
            if i == 2 {
                Err(Error::InvalidChunks("bad".to_string()))
            } else {
                Ok(i)
            }
        });

        let results = executor.execute_all(&cancel, invocations).await.unwrap();
        assert_eq!(results.len(), 4);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(Error::InvalidChunks(_))));
        assert_eq!(*results[3].as_ref().unwrap(), 3);
    }

    async fn explode() -> Result<u32> {
        panic!("worker blew up")
    }

    #[tokio::test]
    async fn panicking_invocation_becomes_a_task_error() {
        let executor = ConcurrentExecutor::new(None);
        let cancel = CancellationToken::new();

        let invocations: Vec<BoxFuture<'static, Result<u32>>> = vec![
            async { Ok(1) }.boxed(),
            explode().boxed(),
            async { Ok(3) }.boxed(),
        ];

        let results = executor.execute_all(&cancel, invocations).await.unwrap();
        assert_eq!(*results[0].as_ref().unwrap(), 1);
        match &results[1] {
            Err(Error::Task(err)) => assert!(err.to_string().contains("worker blew up")),
            other => panic!("expected task error, got {other:?}"),
        }
        assert_eq!(*results[2].as_ref().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_budget_bounds_concurrency() {
        let executor = ConcurrentExecutor::new(Some(2));
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let invocations = (0..6).map(|_| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let results = executor.execute_all(&cancel, invocations).await.unwrap();
        assert_eq!(results.len(), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn zero_workers_is_clamped_to_one() {
        let executor = ConcurrentExecutor::new(Some(0));
        assert_eq!(executor.max_workers(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_fills_unfinished_positions() {
        let executor = ConcurrentExecutor::new(Some(1));
        let cancel = CancellationToken::new();
        let started = Arc::new(AtomicUsize::new(0));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let invocations = (0..4u32).map(|i| {
            let started = started.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(i)
            }
        });

        let results = executor.execute_all(&cancel, invocations).await.unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(*results[0].as_ref().unwrap(), 0);
        for result in &results[1..] {
            assert!(matches!(result, Err(Error::Cancelled)));
        }
        // The third invocation never acquired a worker
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn already_cancelled_token_starts_nothing() {
        let executor = ConcurrentExecutor::new(None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Arc::new(AtomicUsize::new(0));

        let invocations = (0..3).map(|_| {
            let started = started.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let results = executor.execute_all(&cancel, invocations).await.unwrap();
        assert!(results.iter().all(|r| matches!(r, Err(Error::Cancelled))));
        tokio::task::yield_now().await;
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disposed_executor_refuses_work() {
        let executor = ConcurrentExecutor::new(Some(4));
        executor.dispose();
        assert!(executor.is_disposed());

        let cancel = CancellationToken::new();
        let result = executor
            .execute_all(&cancel, vec![async { Ok(1) }])
            .await;
        assert!(matches!(result, Err(Error::ExecutorDisposed)));
    }

    #[test]
    fn double_dispose_is_a_no_op() {
        let executor = ConcurrentExecutor::new(Some(1));
        executor.dispose();
        executor.dispose();
        assert!(executor.is_disposed());
    }

    struct Square;

    #[async_trait]
    impl Task<u64, u64> for Square {
        async fn execute(&self, input: u64) -> Result<u64> {
            Ok(input * input)
        }
    }

    #[tokio::test]
    async fn execute_each_binds_the_task_to_every_input() {
        let executor = ConcurrentExecutor::new(Some(3));
        let cancel = CancellationToken::new();

        let results = executor
            .execute_each(&cancel, Arc::new(Square), vec![1, 2, 3, 4])
            .await
            .unwrap();
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![1, 4, 9, 16]);
    }
}
