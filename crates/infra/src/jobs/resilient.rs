//! Retry wrapper applied to every store call.
//!
//! A failed store call is retried, never the job: in-memory job state is only
//! touched by the caller once the call has gone through. Retries continue
//! until the call succeeds or the shutdown token fires.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use sluice_core::{JobId, StoreError};

use super::backoff::BackoffPolicy;
use super::stats::SchedulerStats;

/// Details of one scheduled retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryNotice {
    /// Store operation being retried (e.g. `"fetch_pending_jobs"`)
    pub operation: &'static str,
    /// Job the call was about, if any
    pub job_id: Option<JobId>,
    /// Retry number, starting at 1
    pub attempt: u32,
    /// Delay before the retry
    pub delay: Duration,
    /// Error that triggered the retry
    pub error: StoreError,
}

/// Callback invoked on every retry, in addition to the log line.
pub type RetryObserver = Arc<dyn Fn(&RetryNotice) + Send + Sync>;

/// Store-call executor with exponential backoff and cancellation.
#[derive(Clone)]
pub struct ResilientCall {
    policy: BackoffPolicy,
    shutdown: CancellationToken,
    observer: Option<RetryObserver>,
    stats: Option<Arc<SchedulerStats>>,
}

impl std::fmt::Debug for ResilientCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientCall")
            .field("policy", &self.policy)
            .field("cancelled", &self.shutdown.is_cancelled())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl ResilientCall {
    pub fn new(policy: BackoffPolicy, shutdown: CancellationToken) -> Self {
        Self {
            policy,
            shutdown,
            observer: None,
            stats: None,
        }
    }

    pub fn with_observer(mut self, observer: Option<RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub(crate) fn with_stats(mut self, stats: Arc<SchedulerStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Run `op` until it succeeds.
    ///
    /// Once the shutdown token has fired no further retries are scheduled:
    /// the call is attempted (at least once) and the last error is returned.
    pub async fn call<R, F, Fut>(
        &self,
        operation: &'static str,
        job_id: Option<&JobId>,
        mut op: F,
    ) -> Result<R, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, StoreError>>,
    {
        let mut attempt = 0u32;

        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if self.shutdown.is_cancelled() {
                return Err(error);
            }

            attempt = attempt.saturating_add(1);
            let delay = self.policy.delay_for_attempt(attempt);

            warn!(
                operation,
                job_id = job_id.map(|id| id.as_str()),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "store call failed, retrying"
            );

            if let Some(stats) = &self.stats {
                stats.record_store_retry();
            }

            if let Some(observer) = &self.observer {
                observer(&RetryNotice {
                    operation,
                    job_id: job_id.cloned(),
                    attempt,
                    delay,
                    error: error.clone(),
                });
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(error),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn recording_observer() -> (RetryObserver, Arc<Mutex<Vec<RetryNotice>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: RetryObserver = Arc::new(move |notice: &RetryNotice| {
            sink.lock().unwrap().push(notice.clone());
        });
        (observer, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_with_growing_delay() {
        let (observer, seen) = recording_observer();
        let call = ResilientCall::new(
            BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(10)),
            CancellationToken::new(),
        )
        .with_observer(Some(observer));

        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = call
            .call("fetch_pending_jobs", None, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StoreError::unavailable("down"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let seen = seen.lock().unwrap();
        let delays: Vec<_> = seen.iter().map(|n| n.delay).collect();
        assert_eq!(
            delays,
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(seen[0].attempt, 1);
        assert_eq!(seen[1].attempt, 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(310), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_retrying_with_last_error() {
        let shutdown = CancellationToken::new();
        let call = ResilientCall::new(BackoffPolicy::fixed(Duration::from_secs(5)), shutdown.clone());

        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            canceller.cancel();
        });

        let calls = AtomicU32::new(0);
        let result: Result<(), _> = call
            .call("update_job", Some(&JobId::from("a")), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(StoreError::storage(format!("failure {n}"))) }
            })
            .await;

        assert_eq!(result, Err(StoreError::storage("failure 2")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_token_means_single_attempt() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let stats = Arc::new(SchedulerStats::new());
        let call = ResilientCall::new(BackoffPolicy::default(), shutdown).with_stats(stats.clone());

        let calls = AtomicU32::new(0);
        let result: Result<(), _> = call
            .call("update_job", None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::unavailable("down")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot().store_retries, 0);
    }

    #[tokio::test]
    async fn success_needs_no_retry() {
        let (observer, seen) = recording_observer();
        let call = ResilientCall::new(BackoffPolicy::default(), CancellationToken::new())
            .with_observer(Some(observer));

        let result = call.call("add_job", None, || async { Ok::<_, StoreError>(7) }).await;

        assert_eq!(result, Ok(7));
        assert!(seen.lock().unwrap().is_empty());
    }
}
