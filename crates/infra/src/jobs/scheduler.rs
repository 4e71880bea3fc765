//! Scheduler: one dispatcher, a fixed pool of workers, graceful shutdown.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sluice_core::{Job, JobId, JobStore, Payload, StoreError};

use crate::config::{ConfigError, SchedulerConfig};

use super::dispatcher::Dispatcher;
use super::handler::JobHandler;
use super::handoff::{self, HandoffReceiver};
use super::resilient::{ResilientCall, RetryObserver};
use super::stats::{SchedulerStats, StatsSnapshot};
use super::worker::Worker;

/// A job whose lease could not be cleared during shutdown.
///
/// The job stays invisible until its lease expires on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to make job {job_id} visible: {error}")]
pub struct ShutdownDegraded {
    pub job_id: JobId,
    pub error: StoreError,
}

/// Outcome of a completed shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Queued jobs whose lease was cleared
    pub released: Vec<JobId>,
    /// Queued jobs left leased
    pub degraded: Vec<ShutdownDegraded>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.degraded.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler task aborted: {0}")]
    Aborted(String),
}

/// Handle to a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    join: JoinHandle<ShutdownReport>,
    stats: Arc<SchedulerStats>,
}

impl SchedulerHandle {
    /// Wait until the shutdown protocol has finished.
    pub async fn wait(self) -> Result<ShutdownReport, SchedulerError> {
        self.join
            .await
            .map_err(|e| SchedulerError::Aborted(e.to_string()))
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Get current scheduler statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// Background job scheduler.
///
/// Fetches ready jobs from a [`JobStore`] only when a worker can take them,
/// leases them for the configured visibility timeout, and runs them through
/// the handler. When the shutdown token fires, queued jobs are made visible
/// again and in-flight jobs are allowed to finish.
pub struct Scheduler<T, S: ?Sized, H> {
    store: Arc<S>,
    handler: Arc<H>,
    config: SchedulerConfig,
    observer: Option<RetryObserver>,
    _payload: std::marker::PhantomData<fn() -> T>,
}

impl<T, S, H> Scheduler<T, S, H>
where
    T: Payload,
    S: JobStore<T> + ?Sized + 'static,
    H: JobHandler<T>,
{
    pub fn new(store: Arc<S>, config: SchedulerConfig, handler: H) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            handler: Arc::new(handler),
            config,
            observer: None,
            _payload: std::marker::PhantomData,
        })
    }

    /// Called on every store retry, in addition to the warning log.
    pub fn with_retry_observer(mut self, observer: RetryObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Start the dispatcher and workers on the current tokio runtime.
    pub fn run(self, shutdown: CancellationToken) -> SchedulerHandle {
        let stats = Arc::new(SchedulerStats::new());
        let join = tokio::spawn(self.serve(shutdown, stats.clone()));
        SchedulerHandle { join, stats }
    }

    async fn serve(self, shutdown: CancellationToken, stats: Arc<SchedulerStats>) -> ShutdownReport {
        let config = &self.config;
        let resilient = ResilientCall::new(config.backoff, shutdown.clone())
            .with_observer(self.observer.clone())
            .with_stats(stats.clone());

        let (sender, receiver) = handoff::channel(config.worker_count);

        let mut workers = Vec::with_capacity(config.worker_count);
        for id in 0..config.worker_count {
            let worker = Worker::new(
                id,
                self.store.clone(),
                self.handler.clone(),
                resilient.clone(),
                shutdown.clone(),
                stats.clone(),
            );
            workers.push(tokio::spawn(worker.run(receiver.clone())));
        }

        info!(
            scheduler = %config.name,
            workers = config.worker_count,
            interval_ms = config.interval.as_millis() as u64,
            visibility_timeout_ms = config.visibility_timeout.as_millis() as u64,
            "scheduler started"
        );

        let dispatcher = Dispatcher::new(
            self.store.clone(),
            resilient.clone(),
            config.interval,
            config.visibility_timeout,
            stats.clone(),
        );
        let undelivered = dispatcher.run(sender, shutdown).await;

        info!(scheduler = %config.name, "shutting down scheduler, making queued jobs visible");
        let report = self.release_queued(&receiver, undelivered, &resilient, &stats).await;
        drop(receiver);

        for (id, worker) in workers.into_iter().enumerate() {
            if let Err(err) = worker.await {
                error!(worker_id = id, error = %err, "worker task failed");
            }
        }

        info!(
            scheduler = %config.name,
            released = report.released.len(),
            degraded = report.degraded.len(),
            "scheduler stopped"
        );
        report
    }

    /// Clear the lease of every job nobody will process.
    async fn release_queued(
        &self,
        receiver: &HandoffReceiver<T>,
        undelivered: Vec<Job<T>>,
        resilient: &ResilientCall,
        stats: &SchedulerStats,
    ) -> ShutdownReport {
        let mut leftovers = receiver.close_and_drain().await;
        leftovers.extend(undelivered);

        let store: &S = &self.store;
        let mut report = ShutdownReport::default();

        for mut job in leftovers {
            job.release_lease();
            let released = &job;
            match resilient
                .call("update_job", Some(&job.id), || store.update_job(released))
                .await
            {
                Ok(()) => {
                    stats.record_released();
                    report.released.push(job.id);
                }
                Err(err) => {
                    let degraded = ShutdownDegraded {
                        job_id: job.id,
                        error: err,
                    };
                    warn!(error = %degraded, "job stays invisible until its lease expires");
                    report.degraded.push(degraded);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::InMemoryJobStore;
    use crate::jobs::JobContext;

    async fn noop(_ctx: JobContext, _job: Job<u32>) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn invalid_config_is_rejected() {
        let store = InMemoryJobStore::<u32>::arc();
        let config = SchedulerConfig::default().with_worker_count(0);

        let result = Scheduler::<u32, _, _>::new(store, config, noop);
        assert!(matches!(result, Err(ConfigError::InvalidValue { key: "worker_count", .. })));
    }

    #[tokio::test]
    async fn stops_immediately_when_already_cancelled() {
        let store = InMemoryJobStore::<u32>::arc();
        store.add_job(Job::with_id("a", 1)).await.unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let scheduler =
            Scheduler::<u32, _, _>::new(store.clone(), SchedulerConfig::default(), noop).unwrap();
        let report = scheduler.run(shutdown).wait().await.unwrap();

        assert!(report.is_clean());
        assert!(report.released.is_empty());
        let job = store.get(&JobId::from("a")).unwrap().unwrap();
        assert_eq!(job.status, sluice_core::JobStatus::Pending);
        assert!(job.visible_after.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_over_a_trait_object_store() {
        let memory = InMemoryJobStore::<u32>::arc();
        memory.add_job(Job::with_id("a", 1)).await.unwrap();
        let store: Arc<dyn JobStore<u32>> = memory.clone();

        let shutdown = CancellationToken::new();
        let config = SchedulerConfig::default().with_interval(std::time::Duration::from_millis(50));
        let handle = Scheduler::<u32, dyn JobStore<u32>, _>::new(store, config, noop)
            .unwrap()
            .run(shutdown.clone());

        while handle.stats().processed() < 1 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle.wait().await.unwrap();

        let job = memory.get(&JobId::from("a")).unwrap().unwrap();
        assert_eq!(job.status, sluice_core::JobStatus::Completed);
    }

    #[test]
    fn degraded_entry_names_the_job() {
        let degraded = ShutdownDegraded {
            job_id: JobId::from("job-7"),
            error: StoreError::unavailable("connection reset"),
        };
        let msg = degraded.to_string();
        assert!(msg.contains("job-7"));
        assert!(msg.contains("connection reset"));
    }
}
