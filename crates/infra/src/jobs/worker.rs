//! Worker loop: pull, handle, record the outcome.

use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sluice_core::{Job, JobStore, Payload};

use super::handler::{JobContext, JobHandler};
use super::handoff::HandoffReceiver;
use super::resilient::ResilientCall;
use super::stats::SchedulerStats;

pub(crate) struct Worker<T, S: ?Sized, H> {
    id: usize,
    store: Arc<S>,
    handler: Arc<H>,
    resilient: ResilientCall,
    shutdown: CancellationToken,
    stats: Arc<SchedulerStats>,
    _payload: PhantomData<fn() -> T>,
}

impl<T, S, H> Worker<T, S, H>
where
    T: Payload,
    S: JobStore<T> + ?Sized,
    H: JobHandler<T>,
{
    pub(crate) fn new(
        id: usize,
        store: Arc<S>,
        handler: Arc<H>,
        resilient: ResilientCall,
        shutdown: CancellationToken,
        stats: Arc<SchedulerStats>,
    ) -> Self {
        Self {
            id,
            store,
            handler,
            resilient,
            shutdown,
            stats,
            _payload: PhantomData,
        }
    }

    /// Process jobs until the queue is closed and drained.
    pub(crate) async fn run(self, queue: HandoffReceiver<T>) {
        debug!(worker_id = self.id, "worker started");

        while let Some(job) = queue.pull().await {
            self.process(job).await;
        }

        debug!(worker_id = self.id, "worker finished");
    }

    async fn process(&self, mut job: Job<T>) {
        let started = Instant::now();
        debug!(job_id = %job.id, worker_id = self.id, "processing job");

        let ctx = JobContext::new(self.id, self.shutdown.child_token());
        let outcome = AssertUnwindSafe(self.handler.handle(ctx, job.clone()))
            .catch_unwind()
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let now = Utc::now();
        match outcome {
            Ok(Ok(())) => {
                info!(job_id = %job.id, worker_id = self.id, duration_ms, "job completed");
                job.mark_completed(now);
                self.stats.record_completed();
            }
            Ok(Err(err)) => {
                warn!(
                    job_id = %job.id,
                    worker_id = self.id,
                    duration_ms,
                    error = %format!("{err:#}"),
                    "failed to process job"
                );
                job.mark_failed(now);
                self.stats.record_failed();
            }
            Err(panic) => {
                error!(
                    job_id = %job.id,
                    worker_id = self.id,
                    duration_ms,
                    panic = panic_message(panic.as_ref()),
                    "job handler panicked"
                );
                job.mark_failed(now);
                self.stats.record_failed();
            }
        }

        let store: &S = &self.store;
        let finished = &job;
        if let Err(err) = self
            .resilient
            .call("update_job", Some(&job.id), || store.update_job(finished))
            .await
        {
            error!(
                job_id = %job.id,
                status = %job.status,
                error = %err,
                "failed to record job outcome"
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}
