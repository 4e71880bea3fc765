//! Demand-driven fetch loop.
//!
//! The dispatcher only asks the store for as many jobs as the hand-off queue
//! has free slots, leases what it gets, and queues it for the workers. It is
//! the only writer of the queue.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use sluice_core::{Job, JobStore, Payload};

use super::handoff::HandoffSender;
use super::resilient::ResilientCall;
use super::stats::SchedulerStats;

pub(crate) struct Dispatcher<T, S: ?Sized> {
    store: Arc<S>,
    resilient: ResilientCall,
    interval: Duration,
    visibility_timeout: Duration,
    stats: Arc<SchedulerStats>,
    _payload: PhantomData<fn() -> T>,
}

impl<T, S> Dispatcher<T, S>
where
    T: Payload,
    S: JobStore<T> + ?Sized,
{
    pub(crate) fn new(
        store: Arc<S>,
        resilient: ResilientCall,
        interval: Duration,
        visibility_timeout: Duration,
        stats: Arc<SchedulerStats>,
    ) -> Self {
        Self {
            store,
            resilient,
            interval,
            visibility_timeout,
            stats,
            _payload: PhantomData,
        }
    }

    /// Fetch and queue jobs until `shutdown` fires.
    ///
    /// Consumes the sender: when this returns the queue is closed for pushes.
    /// Jobs that could not be queued are handed back so their lease can be
    /// cleared.
    pub(crate) async fn run(
        self,
        queue: HandoffSender<T>,
        shutdown: CancellationToken,
    ) -> Vec<Job<T>> {
        let mut undelivered = Vec::new();

        while !shutdown.is_cancelled() {
            let slots = queue.available_slots();
            if slots == 0 {
                self.idle(&shutdown).await;
                continue;
            }

            let jobs = self.fetch(slots).await;
            if jobs.is_empty() {
                self.idle(&shutdown).await;
                continue;
            }

            for job in jobs {
                let Some(job) = self.ensure_leased(job).await else {
                    continue;
                };

                debug!(job_id = %job.id, "dispatching job");
                match queue.push(job).await {
                    Ok(()) => self.stats.record_dispatched(),
                    Err(job) => {
                        error!(job_id = %job.id, "hand-off queue closed, job not dispatched");
                        undelivered.push(job);
                    }
                }
            }
        }

        debug!("dispatcher stopped fetching");
        undelivered
    }

    async fn fetch(&self, slots: usize) -> Vec<Job<T>> {
        let store: &S = &self.store;
        let timeout = self.visibility_timeout;

        // Each attempt asks with a fresh timestamp; a retry may come much later.
        match self
            .resilient
            .call("fetch_pending_jobs", None, || {
                store.fetch_pending_jobs(Utc::now(), slots, timeout)
            })
            .await
        {
            Ok(jobs) => {
                if jobs.len() > slots {
                    warn!(
                        requested = slots,
                        returned = jobs.len(),
                        "store returned more jobs than requested"
                    );
                }
                self.stats.record_fetched(jobs.len());
                jobs
            }
            Err(err) => {
                error!(error = %err, "failed to fetch pending jobs");
                Vec::new()
            }
        }
    }

    /// Apply and persist the lease unless the store already did.
    async fn ensure_leased(&self, mut job: Job<T>) -> Option<Job<T>> {
        let now = Utc::now();
        if job.has_active_lease(now) {
            return Some(job);
        }

        if let Err(err) = job.lease(now, self.visibility_timeout) {
            warn!(job_id = %job.id, error = %err, "store returned a job that cannot be leased");
            return None;
        }

        debug!(job_id = %job.id, "making job invisible");
        let store: &S = &self.store;
        let leased = &job;
        if let Err(err) = self
            .resilient
            .call("update_job", Some(&job.id), || store.update_job(leased))
            .await
        {
            // Dispatch anyway; until the lease is stored the job may be fetched twice.
            error!(job_id = %job.id, error = %err, "failed to persist job lease");
        }

        Some(job)
    }

    async fn idle(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.interval) => {}
        }
    }
}
