//! In-memory job store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use sluice_core::{Job, JobId, JobStatus, JobStore, Payload, StoreError};

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    /// Pending jobs currently held under an unexpired lease
    pub leased: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// In-memory job store for tests/dev.
///
/// Fetch selects and leases under one write lock, so concurrent fetches never
/// return the same job while its lease is active.
#[derive(Debug)]
pub struct InMemoryJobStore<T> {
    jobs: RwLock<HashMap<JobId, Job<T>>>,
}

impl<T> InMemoryJobStore<T> {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, Job<T>>>, StoreError> {
        self.jobs
            .read()
            .map_err(|_| StoreError::storage("job map lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, Job<T>>>, StoreError> {
        self.jobs
            .write()
            .map_err(|_| StoreError::storage("job map lock poisoned"))
    }

    /// Count jobs by status as of `now`.
    pub fn stats(&self, now: DateTime<Utc>) -> Result<JobStats, StoreError> {
        let jobs = self.read()?;
        let mut stats = JobStats::default();

        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => {
                    stats.pending += 1;
                    if job.has_active_lease(now) {
                        stats.leased += 1;
                    }
                }
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}

impl<T: Clone> InMemoryJobStore<T> {
    /// Get a job by ID.
    pub fn get(&self, job_id: &JobId) -> Result<Option<Job<T>>, StoreError> {
        Ok(self.read()?.get(job_id).cloned())
    }

    /// Copy of every job, ordered by `process_after` then id.
    pub fn snapshot(&self) -> Result<Vec<Job<T>>, StoreError> {
        let mut jobs: Vec<_> = self.read()?.values().cloned().collect();
        jobs.sort_by(|a, b| {
            a.process_after
                .cmp(&b.process_after)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(jobs)
    }
}

impl<T> Default for InMemoryJobStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<T: Payload> JobStore<T> for InMemoryJobStore<T> {
    async fn fetch_pending_jobs(
        &self,
        after: DateTime<Utc>,
        limit: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<Job<T>>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut jobs = self.write()?;

        // Oldest due jobs first
        let mut candidates: Vec<(DateTime<Utc>, JobId)> = jobs
            .values()
            .filter(|j| j.is_fetchable(after))
            .map(|j| (j.process_after, j.id.clone()))
            .collect();
        candidates.sort();
        candidates.truncate(limit);

        let mut leased = Vec::with_capacity(candidates.len());
        for (_, id) in candidates {
            if let Some(job) = jobs.get_mut(&id) {
                job.lease(after, visibility_timeout)
                    .map_err(|e| StoreError::storage(e.to_string()))?;
                leased.push(job.clone());
            }
        }

        Ok(leased)
    }

    async fn update_job(&self, job: &Job<T>) -> Result<(), StoreError> {
        let mut jobs = self.write()?;
        let existing = jobs
            .get_mut(&job.id)
            .ok_or_else(|| StoreError::NotFound(job.id.clone()))?;

        existing.status = job.status;
        existing.visible_after = job.visible_after;
        existing.processed_at = job.processed_at;
        Ok(())
    }

    async fn add_job(&self, job: Job<T>) -> Result<(), StoreError> {
        let mut jobs = self.write()?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }
}
