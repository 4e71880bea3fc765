//! Storage contract consumed by the scheduler.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::id::JobId;
use crate::job::Job;

/// Bounds every job payload must satisfy to cross task boundaries.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Clone + Send + Sync + 'static {}

/// Job store abstraction.
///
/// ## Lease Semantics
///
/// `fetch_pending_jobs()` must only return *visible* jobs: `Pending`, due
/// (`process_after <= after`), and with no active lease. Implementations
/// should set `visible_after = after + visibility_timeout` on every returned
/// job as part of the same atomic selection, so that two concurrent fetches
/// never hand out the same job. Stores that cannot do this may return the
/// jobs unleased; the dispatcher then leases and persists them itself.
///
/// All failures are treated as transient by the scheduler and retried.
#[async_trait::async_trait]
pub trait JobStore<T: Payload>: Send + Sync {
    /// Retrieve up to `limit` visible, due jobs.
    async fn fetch_pending_jobs(
        &self,
        after: DateTime<Utc>,
        limit: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<Job<T>>, StoreError>;

    /// Persist `status`, `visible_after` and `processed_at` of an existing job.
    async fn update_job(&self, job: &Job<T>) -> Result<(), StoreError>;

    /// Insert a new job.
    async fn add_job(&self, job: Job<T>) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<T, S> JobStore<T> for Arc<S>
where
    T: Payload,
    S: JobStore<T> + ?Sized,
{
    async fn fetch_pending_jobs(
        &self,
        after: DateTime<Utc>,
        limit: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<Job<T>>, StoreError> {
        (**self)
            .fetch_pending_jobs(after, limit, visibility_timeout)
            .await
    }

    async fn update_job(&self, job: &Job<T>) -> Result<(), StoreError> {
        (**self).update_job(job).await
    }

    async fn add_job(&self, job: Job<T>) -> Result<(), StoreError> {
        (**self).add_job(job).await
    }
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}
