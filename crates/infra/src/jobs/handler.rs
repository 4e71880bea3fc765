//! User-supplied job handlers.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use sluice_core::{Job, Payload};

/// Context provided to a handler for one job.
///
/// The core never interrupts a running handler; long-running handlers may
/// poll [`is_cancelled`](Self::is_cancelled) and finish early on their own.
#[derive(Debug, Clone)]
pub struct JobContext {
    worker_id: usize,
    cancellation_token: CancellationToken,
}

impl JobContext {
    pub fn new(worker_id: usize, cancellation_token: CancellationToken) -> Self {
        Self {
            worker_id,
            cancellation_token,
        }
    }

    /// Index of the worker running the job.
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Check if shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

/// Processes one job.
///
/// The handler receives its own copy of the job: changes it makes are never
/// written back. The outcome is the only thing the worker records.
#[async_trait::async_trait]
pub trait JobHandler<T: Payload>: Send + Sync + 'static {
    async fn handle(&self, ctx: JobContext, job: Job<T>) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl<T, F, Fut, E> JobHandler<T> for F
where
    T: Payload,
    F: Fn(JobContext, Job<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext, job: Job<T>) -> anyhow::Result<()> {
        (self)(ctx, job).await.map_err(Into::into)
    }
}
