//! Background job scheduler with leases, retries, and graceful shutdown.
//!
//! ## Design
//!
//! - A single dispatcher fetches only as many jobs as there are free worker slots
//! - Fetched jobs are leased (hidden) for a visibility timeout
//! - Every store call is retried with exponential backoff until shutdown
//! - On shutdown, queued jobs are made visible again and in-flight jobs finish
//!
//! ## Components
//!
//! - `Scheduler`: composes the dispatcher and worker pool
//! - `JobHandler`: user code run for each job
//! - `InMemoryJobStore`: `JobStore` implementation for tests/dev
//! - `ResilientCall`: retry wrapper around store calls

mod dispatcher;
mod worker;

pub mod backoff;
pub mod handler;
pub mod handoff;
pub mod resilient;
pub mod scheduler;
pub mod stats;
pub mod store;

pub use backoff::BackoffPolicy;
pub use handler::{JobContext, JobHandler};
pub use resilient::{ResilientCall, RetryNotice, RetryObserver};
pub use scheduler::{Scheduler, SchedulerError, SchedulerHandle, ShutdownDegraded, ShutdownReport};
pub use stats::{SchedulerStats, StatsSnapshot};
pub use store::{InMemoryJobStore, JobStats};
