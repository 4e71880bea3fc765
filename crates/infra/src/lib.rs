//! Infrastructure layer: job scheduling, in-memory store, config.

pub mod config;
pub mod jobs;

pub use config::{ConfigError, SchedulerConfig};
pub use jobs::{
    BackoffPolicy, InMemoryJobStore, JobContext, JobHandler, Scheduler, SchedulerError,
    SchedulerHandle, ShutdownDegraded, ShutdownReport,
};
