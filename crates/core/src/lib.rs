//! `sluice-core`: job model and storage contract.
//!
//! This crate contains the **pure** building blocks of the dispatcher: the job
//! state machine and the interface a persistence backend has to offer. No
//! runtime, no IO.

pub mod error;
pub mod id;
pub mod job;
pub mod store;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{Job, JobStatus};
pub use store::{JobStore, Payload, StoreError};
