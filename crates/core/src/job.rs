//! Job model and its lease-based state machine.
//!
//! A job stays `Pending` while a worker holds it; the lease (`visible_after`)
//! is what hides it from other fetches. Expiry of the lease alone makes the
//! job eligible again, so a crashed worker never needs an explicit rollback.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to run (possibly leased by a worker)
    Pending,
    /// Reserved for stores that track in-flight work explicitly
    Processing,
    /// Handler succeeded
    Completed,
    /// Handler failed
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled unit of work carrying a typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job<T> {
    /// Unique job ID
    pub id: JobId,
    /// Current status
    pub status: JobStatus,
    /// Earliest time the job may run
    pub process_after: DateTime<Utc>,
    /// Lease expiry; set while a worker holds the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_after: Option<DateTime<Utc>>,
    /// When the job reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// Caller-owned payload
    pub payload: T,
}

impl<T> Job<T> {
    /// Create a pending job that is ready immediately.
    pub fn new(payload: T) -> Self {
        Self::with_id(JobId::new(), payload)
    }

    /// Create a pending job with a caller-chosen identifier.
    pub fn with_id(id: impl Into<JobId>, payload: T) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            process_after: Utc::now(),
            visible_after: None,
            processed_at: None,
            payload,
        }
    }

    /// Schedule the job for a specific time.
    pub fn process_after(mut self, at: DateTime<Utc>) -> Self {
        self.process_after = at;
        self
    }

    /// Schedule the job with a delay from now.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.process_after = offset(Utc::now(), delay);
        self
    }

    /// Whether `process_after` has been reached.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.process_after <= now
    }

    /// Whether a lease is set and has not yet expired.
    pub fn has_active_lease(&self, now: DateTime<Utc>) -> bool {
        self.visible_after.is_some_and(|until| until >= now)
    }

    /// Eligible to be leased: pending with no active lease.
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && !self.has_active_lease(now)
    }

    /// Visible and due.
    pub fn is_fetchable(&self, now: DateTime<Utc>) -> bool {
        self.is_visible(now) && self.is_ready(now)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Hide the job from fetches until `now + timeout`.
    pub fn lease(&mut self, now: DateTime<Utc>, timeout: Duration) -> DomainResult<()> {
        if self.status != JobStatus::Pending {
            return Err(DomainError::invalid_transition(format!(
                "cannot lease job {} in status {}",
                self.id, self.status
            )));
        }
        self.visible_after = Some(offset(now, timeout));
        Ok(())
    }

    /// Clear the lease so the job is immediately visible again.
    ///
    /// Returns `false` when there was no lease to clear.
    pub fn release_lease(&mut self) -> bool {
        self.visible_after.take().is_some()
    }

    /// Mark job as completed.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.processed_at = Some(now);
        self.visible_after = None;
    }

    /// Mark job as failed.
    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.processed_at = Some(now);
        self.visible_after = None;
    }
}

/// `at + delay`, saturating at the maximum representable timestamp.
pub fn offset(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
