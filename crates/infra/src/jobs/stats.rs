//! Scheduler runtime counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the dispatcher, workers and resilient calls.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    fetched: AtomicU64,
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    released: AtomicU64,
    store_retries: AtomicU64,
}

/// Point-in-time copy of [`SchedulerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub fetched: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub released: u64,
    pub store_retries: u64,
}

impl StatsSnapshot {
    /// Jobs that reached a terminal status.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_fetched(&self, n: usize) {
        self.fetched.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_retry(&self) {
        self.store_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fetched: self.fetched.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            store_retries: self.store_retries.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = SchedulerStats::new();
        stats.record_fetched(3);
        stats.record_dispatched();
        stats.record_dispatched();
        stats.record_completed();
        stats.record_failed();
        stats.record_store_retry();

        let snap = stats.snapshot();
        assert_eq!(snap.fetched, 3);
        assert_eq!(snap.dispatched, 2);
        assert_eq!(snap.processed(), 2);
        assert_eq!(snap.released, 0);
        assert_eq!(snap.store_retries, 1);
    }

    #[test]
    fn snapshot_serializes_as_flat_object() {
        let stats = SchedulerStats::new();
        stats.record_released();

        let value = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(value["released"], 1);
        assert_eq!(value["completed"], 0);
    }
}
