//! Lifetime counters for a runtime.

use std::sync::atomic::{AtomicU64, Ordering};

/// Task counters, updated as tasks are submitted and reach terminal states.
#[derive(Debug, Default)]
pub struct RuntimeStats {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    timed_out: AtomicU64,
}

impl RuntimeStats {
    pub(crate) fn record_submit(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reject(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of accepted submissions.
    #[must_use]
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Returns the number of refused submissions.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Returns the number of tasks that produced a value.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Returns the number of tasks that failed.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Returns the number of tasks cancelled for a reason other than timeout.
    #[must_use]
    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns the number of tasks cancelled by their timeout watcher.
    #[must_use]
    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    /// Returns the number of accepted tasks not yet terminal.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.submitted().saturating_sub(
            self.completed() + self.failed() + self.cancelled() + self.timed_out(),
        )
    }

    /// Converts the counters to a dictionary.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "submitted": self.submitted(),
            "rejected": self.rejected(),
            "completed": self.completed(),
            "failed": self.failed(),
            "cancelled": self.cancelled(),
            "timed_out": self.timed_out(),
            "in_flight": self.in_flight(),
        })
    }
}
