//! Bridge admission and drain metrics.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Metrics for bridge backlog monitoring.
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    /// Number of callbacks accepted by `post`.
    posted: AtomicU64,
    /// Number of callbacks rejected at the drop threshold.
    dropped: AtomicU64,
    /// Number of callbacks executed by drains.
    drained: AtomicU64,
    /// Number of backlog warnings actually logged.
    warnings: AtomicU64,
    /// Number of callbacks that panicked.
    callback_panics: AtomicU64,
    /// Highest backlog observed after a post.
    peak_depth: AtomicUsize,
    last_post_time: RwLock<Option<Instant>>,
    last_drop_time: RwLock<Option<Instant>>,
}

impl BridgeMetrics {
    pub(crate) fn record_post(&self, depth: usize) {
        self.posted.fetch_add(1, Ordering::Relaxed);
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
        *self.last_post_time.write() = Some(Instant::now());
    }

    pub(crate) fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        *self.last_drop_time.write() = Some(Instant::now());
    }

    pub(crate) fn record_drained(&self, count: usize) {
        self.drained.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_warning(&self) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panic(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of accepted posts.
    #[must_use]
    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }

    /// Returns the number of rejected posts.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the number of executed callbacks.
    #[must_use]
    pub fn drained(&self) -> u64 {
        self.drained.load(Ordering::Relaxed)
    }

    /// Returns the number of logged backlog warnings.
    #[must_use]
    pub fn warnings(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }

    /// Returns the number of callbacks that panicked.
    #[must_use]
    pub fn callback_panics(&self) -> u64 {
        self.callback_panics.load(Ordering::Relaxed)
    }

    /// Returns the highest backlog seen.
    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    /// Returns the time of the last accepted post.
    #[must_use]
    pub fn last_post_time(&self) -> Option<Instant> {
        *self.last_post_time.read()
    }

    /// Returns the time of the last rejected post.
    #[must_use]
    pub fn last_drop_time(&self) -> Option<Instant> {
        *self.last_drop_time.read()
    }

    /// Returns the drop rate as a percentage.
    #[must_use]
    pub fn drop_rate(&self) -> f64 {
        let posted = self.posted();
        let dropped = self.dropped();
        let total = posted + dropped;
        if total == 0 {
            0.0
        } else {
            (dropped as f64 / total as f64) * 100.0
        }
    }

    /// Converts metrics to a dictionary.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "posted": self.posted(),
            "dropped": self.dropped(),
            "drained": self.drained(),
            "warnings": self.warnings(),
            "callback_panics": self.callback_panics(),
            "peak_depth": self.peak_depth(),
            "drop_rate_percent": (self.drop_rate() * 100.0).round() / 100.0
        })
    }
}
