//! Single-consumer delivery queue drained on the UI-owning thread.

use super::metrics::BridgeMetrics;
use crate::cancellation::CancellationToken;
use crate::config::BridgeConfig;
use crate::errors::{TaskOutcome, TaskflowError};
use crate::observability::SpanTimer;
use crate::runtime::TaskHandle;
use crate::utils::panic_message;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

type Callback = Box<dyn FnOnce() + Send>;
type OverflowHook = Arc<dyn Fn(usize) + Send + Sync>;

/// FIFO queue of callbacks executed on a single consumer thread.
///
/// Producers on any thread [`post`](Self::post) callbacks; the consumer runs
/// them with [`drain_once`](Self::drain_once) or [`run`](Self::run). Admission
/// is bounded: posts at or above the drop threshold are rejected, posts at
/// or above the warn threshold are accepted with a rate-limited warning.
pub struct DeliveryBridge {
    config: BridgeConfig,
    queue: Mutex<VecDeque<Callback>>,
    ready: Condvar,
    draining: AtomicBool,
    consumer: Mutex<Option<ThreadId>>,
    last_warning: Mutex<Option<Instant>>,
    overflow_hook: RwLock<Option<OverflowHook>>,
    metrics: BridgeMetrics,
}

/// Clears the draining flag when a drain ends, including by unwinding.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl DeliveryBridge {
    /// Creates a new bridge after validating `config`.
    pub fn new(config: BridgeConfig) -> Result<Arc<Self>, TaskflowError> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            draining: AtomicBool::new(false),
            consumer: Mutex::new(None),
            last_warning: Mutex::new(None),
            overflow_hook: RwLock::new(None),
            metrics: BridgeMetrics::default(),
        }))
    }

    /// Returns the bridge configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Sets the hook invoked with the backlog each time a post is rejected.
    pub fn set_overflow_hook<F>(&self, hook: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        *self.overflow_hook.write() = Some(Arc::new(hook));
    }

    /// Queues a callback for the consumer thread.
    ///
    /// Returns false if the backlog has reached the drop threshold. A
    /// rejection is an expected degraded outcome, not an error.
    pub fn post<F>(&self, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let depth = {
            let mut queue = self.queue.lock();
            let depth = queue.len();
            if depth >= self.config.drop_threshold {
                drop(queue);
                self.reject(depth);
                return false;
            }
            queue.push_back(Box::new(callback));
            depth
        };
        self.ready.notify_one();
        self.metrics.record_post(depth + 1);

        if depth >= self.config.warn_threshold {
            self.warn_backlog(depth);
        }
        true
    }

    fn reject(&self, depth: usize) {
        self.metrics.record_drop();
        error!(
            backlog = depth,
            drop_threshold = self.config.drop_threshold,
            dropped_total = self.metrics.dropped(),
            "Delivery bridge overflow, callback dropped"
        );

        let hook = self.overflow_hook.read().clone();
        if let Some(hook) = hook {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(depth))) {
                warn!("Bridge overflow hook panicked: {}", panic_message(payload.as_ref()));
            }
        }
    }

    fn warn_backlog(&self, depth: usize) {
        let interval = self.config.warn_interval();
        {
            let mut last = self.last_warning.lock();
            let now = Instant::now();
            if !interval.is_zero() && last.is_some_and(|at| now.duration_since(at) < interval) {
                return;
            }
            *last = Some(now);
        }
        self.metrics.record_warning();
        warn!(
            backlog = depth,
            warn_threshold = self.config.warn_threshold,
            drop_threshold = self.config.drop_threshold,
            "Delivery bridge backlog is high"
        );
    }

    /// Runs every callback queued at call time, in FIFO order, on the
    /// calling thread.
    ///
    /// Callbacks posted during the drain run on the next drain. A drain
    /// started while another is in progress, including from inside a
    /// callback, returns 0 without running anything.
    pub fn drain_once(&self) -> usize {
        if self.draining.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let _guard = DrainGuard(&self.draining);
        self.check_consumer();

        let batch = std::mem::take(&mut *self.queue.lock());
        if batch.is_empty() {
            return 0;
        }

        let timer = SpanTimer::start("bridge.drain");
        let count = batch.len();
        for callback in batch {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
                self.metrics.record_panic();
                error!("Bridge callback panicked: {}", panic_message(payload.as_ref()));
            }
        }
        self.metrics.record_drained(count);
        debug!(count, duration_ms = timer.finish(), "Bridge drained");
        count
    }

    fn check_consumer(&self) {
        let current = std::thread::current().id();
        let mut consumer = self.consumer.lock();
        match *consumer {
            None => *consumer = Some(current),
            Some(owner) if owner != current => {
                warn!(
                    consumer = ?owner,
                    caller = ?current,
                    "Bridge drained from a thread other than its consumer"
                );
            }
            Some(_) => {}
        }
    }

    /// Drains repeatedly on the calling thread until `stop` is cancelled.
    ///
    /// Between drains the thread waits up to `idle` for a new post. Returns
    /// the total number of callbacks executed.
    pub fn run(&self, stop: &CancellationToken, idle: Duration) -> usize {
        let mut total = 0;
        while !stop.is_cancelled() {
            total += self.drain_once();
            let mut queue = self.queue.lock();
            if queue.is_empty() && !stop.is_cancelled() {
                self.ready.wait_for(&mut queue, idle);
            }
        }
        total
    }

    /// Marshals a task's outcome onto the consumer thread.
    ///
    /// When `handle` reaches a terminal state a copy of its outcome is
    /// posted and `apply` runs during a later drain. A rejected delivery is
    /// logged and `apply` is dropped.
    pub fn deliver<T, F>(self: &Arc<Self>, handle: &TaskHandle<T>, apply: F)
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        let bridge = Arc::downgrade(self);
        handle.on_done(move |outcome| {
            let Some(bridge) = bridge.upgrade() else {
                return;
            };
            let outcome = outcome.clone();
            if !bridge.post(move || apply(outcome)) {
                warn!(backlog = bridge.backlog(), "Task completion delivery rejected");
            }
        });
    }

    /// Returns the number of queued callbacks.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Returns the bridge metrics.
    #[must_use]
    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }
}

impl std::fmt::Debug for DeliveryBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryBridge")
            .field("backlog", &self.backlog())
            .field("warn_threshold", &self.config.warn_threshold)
            .field("drop_threshold", &self.config.drop_threshold)
            .field("draining", &self.draining.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
