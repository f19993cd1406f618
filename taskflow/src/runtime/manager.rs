//! The task runtime: a bounded worker pool with a group registry.

use super::job::{Job, ResolveOnDrop};
use super::options::SubmitOptions;
use super::record::{TaskHandle, TaskId, TaskInfo, TaskRecord, TaskSummary};
use super::registry::GroupRegistry;
use super::stats::RuntimeStats;
use super::watcher::watch_timeout;
use crate::cancellation::{CancelReason, CancellationToken};
use crate::config::RuntimeConfig;
use crate::core::TaskStatus;
use crate::errors::{SubmitError, TaskError, TaskflowError};
use crate::events::{EventSink, NoOpEventSink};
use crate::observability::{SpanTimer, TaskSpanAttributes};
use crate::utils::{iso_timestamp, panic_message};
use chrono::Utc;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

struct RuntimeInner {
    config: RuntimeConfig,
    pool: RwLock<Option<tokio::runtime::Runtime>>,
    registry: GroupRegistry,
    /// Set once `shutdown` starts; refuses new submissions.
    closed: AtomicBool,
    /// Set when the pool is closed; queued jobs no longer start.
    halted: Arc<AtomicBool>,
    sink: RwLock<Arc<dyn EventSink>>,
    stats: RuntimeStats,
}

impl RuntimeInner {
    fn emit(&self, event_type: &str, mut data: serde_json::Value) {
        if let Some(fields) = data.as_object_mut() {
            fields.insert("timestamp".to_string(), iso_timestamp().into());
        }
        let sink = Arc::clone(&*self.sink.read());
        sink.emit(event_type, Some(data));
    }

    /// Removes a terminal record and reports its outcome.
    fn task_finished(&self, done: &Completed, error: Option<&TaskError>) {
        self.registry.remove(&done.group, done.id);

        let duration_ms = SpanTimer::since(done.name.as_str(), done.submitted_at).finish();
        let attrs = TaskSpanAttributes::new(done.name.as_str(), done.group.as_str())
            .with_task_id(done.id)
            .with_duration_ms(duration_ms);

        match error {
            None => {
                self.stats.record_completed();
                debug!(
                    group = %done.group,
                    task = %done.name,
                    task_id = %done.id,
                    duration_ms,
                    "Task completed"
                );
                self.emit("task.completed", attrs.with_status(TaskStatus::Done).to_payload());
            }
            Some(err @ TaskError::Cancelled { reason }) => {
                self.stats.record_cancelled();
                info!(
                    group = %done.group,
                    task = %done.name,
                    task_id = %done.id,
                    reason = %reason,
                    duration_ms,
                    "Task cancelled"
                );
                self.emit(
                    "task.cancelled",
                    attrs.with_status(TaskStatus::Cancelled).with_error(err).to_payload(),
                );
            }
            Some(err @ TaskError::TimedOut { timeout }) => {
                self.stats.record_timed_out();
                warn!(
                    group = %done.group,
                    task = %done.name,
                    task_id = %done.id,
                    elapsed_ms = duration_ms,
                    timeout_ms = timeout.as_millis() as u64,
                    "Task timed out"
                );
                self.emit(
                    "task.timed_out",
                    attrs.with_status(TaskStatus::Cancelled).with_error(err).to_payload(),
                );
            }
            Some(err @ TaskError::Failed { message }) => {
                self.stats.record_failed();
                error!(
                    group = %done.group,
                    task = %done.name,
                    task_id = %done.id,
                    duration_ms,
                    error = %message,
                    "Task failed"
                );
                self.emit(
                    "task.failed",
                    attrs.with_status(TaskStatus::Failed).with_error(err).to_payload(),
                );
            }
        }
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        self.halted.store(true, Ordering::SeqCst);
        if let Some(pool) = self.pool.get_mut().take() {
            pool.shutdown_background();
        }
    }
}

/// Non-owning runtime handle for futures that live on the runtime's own pool.
#[derive(Clone)]
pub(crate) struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

/// Identity of a finished task, captured for completion bookkeeping.
struct Completed {
    id: TaskId,
    name: String,
    group: String,
    submitted_at: Instant,
}

/// Group-scoped task runtime.
///
/// Work runs on a bounded pool of blocking threads. Each submission gets its
/// own [`CancellationToken`], is tracked in its group until it reaches a
/// terminal state, and may carry a timeout enforced by a watcher.
///
/// Cloning is cheap; clones share the same pool and registry.
///
/// # Example
///
/// ```rust,no_run
/// use taskflow::prelude::*;
/// use std::time::Duration;
///
/// let runtime = Runtime::new(RuntimeConfig::default())?;
/// let record = runtime.submit(
///     SubmitOptions::in_group("reports").with_timeout(Duration::from_secs(5)),
///     |token| {
///         token.sleep(Duration::from_millis(50))?;
///         Ok(42)
///     },
/// )?;
/// assert_eq!(record.handle().wait_outcome(None), Some(Ok(42)));
/// runtime.shutdown(true, None, false);
/// # Ok::<(), taskflow::TaskflowError>(())
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Builds a runtime and its worker pool.
    pub fn new(config: RuntimeConfig) -> Result<Self, TaskflowError> {
        config.validate()?;

        let pool = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.max_workers)
            .thread_name("taskflow-worker")
            .enable_time()
            .build()?;

        info!(max_workers = config.max_workers, "Task runtime started");

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                config,
                pool: RwLock::new(Some(pool)),
                registry: GroupRegistry::new(),
                closed: AtomicBool::new(false),
                halted: Arc::new(AtomicBool::new(false)),
                sink: RwLock::new(Arc::new(NoOpEventSink)),
                stats: RuntimeStats::default(),
            }),
        })
    }

    /// Returns the runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Replaces the event sink.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.inner.sink.write() = sink;
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Creates a fresh root token.
    #[must_use]
    pub fn new_cancel_token(&self) -> CancellationToken {
        CancellationToken::new()
    }

    /// Submits work to the pool and returns its record immediately.
    ///
    /// The task token is derived from the parent in `options`, or created
    /// fresh, and handed to `work`. Work signals cooperative cancellation by
    /// propagating [`Cancelled`](crate::cancellation::Cancelled) with `?`.
    ///
    /// # Errors
    ///
    /// [`SubmitError::EmptyGroup`] for an empty group name and
    /// [`SubmitError::ShutDown`] once shutdown has started.
    pub fn submit<T, F>(&self, options: SubmitOptions, work: F) -> Result<TaskRecord<T>, SubmitError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
    {
        let inner = &self.inner;
        if options.group.is_empty() {
            inner.stats.record_reject();
            return Err(SubmitError::EmptyGroup);
        }

        if inner.closed.load(Ordering::SeqCst) || inner.pool.read().is_none() {
            inner.stats.record_reject();
            debug!(group = %options.group, task = %options.name, "Submission refused after shutdown");
            return Err(SubmitError::ShutDown);
        }

        let SubmitOptions {
            group,
            name,
            parent,
            timeout,
            metadata,
        } = options;
        let token = parent.map_or_else(CancellationToken::new, |parent| parent.derive());
        let handle: TaskHandle<T> = TaskHandle::new(timeout);
        let info = Arc::new(TaskInfo {
            id: TaskId::new(),
            name,
            group,
            metadata,
            created_at: Utc::now(),
            submitted_at: Instant::now(),
            token: token.clone(),
            control: handle.control(),
        });

        let done = Completed {
            id: info.id,
            name: info.name.clone(),
            group: info.group.clone(),
            submitted_at: info.submitted_at,
        };
        let weak: Weak<RuntimeInner> = Arc::downgrade(inner);
        handle.on_done(move |outcome| {
            if let Some(inner) = weak.upgrade() {
                inner.task_finished(&done, outcome.as_ref().err());
            }
        });

        inner.registry.insert(Arc::clone(&info));
        inner.stats.record_submit();
        debug!(group = %info.group, task = %info.name, task_id = %info.id, "Task submitted");
        inner.emit(
            "task.submitted",
            TaskSpanAttributes::new(info.name.as_str(), info.group.as_str())
                .with_task_id(info.id)
                .with_status(TaskStatus::Pending)
                .to_payload(),
        );

        let job = Job {
            guard: ResolveOnDrop {
                handle: handle.clone(),
            },
            token,
            timeout,
            halted: Arc::clone(&inner.halted),
            work,
        };
        // The sink runs without the pool lock held. A pool closed since the
        // check above drops the job, which resolves it as shut down.
        let pool = inner.pool.read();
        if let Some(pool) = pool.as_ref() {
            drop(pool.spawn_blocking(move || job.run()));
            if let Some(timeout) = timeout {
                drop(pool.spawn(watch_timeout(
                    Arc::clone(&info),
                    timeout,
                    inner.config.watcher_interval(),
                )));
            }
        }
        drop(pool);

        Ok(TaskRecord { info, handle })
    }

    /// Cancels every record in a snapshot of `group` taken now.
    ///
    /// Does not wait for the tasks to finish. Records submitted afterwards
    /// are unaffected. Returns the number of records in the snapshot.
    pub fn cancel_group(&self, group: &str) -> usize {
        let snapshot = self.inner.registry.snapshot(Some(group));
        for info in &snapshot {
            info.cancel(CancelReason::Group);
        }

        if !snapshot.is_empty() {
            info!(group = %group, count = snapshot.len(), "Task group cancelled");
            self.inner.emit(
                "group.cancelled",
                serde_json::json!({ "group": group, "count": snapshot.len() }),
            );
        }
        snapshot.len()
    }

    /// Returns true if every record in scope is terminal.
    #[must_use]
    pub fn is_idle(&self, group: Option<&str>) -> bool {
        self.inner
            .registry
            .snapshot(group)
            .iter()
            .all(|info| info.is_terminal())
    }

    /// Polls until the scope is idle or `timeout` elapses.
    ///
    /// Returns false on timeout without touching any task.
    pub fn await_idle(&self, group: Option<&str>, timeout: Option<Duration>) -> bool {
        let interval = self.inner.config.idle_poll_interval();
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.is_idle(group) {
                return true;
            }
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    interval.min(deadline - now)
                }
                None => interval,
            };
            std::thread::sleep(pause);
        }
    }

    /// Stops accepting work and closes the pool.
    ///
    /// With `force`, every outstanding record is cancelled first. With
    /// `wait`, the runtime waits for all groups to go idle (bounded by
    /// `timeout`, or the configured grace period) before closing. Jobs still
    /// queued when the pool closes resolve as cancelled. Only the first call
    /// has any effect.
    pub fn shutdown(&self, wait: bool, timeout: Option<Duration>, force: bool) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let outstanding = inner.registry.snapshot(None);
        info!(
            outstanding = outstanding.len(),
            wait, force, "Shutting down task runtime"
        );
        if force {
            for info in &outstanding {
                info.cancel(CancelReason::Shutdown);
            }
        }

        let grace = timeout.unwrap_or_else(|| inner.config.shutdown_timeout());
        if wait && !self.await_idle(None, Some(grace)) {
            warn!(
                active = inner.registry.len(None),
                grace_ms = grace.as_millis() as u64,
                "Tasks still running after shutdown grace period"
            );
        }

        inner.halted.store(true, Ordering::SeqCst);
        let pool = inner.pool.write().take();
        if let Some(pool) = pool {
            // Blocking on pool threads is not allowed from inside the pool.
            if wait && tokio::runtime::Handle::try_current().is_err() {
                pool.shutdown_timeout(grace);
            } else {
                pool.shutdown_background();
            }
        }

        inner.emit("runtime.shutdown", inner.stats.to_dict());
    }

    /// Returns true once shutdown has started.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Runs `f` on the timer thread after `delay` unless `token` is
    /// cancelled by then.
    ///
    /// Returns false if the runtime is shut down.
    pub fn call_later<F>(&self, delay: Duration, token: &CancellationToken, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let pool = self.inner.pool.read();
        let Some(pool) = pool.as_ref() else {
            return false;
        };
        let token = token.clone();
        drop(pool.spawn(async move {
            tokio::time::sleep(delay).await;
            if token.is_cancelled() {
                return;
            }
            if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
                warn!("Delayed callback panicked: {}", panic_message(payload.as_ref()));
            }
        }));
        true
    }

    /// Returns the number of non-terminal records in scope.
    #[must_use]
    pub fn active_count(&self, group: Option<&str>) -> usize {
        self.inner
            .registry
            .snapshot(group)
            .iter()
            .filter(|info| !info.is_terminal())
            .count()
    }

    /// Returns the names of groups that currently hold records.
    #[must_use]
    pub fn group_names(&self) -> Vec<String> {
        self.inner.registry.group_names()
    }

    /// Returns serialisable summaries of the records in scope.
    #[must_use]
    pub fn snapshot(&self, group: Option<&str>) -> Vec<TaskSummary> {
        self.inner
            .registry
            .snapshot(group)
            .iter()
            .map(|info| info.summary())
            .collect()
    }

    /// Returns the runtime counters.
    #[must_use]
    pub fn stats(&self) -> &RuntimeStats {
        &self.inner.stats
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("max_workers", &self.inner.config.max_workers)
            .field("registry", &self.inner.registry)
            .field("closed", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    fn runtime(max_workers: usize) -> Runtime {
        Runtime::new(
            RuntimeConfig::new()
                .with_max_workers(max_workers)
                .with_watcher_interval(Duration::from_millis(5))
                .with_idle_poll_interval(Duration::from_millis(5)),
        )
        .unwrap()
    }

    fn eventually(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    /// Submits a non-cooperative task that blocks until released.
    fn blocker(runtime: &Runtime, group: &str) -> (TaskRecord<u32>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel::<()>();
        let record = runtime
            .submit(SubmitOptions::in_group(group).with_name("blocker"), move |_| {
                let _ = rx.recv_timeout(Duration::from_secs(5));
                Ok(1)
            })
            .unwrap();
        (record, tx)
    }

    #[test]
    fn test_submit_returns_value() {
        let runtime = runtime(2);
        let record = runtime
            .submit(SubmitOptions::in_group("g").with_name("answer"), |_| Ok(42))
            .unwrap();

        assert_eq!(record.handle().wait_outcome(WAIT), Some(Ok(42)));
        assert_eq!(record.group(), "g");
        assert_eq!(record.name(), "answer");
        assert!(eventually(|| runtime.active_count(None) == 0));
        assert!(eventually(|| runtime.group_names().is_empty()));
        assert!(eventually(|| runtime.stats().completed() == 1));
    }

    #[test]
    fn test_non_cooperative_task_keeps_result() {
        let runtime = runtime(2);
        let (started_tx, started_rx) = mpsc::channel();
        let record = runtime
            .submit(SubmitOptions::new(), move |_| {
                started_tx.send(()).ok();
                std::thread::sleep(Duration::from_millis(50));
                Ok("finished")
            })
            .unwrap();

        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        record.cancel();
        assert!(record.token().is_cancelled());
        assert_eq!(record.handle().wait_outcome(WAIT), Some(Ok("finished")));
    }

    #[test]
    fn test_cancel_group_single_worker() {
        let runtime = runtime(1);
        let (first, release) = blocker(&runtime, "g");
        let second = runtime.submit(SubmitOptions::in_group("g"), |_| Ok(2)).unwrap();
        let third = runtime.submit(SubmitOptions::in_group("g"), |_| Ok(3)).unwrap();

        assert!(eventually(|| first.status() == TaskStatus::Running));
        assert_eq!(runtime.cancel_group("g"), 3);

        let cancelled = Some(Err(TaskError::cancelled(CancelReason::Group)));
        assert_eq!(second.handle().outcome(), cancelled);
        assert_eq!(third.handle().outcome(), cancelled);

        release.send(()).unwrap();
        assert_eq!(first.handle().wait_outcome(WAIT), Some(Ok(1)));
    }

    #[test]
    fn test_cancel_group_is_snapshot() {
        let runtime = runtime(2);
        let early = runtime
            .submit(SubmitOptions::in_group("g"), |token| {
                token.sleep(Duration::from_secs(5))?;
                Ok(0)
            })
            .unwrap();

        assert_eq!(runtime.cancel_group("g"), 1);
        let late = runtime.submit(SubmitOptions::in_group("g"), |_| Ok(1)).unwrap();

        assert!(early.handle().wait(WAIT));
        assert_eq!(early.status(), TaskStatus::Cancelled);
        assert_eq!(late.handle().wait_outcome(WAIT), Some(Ok(1)));
        assert!(!late.token().is_cancelled());
    }

    #[test]
    fn test_cancel_group_leaves_other_groups() {
        let runtime = runtime(2);
        let (other, release) = blocker(&runtime, "other");
        assert_eq!(runtime.cancel_group("g"), 0);
        assert_eq!(runtime.cancel_group("missing"), 0);
        assert!(!other.token().is_cancelled());
        release.send(()).unwrap();
        assert_eq!(other.handle().wait_outcome(WAIT), Some(Ok(1)));
    }

    #[test]
    fn test_await_idle() {
        let runtime = runtime(2);
        let (record, release) = blocker(&runtime, "g");

        assert!(!runtime.is_idle(Some("g")));
        assert!(runtime.is_idle(Some("empty")));
        assert!(!runtime.await_idle(Some("g"), Some(Duration::from_millis(30))));
        assert!(!record.is_terminal());
        assert!(!record.token().is_cancelled());

        release.send(()).unwrap();
        assert!(runtime.await_idle(Some("g"), WAIT));
        assert!(runtime.is_idle(None));
    }

    #[test]
    fn test_timeout_cancels_cooperative_task() {
        let runtime = runtime(2);
        let timeout = Duration::from_millis(50);
        let record = runtime
            .submit(SubmitOptions::new().with_timeout(timeout), |token| {
                token.sleep(Duration::from_secs(5))?;
                Ok(())
            })
            .unwrap();

        assert_eq!(
            record.handle().wait_outcome(WAIT),
            Some(Err(TaskError::TimedOut { timeout }))
        );
        assert_eq!(record.status(), TaskStatus::Cancelled);
        assert_eq!(record.token().reason(), Some(CancelReason::Timeout));
        assert!(eventually(|| runtime.stats().timed_out() == 1));
    }

    #[test]
    fn test_fast_task_leaves_watcher_inert() {
        let runtime = runtime(2);
        let record = runtime
            .submit(SubmitOptions::new().with_timeout(Duration::from_millis(200)), |_| Ok(5))
            .unwrap();

        assert_eq!(record.handle().wait_outcome(WAIT), Some(Ok(5)));
        std::thread::sleep(Duration::from_millis(300));
        assert!(!record.token().is_cancelled());
    }

    #[test]
    fn test_timeout_does_not_stop_non_cooperative_work() {
        let runtime = runtime(2);
        let record = runtime
            .submit(SubmitOptions::new().with_timeout(Duration::from_millis(20)), |_| {
                std::thread::sleep(Duration::from_millis(100));
                Ok("late")
            })
            .unwrap();

        assert_eq!(record.handle().wait_outcome(WAIT), Some(Ok("late")));
        assert!(record.token().is_cancelled());
    }

    #[test]
    fn test_errors_and_panics_become_failures() {
        let runtime = runtime(2);
        let failing = runtime
            .submit(SubmitOptions::new().with_name("failing"), |_| -> anyhow::Result<()> {
                anyhow::bail!("upstream unavailable")
            })
            .unwrap();
        let panicking = runtime
            .submit(SubmitOptions::new().with_name("panicking"), |_| -> anyhow::Result<()> {
                panic!("boom")
            })
            .unwrap();
        let sibling = runtime.submit(SubmitOptions::new(), |_| Ok(9)).unwrap();

        assert_eq!(
            failing.handle().wait_outcome(WAIT),
            Some(Err(TaskError::failed("upstream unavailable")))
        );
        assert_eq!(
            panicking.handle().wait_outcome(WAIT),
            Some(Err(TaskError::failed("panicked: boom")))
        );
        assert_eq!(sibling.handle().wait_outcome(WAIT), Some(Ok(9)));
        assert_eq!(failing.status(), TaskStatus::Failed);
    }

    #[test]
    fn test_parent_token_propagates() {
        let runtime = runtime(2);
        let parent = runtime.new_cancel_token();
        let record = runtime
            .submit(SubmitOptions::new().with_parent(&parent), |token| {
                token.sleep(Duration::from_secs(5))?;
                Ok(())
            })
            .unwrap();

        assert_eq!(record.token().depth(), 1);
        parent.cancel();
        assert_eq!(
            record.handle().wait_outcome(WAIT),
            Some(Err(TaskError::cancelled(CancelReason::User)))
        );
        assert!(parent.derive().derive().fail_if_cancelled().is_err());
    }

    #[test]
    fn test_submit_rejections() {
        let runtime = runtime(1);
        assert_eq!(
            runtime.submit(SubmitOptions::in_group(""), |_| Ok(())).unwrap_err(),
            SubmitError::EmptyGroup
        );

        runtime.shutdown(true, None, false);
        assert!(runtime.is_shut_down());
        assert_eq!(
            runtime.submit(SubmitOptions::new(), |_| Ok(())).unwrap_err(),
            SubmitError::ShutDown
        );
        assert_eq!(runtime.stats().rejected(), 2);
        assert!(!runtime.call_later(Duration::ZERO, &CancellationToken::new(), || {}));
    }

    #[test]
    fn test_forced_shutdown_cancels_outstanding() {
        let runtime = runtime(2);
        let record = runtime
            .submit(SubmitOptions::new(), |token| {
                token.sleep(Duration::from_secs(5))?;
                Ok(())
            })
            .unwrap();

        runtime.shutdown(true, Some(Duration::from_secs(2)), true);
        assert_eq!(
            record.handle().wait_outcome(WAIT),
            Some(Err(TaskError::cancelled(CancelReason::Shutdown)))
        );
    }

    #[test]
    fn test_queued_job_resolves_on_shutdown() {
        let runtime = runtime(1);
        let (first, release) = blocker(&runtime, "g");
        let queued = runtime.submit(SubmitOptions::in_group("g"), |_| Ok(2)).unwrap();
        assert!(eventually(|| first.status() == TaskStatus::Running));

        runtime.shutdown(false, None, false);
        release.send(()).unwrap();

        assert_eq!(first.handle().wait_outcome(WAIT), Some(Ok(1)));
        assert_eq!(
            queued.handle().wait_outcome(WAIT),
            Some(Err(TaskError::cancelled(CancelReason::Shutdown)))
        );
    }

    #[test]
    fn test_events_emitted() {
        let runtime = runtime(1);
        let sink = Arc::new(CollectingEventSink::new());
        runtime.set_event_sink(sink.clone());

        let record = runtime
            .submit(SubmitOptions::in_group("io").with_name("save"), |_| Ok(()))
            .unwrap();
        record.handle().wait(WAIT);
        assert!(eventually(|| sink.events_of_type("task.completed").len() == 1));

        let submitted = sink.events_of_type("task.submitted");
        assert_eq!(submitted.len(), 1);
        let payload = submitted[0].1.clone().unwrap();
        assert_eq!(payload["group"], "io");
        assert_eq!(payload["name"], "save");
        assert!(payload["timestamp"].as_str().is_some_and(|ts| ts.ends_with("+00:00")));
    }

    #[test]
    fn test_snapshot_and_metadata() {
        let runtime = runtime(1);
        let (record, release) = blocker(&runtime, "chart");
        let summaries = runtime.snapshot(Some("chart"));
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, record.id());
        assert_eq!(summaries[0].name, "blocker");
        release.send(()).unwrap();
        record.handle().wait(WAIT);
    }

    #[test]
    fn test_call_later() {
        let runtime = runtime(1);
        let (tx, rx) = mpsc::channel();

        let token = CancellationToken::new();
        let fired = tx.clone();
        assert!(runtime.call_later(Duration::from_millis(10), &token, move || {
            fired.send("fired").ok();
        }));

        let skipped = CancellationToken::new();
        skipped.cancel();
        assert!(runtime.call_later(Duration::from_millis(5), &skipped, move || {
            tx.send("skipped").ok();
        }));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "fired");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    /// Shuts the runtime down from inside the first event it sees.
    struct ShutdownOnEvent {
        runtime: parking_lot::Mutex<Option<Runtime>>,
    }

    impl EventSink for ShutdownOnEvent {
        fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {
            let runtime = self.runtime.lock().take();
            if let Some(runtime) = runtime {
                runtime.shutdown(false, None, false);
            }
        }
    }

    #[test]
    fn test_sink_may_shut_down_during_submit() {
        let runtime = runtime(1);
        runtime.set_event_sink(Arc::new(ShutdownOnEvent {
            runtime: parking_lot::Mutex::new(Some(runtime.clone())),
        }));

        let record = runtime
            .submit(SubmitOptions::in_group("g"), |_| Ok(1))
            .unwrap();

        assert!(runtime.is_shut_down());
        assert_eq!(
            record.handle().wait_outcome(WAIT),
            Some(Err(TaskError::cancelled(CancelReason::Shutdown)))
        );
    }
}
