//! Generic I/O scheduling with optional cancel-previous semantics.

use crate::bridge::DeliveryBridge;
use crate::cancellation::{CancelReason, CancellationToken};
use crate::errors::{SubmitError, TaskError, TaskOutcome};
use crate::runtime::{Metadata, Runtime, SubmitOptions, TaskRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// One I/O submission.
#[derive(Debug, Clone)]
pub struct IoRequest {
    group: String,
    name: String,
    metadata: Metadata,
    cancel_previous: bool,
    timeout: Option<Duration>,
}

impl IoRequest {
    /// Creates a request in `group`.
    #[must_use]
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: "io".to_string(),
            metadata: Metadata::new(),
            cancel_previous: false,
            timeout: None,
        }
    }

    /// Sets the task name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Cancels everything in the group before submitting.
    #[must_use]
    pub fn cancel_previous(mut self, cancel_previous: bool) -> Self {
        self.cancel_previous = cancel_previous;
        self
    }

    /// Sets an optional timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the group.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }
}

struct IoInner {
    runtime: Runtime,
    bridge: Arc<DeliveryBridge>,
    /// Per-group count of cancel-previous submissions.
    epochs: Mutex<HashMap<String, u64>>,
}

impl IoInner {
    fn epoch(&self, group: &str) -> u64 {
        self.epochs.lock().get(group).copied().unwrap_or(0)
    }

    fn bump_epoch(&self, group: &str) -> u64 {
        let mut epochs = self.epochs.lock();
        let epoch = epochs.entry(group.to_string()).or_insert(0);
        *epoch += 1;
        *epoch
    }
}

/// Coordinates load/save style work on named groups.
///
/// With cancel-previous, a submission cancels its group first. Older work
/// in that group that ends cancelled because of it is reported as
/// [`CancelReason::Superseded`], so the last write wins. Work that finished
/// before the newer submission keeps its own outcome.
#[derive(Clone)]
pub struct IoCoordinator {
    inner: Arc<IoInner>,
}

impl IoCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(runtime: Runtime, bridge: Arc<DeliveryBridge>) -> Self {
        Self {
            inner: Arc::new(IoInner {
                runtime,
                bridge,
                epochs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Submits `worker` and delivers its outcome to `on_done` on the bridge
    /// consumer thread.
    pub fn run<T, W, D>(&self, request: IoRequest, worker: W, on_done: D) -> Result<TaskRecord<T>, SubmitError>
    where
        T: Clone + Send + Sync + 'static,
        W: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
        D: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        let IoRequest {
            group,
            name,
            metadata,
            cancel_previous,
            timeout,
        } = request;

        // Bump before cancelling so records resolved by the cancel already
        // see a newer epoch.
        let epoch = if cancel_previous {
            let epoch = self.inner.bump_epoch(&group);
            let cancelled = self.inner.runtime.cancel_group(&group);
            if cancelled > 0 {
                debug!(group = %group, cancelled, "Cancelled previous I/O work");
            }
            epoch
        } else {
            self.inner.epoch(&group)
        };

        let options = SubmitOptions::in_group(group.as_str())
            .with_name(name)
            .with_metadata_map(metadata)
            .with_timeout_opt(timeout);
        let record = self.inner.runtime.submit(options, worker)?;

        // Sampled on the completing thread, ahead of the delivery post.
        let superseded = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&superseded);
        let weak: Weak<IoInner> = Arc::downgrade(&self.inner);
        let epoch_group = group.clone();
        record.handle().on_done(move |_| {
            if let Some(inner) = weak.upgrade() {
                flag.store(inner.epoch(&epoch_group) != epoch, Ordering::SeqCst);
            }
        });

        self.inner.bridge.deliver(record.handle(), move |outcome| match outcome {
            Err(TaskError::Cancelled {
                reason: CancelReason::Group,
            }) if superseded.load(Ordering::SeqCst) => {
                debug!(group = %group, "Delivering superseded I/O result as cancelled");
                on_done(Err(TaskError::cancelled(CancelReason::Superseded)));
            }
            outcome => on_done(outcome),
        });
        Ok(record)
    }

    /// Cancels all work in `group`.
    pub fn cancel(&self, group: &str) -> usize {
        self.inner.runtime.cancel_group(group)
    }

    /// Returns true while any work in `group` is pending or running.
    #[must_use]
    pub fn is_busy(&self, group: &str) -> bool {
        !self.inner.runtime.is_idle(Some(group))
    }

    /// Returns the underlying runtime.
    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }
}

impl std::fmt::Debug for IoCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoCoordinator")
            .field("epochs", &*self.inner.epochs.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_outcome_cancelled, assert_outcome_failed, assert_outcome_ok, TestHarness};
    use pretty_assertions::assert_eq;

    const WAIT: Duration = Duration::from_secs(5);

    type Seen<T> = Arc<Mutex<Vec<TaskOutcome<T>>>>;

    fn recorder<T: Send + 'static>() -> (Seen<T>, impl Fn() -> Box<dyn FnOnce(TaskOutcome<T>) + Send>) {
        let seen: Seen<T> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let make = move || -> Box<dyn FnOnce(TaskOutcome<T>) + Send> {
            let sink = Arc::clone(&sink);
            Box::new(move |outcome| sink.lock().push(outcome))
        };
        (seen, make)
    }

    #[test]
    fn test_run_delivers_result() {
        let harness = TestHarness::new();
        let io = IoCoordinator::new(harness.runtime.clone(), Arc::clone(&harness.bridge));
        let (seen, on_done) = recorder::<String>();

        let record = io
            .run(
                IoRequest::new("io.settings").with_name("load").with_metadata("path", "settings.json"),
                |_| Ok("loaded".to_string()),
                on_done(),
            )
            .unwrap();
        assert_eq!(record.metadata()["path"], "settings.json");

        assert!(harness.pump_until(|| seen.lock().len() == 1, WAIT));
        assert_eq!(assert_outcome_ok(seen.lock()[0].clone()), "loaded");
        assert!(!io.is_busy("io.settings"));
    }

    #[test]
    fn test_cancel_previous_last_write_wins() {
        let harness = TestHarness::new();
        let io = IoCoordinator::new(harness.runtime.clone(), Arc::clone(&harness.bridge));
        let (seen, on_done) = recorder::<u32>();

        let slow = io
            .run(
                IoRequest::new("io.report").cancel_previous(true),
                |token| {
                    token.sleep(Duration::from_secs(5))?;
                    Ok(1)
                },
                on_done(),
            )
            .unwrap();
        assert!(io.is_busy("io.report"));

        io.run(IoRequest::new("io.report").cancel_previous(true), |_| Ok(2), on_done())
            .unwrap();

        assert!(slow.token().is_cancelled());
        assert!(harness.pump_until(|| seen.lock().len() == 2, WAIT));

        let seen = seen.lock();
        assert!(seen.contains(&Ok(2)));
        let stale = seen.iter().find(|outcome| outcome.is_err()).unwrap();
        assert_outcome_cancelled(stale, CancelReason::Superseded);
    }

    #[test]
    fn test_plain_runs_do_not_supersede_each_other() {
        let harness = TestHarness::new();
        let io = IoCoordinator::new(harness.runtime.clone(), Arc::clone(&harness.bridge));
        let (seen, on_done) = recorder::<u32>();

        io.run(IoRequest::new("io.cache"), |_| Ok(1), on_done()).unwrap();
        io.run(IoRequest::new("io.cache"), |_| Ok(2), on_done()).unwrap();

        assert!(harness.pump_until(|| seen.lock().len() == 2, WAIT));
        let mut values: Vec<u32> = seen.lock().iter().map(|o| o.clone().unwrap()).collect();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn test_cancel_and_failure() {
        let harness = TestHarness::new();
        let io = IoCoordinator::new(harness.runtime.clone(), Arc::clone(&harness.bridge));
        let (seen, on_done) = recorder::<()>();

        io.run(
            IoRequest::new("io.save").with_timeout(Some(Duration::from_secs(5))),
            |token| {
                token.sleep(Duration::from_secs(5))?;
                Ok(())
            },
            on_done(),
        )
        .unwrap();
        assert_eq!(io.cancel("io.save"), 1);
        assert!(harness.pump_until(|| seen.lock().len() == 1, WAIT));
        assert_outcome_cancelled(&seen.lock()[0], CancelReason::Group);

        io.run(
            IoRequest::new("io.save"),
            |_| -> anyhow::Result<()> { anyhow::bail!("permission denied") },
            on_done(),
        )
        .unwrap();
        assert!(harness.pump_until(|| seen.lock().len() == 2, WAIT));
        assert_outcome_failed(&seen.lock()[1], "permission denied");
    }

    #[test]
    fn test_finished_write_keeps_its_result() {
        let harness = TestHarness::new();
        let io = IoCoordinator::new(harness.runtime.clone(), Arc::clone(&harness.bridge));
        let (seen, on_done) = recorder::<u32>();

        let first = io
            .run(IoRequest::new("io.profile").cancel_previous(true), |_| Ok(1), on_done())
            .unwrap();
        assert_eq!(first.handle().wait_outcome(Some(WAIT)), Some(Ok(1)));

        // Newer write lands before the first result is drained
        io.run(IoRequest::new("io.profile").cancel_previous(true), |_| Ok(2), on_done())
            .unwrap();
        assert!(harness.pump_until(|| seen.lock().len() == 2, WAIT));

        let mut values: Vec<u32> = seen.lock().iter().map(|o| o.clone().unwrap()).collect();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn test_plain_cancel_is_not_relabelled() {
        let harness = TestHarness::new();
        let io = IoCoordinator::new(harness.runtime.clone(), Arc::clone(&harness.bridge));
        let (seen, on_done) = recorder::<()>();

        io.run(
            IoRequest::new("io.export").cancel_previous(true),
            |token| {
                token.sleep(Duration::from_secs(5))?;
                Ok(())
            },
            on_done(),
        )
        .unwrap();
        io.cancel("io.export");
        assert!(harness.pump_until(|| seen.lock().len() == 1, WAIT));
        assert_outcome_cancelled(&seen.lock()[0], CancelReason::Group);
    }
}
