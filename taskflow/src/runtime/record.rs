//! Task records and the handles that hold their outcome.

use crate::cancellation::{CancelReason, CancellationToken};
use crate::core::{Priority, TaskStatus};
use crate::errors::{TaskError, TaskOutcome};
use crate::utils::panic_message;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

/// Free-form task metadata (priority, symbol, session id, ...).
pub type Metadata = HashMap<String, serde_json::Value>;

type DoneCallback<T> = Box<dyn FnOnce(&TaskOutcome<T>) + Send>;

/// Unique, time-ordered task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub(crate) fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Type-erased view of a handle used by the registry and watchers.
pub(crate) trait HandleControl: Send + Sync {
    fn status(&self) -> TaskStatus;

    /// Requests cancellation. A pending task resolves immediately; a running
    /// one only records the request. Returns true if the task was resolved.
    fn request_cancel(&self, reason: CancelReason) -> bool;
}

struct HandleState<T> {
    status: TaskStatus,
    outcome: Option<Arc<TaskOutcome<T>>>,
    cancel_requested: Option<CancelReason>,
    callbacks: Vec<DoneCallback<T>>,
}

struct HandleShared<T> {
    state: Mutex<HandleState<T>>,
    finished: Condvar,
    timeout: Option<Duration>,
}

impl<T> HandleShared<T> {
    /// Stores the outcome, wakes waiters and runs completion callbacks.
    ///
    /// Callbacks run after the lock is released.
    fn settle(&self, mut state: MutexGuard<'_, HandleState<T>>, outcome: TaskOutcome<T>) {
        state.status = match &outcome {
            Ok(_) => TaskStatus::Done,
            Err(err) => err.status(),
        };
        let outcome = Arc::new(outcome);
        state.outcome = Some(Arc::clone(&outcome));
        let callbacks = std::mem::take(&mut state.callbacks);
        drop(state);

        self.finished.notify_all();
        for callback in callbacks {
            if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(&outcome);
            })) {
                warn!("Task completion callback panicked: {}", panic_message(payload.as_ref()));
            }
        }
    }
}

impl<T: Send + Sync + 'static> HandleControl for HandleShared<T> {
    fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    fn request_cancel(&self, reason: CancelReason) -> bool {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return false;
        }
        state.cancel_requested.get_or_insert(reason);
        if state.status == TaskStatus::Running {
            return false;
        }
        self.settle(state, Err(TaskError::for_reason(reason, self.timeout)));
        true
    }
}

/// Holder of a task's execution state and eventual outcome.
pub struct TaskHandle<T> {
    shared: Arc<HandleShared<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> TaskHandle<T> {
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(HandleShared {
                state: Mutex::new(HandleState {
                    status: TaskStatus::Pending,
                    outcome: None,
                    cancel_requested: None,
                    callbacks: Vec::new(),
                }),
                finished: Condvar::new(),
                timeout,
            }),
        }
    }

    pub(crate) fn control(&self) -> Arc<dyn HandleControl> {
        Arc::clone(&self.shared) as Arc<dyn HandleControl>
    }

    /// Moves a pending task to running. Returns false if it already resolved.
    pub(crate) fn try_start(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.status != TaskStatus::Pending {
            return false;
        }
        state.status = TaskStatus::Running;
        true
    }

    /// Resolves the handle unless it is already terminal.
    pub(crate) fn finish(&self, outcome: TaskOutcome<T>) -> bool {
        let state = self.shared.state.lock();
        if state.status.is_terminal() {
            return false;
        }
        self.shared.settle(state, outcome);
        true
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.shared.state.lock().status
    }

    /// Returns true once the task is done, failed or cancelled.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.shared.state.lock().cancel_requested.is_some()
    }

    /// Requests cancellation of the handle.
    ///
    /// A task that has not started resolves as cancelled and returns true.
    /// A running task keeps running; only the request is recorded.
    pub fn cancel(&self) -> bool {
        self.shared.request_cancel(CancelReason::User)
    }

    /// Registers a callback invoked once with the outcome.
    ///
    /// The callback runs on the thread that completes the task, or
    /// immediately on the caller's thread if the task is already terminal.
    pub fn on_done<F>(&self, callback: F)
    where
        F: FnOnce(&TaskOutcome<T>) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        match state.outcome.clone() {
            Some(outcome) => {
                drop(state);
                callback(&outcome);
            }
            None => state.callbacks.push(Box::new(callback)),
        }
    }

    /// Blocks until the task is terminal or `timeout` elapses.
    ///
    /// Returns true if the task is terminal.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.shared.state.lock();
        let deadline = timeout.map(|t| Instant::now() + t);
        while state.outcome.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.shared.finished.wait_until(&mut state, deadline).timed_out() {
                        return state.outcome.is_some();
                    }
                }
                None => self.shared.finished.wait(&mut state),
            }
        }
        true
    }
}

impl<T: Clone + Send + Sync + 'static> TaskHandle<T> {
    /// Returns a copy of the outcome if the task is terminal.
    #[must_use]
    pub fn outcome(&self) -> Option<TaskOutcome<T>> {
        self.shared.state.lock().outcome.as_deref().cloned()
    }

    /// Waits for the task and returns a copy of its outcome.
    #[must_use]
    pub fn wait_outcome(&self, timeout: Option<Duration>) -> Option<TaskOutcome<T>> {
        if self.wait(timeout) {
            self.outcome()
        } else {
            None
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TaskHandle")
            .field("status", &state.status)
            .field("cancel_requested", &state.cancel_requested)
            .finish()
    }
}

/// Registry-side view of a scheduled task.
pub(crate) struct TaskInfo {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) group: String,
    pub(crate) metadata: Metadata,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) submitted_at: Instant,
    pub(crate) token: CancellationToken,
    pub(crate) control: Arc<dyn HandleControl>,
}

impl TaskInfo {
    pub(crate) fn is_terminal(&self) -> bool {
        self.control.status().is_terminal()
    }

    /// Cancels the token and requests handle cancellation.
    pub(crate) fn cancel(&self, reason: CancelReason) {
        self.token.cancel_with(reason);
        self.control.request_cancel(reason);
    }

    pub(crate) fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            name: self.name.clone(),
            group: self.group.clone(),
            status: self.control.status(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
        }
    }
}

/// One scheduled unit of work.
pub struct TaskRecord<T> {
    pub(crate) info: Arc<TaskInfo>,
    pub(crate) handle: TaskHandle<T>,
}

impl<T> Clone for TaskRecord<T> {
    fn clone(&self) -> Self {
        Self {
            info: Arc::clone(&self.info),
            handle: self.handle.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> TaskRecord<T> {
    /// Returns the task id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.info.id
    }

    /// Returns the execution handle.
    #[must_use]
    pub fn handle(&self) -> &TaskHandle<T> {
        &self.handle
    }

    /// Returns the task's own cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.info.token
    }

    /// Returns the task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Returns the group the task belongs to.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.info.group
    }

    /// Returns the task metadata.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.info.metadata
    }

    /// Returns the priority tag, if one was set.
    #[must_use]
    pub fn priority(&self) -> Option<Priority> {
        self.info
            .metadata
            .get(Priority::METADATA_KEY)
            .and_then(serde_json::Value::as_str)
            .and_then(Priority::parse)
    }

    /// Returns when the task was submitted.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.info.created_at
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.handle.status()
    }

    /// Returns true once the task is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.handle.is_terminal()
    }

    /// Cancels the task's token and requests handle cancellation.
    pub fn cancel(&self) {
        self.info.cancel(CancelReason::User);
    }
}

impl<T> fmt::Debug for TaskRecord<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("group", &self.info.group)
            .field("status", &self.info.control.status())
            .finish()
    }
}

/// Serializable snapshot of a task for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task id.
    pub id: TaskId,
    /// Task name.
    pub name: String,
    /// Group name.
    pub group: String,
    /// Status when the snapshot was taken.
    pub status: TaskStatus,
    /// Task metadata.
    pub metadata: Metadata,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}
