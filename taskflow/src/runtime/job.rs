//! Execution of one submitted unit of work on a pool thread.

use super::record::TaskHandle;
use crate::cancellation::{CancelReason, Cancelled, CancellationToken};
use crate::errors::TaskError;
use crate::utils::panic_message;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Resolves the handle as cancelled by shutdown if the job is dropped
/// without producing an outcome.
pub(crate) struct ResolveOnDrop<T: Send + Sync + 'static> {
    pub(crate) handle: TaskHandle<T>,
}

impl<T: Send + Sync + 'static> Drop for ResolveOnDrop<T> {
    fn drop(&mut self) {
        self.handle
            .finish(Err(TaskError::cancelled(CancelReason::Shutdown)));
    }
}

/// Everything a pool thread needs to run one task.
pub(crate) struct Job<T: Send + Sync + 'static, F> {
    pub(crate) guard: ResolveOnDrop<T>,
    pub(crate) token: CancellationToken,
    pub(crate) timeout: Option<Duration>,
    pub(crate) halted: Arc<AtomicBool>,
    pub(crate) work: F,
}

impl<T, F> Job<T, F>
where
    T: Send + Sync + 'static,
    F: FnOnce(&CancellationToken) -> anyhow::Result<T>,
{
    /// Runs the work and stores its outcome.
    ///
    /// Jobs that were cancelled while queued, whose token is already
    /// cancelled, or that are reached after the pool was closed do not run.
    pub(crate) fn run(self) {
        let Self {
            guard,
            token,
            timeout,
            halted,
            work,
        } = self;
        let handle = &guard.handle;

        if halted.load(Ordering::SeqCst) {
            return;
        }
        if let Err(cancelled) = token.fail_if_cancelled() {
            handle.finish(Err(TaskError::for_reason(cancelled.reason, timeout)));
            return;
        }
        if !handle.try_start() {
            return;
        }

        let outcome = match catch_unwind(AssertUnwindSafe(|| work(&token))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(classify(&err, timeout)),
            Err(payload) => Err(TaskError::failed(format!(
                "panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        handle.finish(outcome);
    }
}

/// Maps an error returned by work to a terminal task error.
fn classify(err: &anyhow::Error, timeout: Option<Duration>) -> TaskError {
    match err.downcast_ref::<Cancelled>() {
        Some(cancelled) => TaskError::for_reason(cancelled.reason, timeout),
        None => TaskError::failed(format!("{err:#}")),
    }
}
