//! Task runtime: worker pool, group registry and timeout watchers.
//!
//! Work is submitted with [`Runtime::submit`] and tracked in a named group
//! until it is done, failed or cancelled. Cancellation is cooperative: work
//! receives its [`CancellationToken`](crate::cancellation::CancellationToken)
//! and decides where to check it.

mod job;
mod manager;
mod options;
mod record;
mod registry;
mod stats;
mod watcher;

pub use manager::Runtime;
pub(crate) use manager::WeakRuntime;
pub use options::{SubmitOptions, DEFAULT_GROUP, DEFAULT_NAME};
pub use record::{Metadata, TaskHandle, TaskId, TaskRecord, TaskSummary};
pub use stats::RuntimeStats;
