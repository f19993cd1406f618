//! Event sink system for observability.
//!
//! The runtime reports task lifecycle transitions to an [`EventSink`].
//! Event types emitted:
//!
//! - `task.submitted`, `task.completed`, `task.failed`, `task.cancelled`,
//!   `task.timed_out`
//! - `group.cancelled`
//! - `runtime.shutdown`

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
