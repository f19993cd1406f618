//! # Taskflow
//!
//! A group-scoped background task runtime for desktop-style applications.
//!
//! Taskflow provides:
//!
//! - **Bounded worker pool**: Blocking work runs on a fixed set of pool threads
//! - **Cooperative cancellation**: Hierarchical tokens checked by the work itself
//! - **Task groups**: Named groups that can be cancelled or awaited as a unit
//! - **Timeouts**: Per-task watchers that cancel overdue work
//! - **Delivery bridge**: Completions marshalled onto a single consumer thread
//! - **Coordinators**: Session, feed, chart, I/O and device scheduling policies
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskflow::prelude::*;
//! use std::time::Duration;
//!
//! let runtime = Runtime::new(RuntimeConfig::default())?;
//! let bridge = DeliveryBridge::new(BridgeConfig::default())?;
//!
//! let record = runtime.submit(SubmitOptions::in_group("reports"), |token| {
//!     token.fail_if_cancelled()?;
//!     Ok("done".to_string())
//! })?;
//! bridge.deliver(record.handle(), |outcome| println!("report: {outcome:?}"));
//!
//! // On the consumer thread:
//! while !runtime.is_idle(None) || !bridge.is_empty() {
//!     bridge.drain_once();
//!     std::thread::sleep(Duration::from_millis(10));
//! }
//! runtime.shutdown(true, None, false);
//! # Ok::<(), taskflow::TaskflowError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod bridge;
pub mod cancellation;
pub mod config;
pub mod coordinators;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod runtime;
pub mod testing;
pub mod utils;

pub use errors::{ConfigError, SubmitError, TaskError, TaskOutcome, TaskflowError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bridge::{BridgeMetrics, DeliveryBridge};
    pub use crate::cancellation::{CancelReason, Cancelled, CancellationToken};
    pub use crate::config::{
        BridgeConfig, ChartConfig, DeviceConfig, FeedConfig, LoggingConfig,
        RuntimeConfig, TaskflowConfig,
    };
    pub use crate::coordinators::{
        ChartCoordinator, ChartUnit, DeviceCoordinator, DeviceOp, FeedCoordinator,
        IoCoordinator, IoRequest, SessionCoordinator, SessionStart, TriggerOutcome,
    };
    pub use crate::core::{Priority, TaskStatus};
    pub use crate::errors::{SubmitError, TaskError, TaskOutcome, TaskflowError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::init_logging;
    pub use crate::runtime::{
        Runtime, SubmitOptions, TaskHandle, TaskId, TaskRecord, TaskSummary,
    };
}
