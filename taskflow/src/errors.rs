//! Error types for the taskflow runtime.
//!
//! Task-level failures never escape as panics or unwinding: they are captured
//! on the task handle as a [`TaskError`]. Admission failures are returned as
//! [`SubmitError`] so callers must decide what a refused submission means.

use crate::cancellation::{CancelReason, Cancelled};
use crate::core::TaskStatus;
use std::time::Duration;
use thiserror::Error;

/// The main error type for taskflow operations.
#[derive(Debug, Error)]
pub enum TaskflowError {
    /// Configuration was rejected.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A submission was refused.
    #[error("{0}")]
    Submit(#[from] SubmitError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised when a configuration value is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid configuration for '{field}': {message}")]
pub struct ConfigError {
    /// The offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ConfigError {
    /// Creates a new config error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Reasons a submission can be refused by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The runtime has been shut down.
    #[error("runtime is shut down")]
    ShutDown,

    /// The group name was empty.
    #[error("task group name must not be empty")]
    EmptyGroup,
}

/// Terminal error stored on a task handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task observed cancellation or was cancelled before it started.
    #[error("task cancelled ({reason})")]
    Cancelled {
        /// Why the task was cancelled.
        reason: CancelReason,
    },

    /// The timeout watcher cancelled the task.
    #[error("task timed out after {timeout:?}")]
    TimedOut {
        /// The configured timeout.
        timeout: Duration,
    },

    /// The work returned an error or panicked.
    #[error("task failed: {message}")]
    Failed {
        /// Error or panic message.
        message: String,
    },
}

impl TaskError {
    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: CancelReason) -> Self {
        Self::Cancelled { reason }
    }

    /// Creates a work failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Maps a cancel reason to the error recorded on the handle.
    ///
    /// A timeout reason becomes [`TaskError::TimedOut`] when the task carried
    /// a timeout.
    #[must_use]
    pub fn for_reason(reason: CancelReason, timeout: Option<Duration>) -> Self {
        match (reason, timeout) {
            (CancelReason::Timeout, Some(timeout)) => Self::TimedOut { timeout },
            (reason, _) => Self::Cancelled { reason },
        }
    }

    /// Returns true for cancellation and timeout.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::TimedOut { .. })
    }

    /// Returns true for timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Returns the terminal status this error produces.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Cancelled { .. } | Self::TimedOut { .. } => TaskStatus::Cancelled,
            Self::Failed { .. } => TaskStatus::Failed,
        }
    }
}

impl From<Cancelled> for TaskError {
    fn from(err: Cancelled) -> Self {
        Self::Cancelled { reason: err.reason }
    }
}

/// The terminal result of a task.
pub type TaskOutcome<T> = Result<T, TaskError>;
