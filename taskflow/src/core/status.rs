//! Task status and priority enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is queued and has not started.
    Pending,
    /// Task is executing on a pool thread.
    Running,
    /// Task returned a value.
    Done,
    /// Task returned an error or panicked.
    Failed,
    /// Task was cancelled or timed out.
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl TaskStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the task produced a value.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Scheduling priority tag carried in task metadata.
///
/// The runtime does not reorder work by priority; coordinators use the tag
/// to decide preemption and queueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Triggered directly by the user.
    User,
    /// Triggered by an automatic refresh or autorun.
    Autorun,
    /// Housekeeping work.
    Background,
}

impl Priority {
    /// Metadata key under which the priority is stored.
    pub const METADATA_KEY: &'static str = "priority";

    /// Returns the string form used in metadata.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Autorun => "autorun",
            Self::Background => "background",
        }
    }

    /// Parses the metadata string form.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "autorun" => Some(Self::Autorun),
            "background" => Some(Self::Background),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
