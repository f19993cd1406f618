//! Span attributes and timing for task execution.

use crate::core::TaskStatus;
use crate::errors::TaskError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Attributes describing one task execution.
///
/// Used both as structured event payloads and as flat string attributes for
/// external tracing backends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSpanAttributes {
    /// Task id.
    pub task_id: Option<String>,
    /// Task name.
    pub name: String,
    /// Group name.
    pub group: String,
    /// Terminal or current status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// Duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    /// Error message if the task did not succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Configured timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl TaskSpanAttributes {
    /// Creates attributes for a task.
    #[must_use]
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            ..Default::default()
        }
    }

    /// Sets the task id.
    #[must_use]
    pub fn with_task_id(mut self, id: impl ToString) -> Self {
        self.task_id = Some(id.to_string());
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Sets the error.
    #[must_use]
    pub fn with_error(mut self, error: &TaskError) -> Self {
        self.error = Some(error.to_string());
        if let TaskError::TimedOut { timeout } = error {
            self.timeout_ms = u64::try_from(timeout.as_millis()).ok();
        }
        self
    }

    /// Converts to a JSON event payload.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Converts to flat string attributes.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();

        attrs.insert("task.name".to_string(), self.name.clone());
        attrs.insert("task.group".to_string(), self.group.clone());

        if let Some(ref v) = self.task_id {
            attrs.insert("task.id".to_string(), v.clone());
        }
        if let Some(v) = self.status {
            attrs.insert("task.status".to_string(), v.to_string());
        }
        if let Some(v) = self.duration_ms {
            attrs.insert("task.duration_ms".to_string(), v.to_string());
        }
        if let Some(ref v) = self.error {
            attrs.insert("task.error".to_string(), v.clone());
        }

        attrs
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Starts a timer from an earlier instant.
    #[must_use]
    pub fn since(name: impl Into<String>, start: Instant) -> Self {
        Self {
            start,
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}
