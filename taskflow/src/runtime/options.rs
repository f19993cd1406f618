//! Per-submission options.

use super::record::Metadata;
use crate::cancellation::CancellationToken;
use crate::core::Priority;
use std::time::Duration;

/// Default group for submissions that do not name one.
pub const DEFAULT_GROUP: &str = "default";

/// Default task name.
pub const DEFAULT_NAME: &str = "task";

/// Options accepted by [`Runtime::submit`](super::Runtime::submit).
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub(crate) group: String,
    pub(crate) name: String,
    pub(crate) parent: Option<CancellationToken>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) metadata: Metadata,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
            name: DEFAULT_NAME.to_string(),
            parent: None,
            timeout: None,
            metadata: Metadata::new(),
        }
    }
}

impl SubmitOptions {
    /// Creates options with the default group and name.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options for a group.
    #[must_use]
    pub fn in_group(group: impl Into<String>) -> Self {
        Self::default().with_group(group)
    }

    /// Sets the group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Sets the task name used in logs.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Derives the task token from `parent`.
    #[must_use]
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Sets a timeout enforced by a watcher.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets an optional timeout.
    #[must_use]
    pub fn with_timeout_opt(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merges a metadata map.
    #[must_use]
    pub fn with_metadata_map(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Tags the task with a priority.
    #[must_use]
    pub fn with_priority(self, priority: Priority) -> Self {
        self.with_metadata(Priority::METADATA_KEY, priority.as_str())
    }

    /// Returns the group.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Returns the name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SubmitOptions::new();
        assert_eq!(options.group(), DEFAULT_GROUP);
        assert_eq!(options.name(), DEFAULT_NAME);
        assert!(options.timeout().is_none());
        assert!(options.parent.is_none());
    }

    #[test]
    fn test_builder() {
        let parent = CancellationToken::new();
        let options = SubmitOptions::in_group("feed.poll")
            .with_name("poll")
            .with_parent(&parent)
            .with_timeout(Duration::from_secs(2))
            .with_priority(Priority::Autorun)
            .with_metadata("symbol", "EURUSD");

        assert_eq!(options.group(), "feed.poll");
        assert_eq!(options.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(options.metadata["priority"], "autorun");
        assert_eq!(options.metadata["symbol"], "EURUSD");

        parent.cancel();
        assert!(options.parent.as_ref().is_some_and(CancellationToken::is_cancelled));
    }
}
