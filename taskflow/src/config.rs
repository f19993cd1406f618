//! Configuration types for the runtime, bridge and coordinators.

use crate::errors::{ConfigError, TaskflowError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the worker pool and its watchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum number of pool threads executing work concurrently.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Sampling interval of timeout watchers in milliseconds.
    #[serde(default = "default_watcher_interval_ms")]
    pub watcher_interval_ms: u64,
    /// Polling interval of `await_idle` in milliseconds.
    #[serde(default = "default_idle_poll_interval_ms")]
    pub idle_poll_interval_ms: u64,
    /// Grace period for a waiting shutdown, in seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: f64,
}

fn default_max_workers() -> usize {
    4
}

fn default_watcher_interval_ms() -> u64 {
    50
}

fn default_idle_poll_interval_ms() -> u64 {
    20
}

fn default_shutdown_timeout_secs() -> f64 {
    5.0
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            watcher_interval_ms: default_watcher_interval_ms(),
            idle_poll_interval_ms: default_idle_poll_interval_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl RuntimeConfig {
    /// Creates a new runtime configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pool size.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Sets the watcher sampling interval.
    #[must_use]
    pub fn with_watcher_interval(mut self, interval: Duration) -> Self {
        self.watcher_interval_ms = duration_ms(interval);
        self
    }

    /// Sets the `await_idle` polling interval.
    #[must_use]
    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval_ms = duration_ms(interval);
        self
    }

    /// Gets the watcher interval as Duration.
    #[must_use]
    pub fn watcher_interval(&self) -> Duration {
        Duration::from_millis(self.watcher_interval_ms)
    }

    /// Gets the idle polling interval as Duration.
    #[must_use]
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    /// Gets the shutdown grace period as Duration.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_timeout_secs.max(0.0))
    }

    /// Checks the configuration for invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::new("runtime.max_workers", "must be at least 1"));
        }
        if self.watcher_interval_ms == 0 {
            return Err(ConfigError::new("runtime.watcher_interval_ms", "must be positive"));
        }
        if self.idle_poll_interval_ms == 0 {
            return Err(ConfigError::new("runtime.idle_poll_interval_ms", "must be positive"));
        }
        if !self.shutdown_timeout_secs.is_finite() || self.shutdown_timeout_secs < 0.0 {
            return Err(ConfigError::new(
                "runtime.shutdown_timeout_secs",
                "must be a non-negative number",
            ));
        }
        Ok(())
    }
}

/// Admission thresholds for the delivery bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Backlog depth at which accepted posts log a warning.
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: usize,
    /// Backlog depth at which posts are rejected.
    #[serde(default = "default_drop_threshold")]
    pub drop_threshold: usize,
    /// Minimum seconds between backlog warnings; 0 disables throttling.
    #[serde(default = "default_warn_interval_secs")]
    pub warn_interval_secs: f64,
}

fn default_warn_threshold() -> usize {
    200
}

fn default_drop_threshold() -> usize {
    1000
}

fn default_warn_interval_secs() -> f64 {
    5.0
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            warn_threshold: default_warn_threshold(),
            drop_threshold: default_drop_threshold(),
            warn_interval_secs: default_warn_interval_secs(),
        }
    }
}

impl BridgeConfig {
    /// Creates a new bridge configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets both thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, warn: usize, drop: usize) -> Self {
        self.warn_threshold = warn;
        self.drop_threshold = drop;
        self
    }

    /// Sets the warning interval.
    #[must_use]
    pub fn with_warn_interval(mut self, interval: Duration) -> Self {
        self.warn_interval_secs = interval.as_secs_f64();
        self
    }

    /// Gets the warning interval as Duration.
    #[must_use]
    pub fn warn_interval(&self) -> Duration {
        Duration::from_secs_f64(self.warn_interval_secs.max(0.0))
    }

    /// Checks the configuration for invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drop_threshold == 0 {
            return Err(ConfigError::new("bridge.drop_threshold", "must be positive"));
        }
        if self.warn_threshold > self.drop_threshold {
            return Err(ConfigError::new(
                "bridge.warn_threshold",
                "must not exceed drop_threshold",
            ));
        }
        if !self.warn_interval_secs.is_finite() || self.warn_interval_secs < 0.0 {
            return Err(ConfigError::new(
                "bridge.warn_interval_secs",
                "must be a non-negative number",
            ));
        }
        Ok(())
    }
}

/// Configuration for the periodic feed coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Delay between polls in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bridge backlog above which autoruns are dropped.
    #[serde(default = "default_backlog_limit")]
    pub backlog_limit: usize,
    /// Random extra delay as a fraction of the poll interval.
    #[serde(default)]
    pub jitter_ratio: f64,
    /// Optional per-poll timeout in milliseconds.
    #[serde(default)]
    pub poll_timeout_ms: Option<u64>,
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_backlog_limit() -> usize {
    50
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            backlog_limit: default_backlog_limit(),
            jitter_ratio: 0.0,
            poll_timeout_ms: None,
        }
    }
}

impl FeedConfig {
    /// Creates a new feed configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(interval);
        self
    }

    /// Sets the backlog limit.
    #[must_use]
    pub fn with_backlog_limit(mut self, limit: usize) -> Self {
        self.backlog_limit = limit;
        self
    }

    /// Sets the jitter ratio.
    #[must_use]
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    /// Sets the per-poll timeout.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Gets the poll interval as Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Gets the poll timeout as Duration.
    #[must_use]
    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_ms.map(Duration::from_millis)
    }

    /// Checks the configuration for invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::new("feed.poll_interval_ms", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(ConfigError::new("feed.jitter_ratio", "must be within 0.0..=1.0"));
        }
        Ok(())
    }
}

/// Configuration for the chart refresh coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartConfig {
    /// Timeout applied to each refresh unit in milliseconds.
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
    /// Delay between ticks in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_refresh_timeout_ms() -> u64 {
    3000
}

fn default_tick_interval_ms() -> u64 {
    1000
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            refresh_timeout_ms: default_refresh_timeout_ms(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl ChartConfig {
    /// Creates a new chart configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-unit refresh timeout.
    #[must_use]
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout_ms = duration_ms(timeout);
        self
    }

    /// Sets the tick interval.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = duration_ms(interval);
        self
    }

    /// Gets the refresh timeout as Duration.
    #[must_use]
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    /// Gets the tick interval as Duration.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Checks the configuration for invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_timeout_ms == 0 {
            return Err(ConfigError::new("chart.refresh_timeout_ms", "must be positive"));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::new("chart.tick_interval_ms", "must be positive"));
        }
        Ok(())
    }
}

/// Optional per-operation timeouts for the device coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Connect timeout in milliseconds.
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    /// Status check timeout in milliseconds.
    #[serde(default)]
    pub status_timeout_ms: Option<u64>,
    /// Snapshot timeout in milliseconds.
    #[serde(default)]
    pub snapshot_timeout_ms: Option<u64>,
}

impl DeviceConfig {
    /// Creates a device configuration without timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Sets the status check timeout.
    #[must_use]
    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Sets the snapshot timeout.
    #[must_use]
    pub fn with_snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Gets the connect timeout as Duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Gets the status check timeout as Duration.
    #[must_use]
    pub fn status_timeout(&self) -> Option<Duration> {
        self.status_timeout_ms.map(Duration::from_millis)
    }

    /// Gets the snapshot timeout as Duration.
    #[must_use]
    pub fn snapshot_timeout(&self) -> Option<Duration> {
        self.snapshot_timeout_ms.map(Duration::from_millis)
    }
}

/// Configuration for log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Aggregate configuration for an application using taskflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskflowConfig {
    /// Worker pool configuration.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Delivery bridge configuration.
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Feed coordinator configuration.
    #[serde(default)]
    pub feed: FeedConfig,
    /// Chart coordinator configuration.
    #[serde(default)]
    pub chart: ChartConfig,
    /// Device coordinator configuration.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TaskflowConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, TaskflowError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TaskflowError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runtime.validate()?;
        self.bridge.validate()?;
        self.feed.validate()?;
        self.chart.validate()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
