//! Device handshakes: connect, status check and snapshot.

use super::io::{IoCoordinator, IoRequest};
use crate::bridge::DeliveryBridge;
use crate::cancellation::CancellationToken;
use crate::config::DeviceConfig;
use crate::errors::{SubmitError, TaskOutcome};
use crate::runtime::{Runtime, TaskRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The three device operations, each with its own group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceOp {
    /// Establish a connection.
    Connect,
    /// Query connection status.
    CheckStatus,
    /// Fetch a state snapshot.
    Snapshot,
}

impl DeviceOp {
    /// All operations.
    pub const ALL: [Self; 3] = [Self::Connect, Self::CheckStatus, Self::Snapshot];

    /// Returns the group this operation runs in.
    #[must_use]
    pub fn group(&self) -> &'static str {
        match self {
            Self::Connect => "device.connect",
            Self::CheckStatus => "device.status",
            Self::Snapshot => "device.snapshot",
        }
    }

    /// Returns the operation name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::CheckStatus => "check_status",
            Self::Snapshot => "snapshot",
        }
    }

    fn timeout(self, config: &DeviceConfig) -> Option<Duration> {
        match self {
            Self::Connect => config.connect_timeout(),
            Self::CheckStatus => config.status_timeout(),
            Self::Snapshot => config.snapshot_timeout(),
        }
    }
}

impl fmt::Display for DeviceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schedules device handshakes.
///
/// Every submission cancels the previous one of the same operation, so a
/// newer attempt always supersedes a stale one. Payloads are opaque.
#[derive(Debug, Clone)]
pub struct DeviceCoordinator {
    io: IoCoordinator,
    config: DeviceConfig,
}

impl DeviceCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(runtime: Runtime, bridge: Arc<DeliveryBridge>, config: DeviceConfig) -> Self {
        Self {
            io: IoCoordinator::new(runtime, bridge),
            config,
        }
    }

    /// Submits a connection attempt.
    pub fn connect<T, W, D>(&self, worker: W, on_done: D) -> Result<TaskRecord<T>, SubmitError>
    where
        T: Clone + Send + Sync + 'static,
        W: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
        D: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        self.submit(DeviceOp::Connect, worker, on_done)
    }

    /// Submits a status check.
    pub fn check_status<T, W, D>(&self, worker: W, on_done: D) -> Result<TaskRecord<T>, SubmitError>
    where
        T: Clone + Send + Sync + 'static,
        W: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
        D: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        self.submit(DeviceOp::CheckStatus, worker, on_done)
    }

    /// Submits a snapshot request.
    pub fn snapshot<T, W, D>(&self, worker: W, on_done: D) -> Result<TaskRecord<T>, SubmitError>
    where
        T: Clone + Send + Sync + 'static,
        W: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
        D: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        self.submit(DeviceOp::Snapshot, worker, on_done)
    }

    /// Submits `worker` for `op` with cancel-previous semantics.
    pub fn submit<T, W, D>(&self, op: DeviceOp, worker: W, on_done: D) -> Result<TaskRecord<T>, SubmitError>
    where
        T: Clone + Send + Sync + 'static,
        W: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
        D: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        let request = IoRequest::new(op.group())
            .with_name(op.as_str())
            .with_metadata("device_op", op.as_str())
            .cancel_previous(true)
            .with_timeout(op.timeout(&self.config));
        self.io.run(request, worker, on_done)
    }

    /// Cancels all device operations. Returns the number of records cancelled.
    pub fn cancel_all(&self) -> usize {
        DeviceOp::ALL.iter().map(|op| self.io.cancel(op.group())).sum()
    }

    /// Returns true while `op` has work pending or running.
    #[must_use]
    pub fn is_busy(&self, op: DeviceOp) -> bool {
        self.io.is_busy(op.group())
    }
}
