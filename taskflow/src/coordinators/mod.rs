//! Feature coordinators built on the runtime and the delivery bridge.
//!
//! Each coordinator owns a policy for one kind of background work:
//! - [`SessionCoordinator`]: one analysis session at a time with queued autoruns
//! - [`FeedCoordinator`]: periodic polling with a backlog guard
//! - [`ChartCoordinator`]: per-unit refreshes that skip while busy
//! - [`IoCoordinator`]: load/save work with optional cancel-previous
//! - [`DeviceCoordinator`]: connect, status and snapshot handshakes
//!
//! Completions are applied on the bridge consumer thread.

mod chart;
mod device;
mod feed;
mod io;
mod session;
mod tick;

pub use chart::{ChartCoordinator, ChartUnit, RefreshReport, UnitRefresh, CHART_GROUP};
pub use device::{DeviceCoordinator, DeviceOp};
pub use feed::{FeedCoordinator, TriggerOutcome, FEED_GROUP};
pub use io::{IoCoordinator, IoRequest};
pub use session::{SessionCoordinator, SessionStart, SessionWork, SESSION_GROUP, UPLOAD_GROUP};
