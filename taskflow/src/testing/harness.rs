//! Runtime and bridge harness for tests.

use crate::bridge::DeliveryBridge;
use crate::config::{BridgeConfig, RuntimeConfig};
use crate::runtime::Runtime;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pause between drains while pumping.
const PUMP_INTERVAL: Duration = Duration::from_millis(2);

/// A runtime plus a bridge whose consumer is the test thread.
///
/// Coordinators under test deliver through the real bridge; the test pumps
/// it with [`pump_until`](Self::pump_until) exactly as a UI loop would.
/// Dropping the harness force-stops the runtime.
pub struct TestHarness {
    /// The runtime under test.
    pub runtime: Runtime,
    /// The bridge drained by the test thread.
    pub bridge: Arc<DeliveryBridge>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Creates a harness with four workers and fast watcher intervals.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(
            RuntimeConfig::new()
                .with_max_workers(4)
                .with_watcher_interval(Duration::from_millis(5))
                .with_idle_poll_interval(Duration::from_millis(5)),
            BridgeConfig::default(),
        )
    }

    /// Creates a harness from explicit configurations.
    ///
    /// # Panics
    ///
    /// Panics if the runtime or the bridge cannot be built.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_config(runtime: RuntimeConfig, bridge: BridgeConfig) -> Self {
        Self {
            runtime: Runtime::new(runtime).expect("failed to build test runtime"),
            bridge: DeliveryBridge::new(bridge).expect("failed to build test bridge"),
        }
    }

    /// Drains the bridge until `condition` holds or `timeout` elapses.
    ///
    /// Returns whether the condition was met.
    pub fn pump_until(&self, mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.bridge.drain_once();
            if condition() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(PUMP_INTERVAL);
        }
    }

    /// Drains the bridge repeatedly for `duration`.
    pub fn pump_for(&self, duration: Duration) {
        self.pump_until(|| false, duration);
    }

    /// Waits for all groups to go idle, then drains what they delivered.
    pub fn settle(&self, timeout: Duration) -> bool {
        let idle = self.runtime.await_idle(None, Some(timeout));
        self.pump_for(PUMP_INTERVAL * 10);
        idle
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.runtime.shutdown(false, None, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::SubmitOptions;
    use parking_lot::Mutex;

    #[test]
    fn test_pump_delivers_outcome() {
        let harness = TestHarness::new();
        let seen = Arc::new(Mutex::new(None));

        let record = harness
            .runtime
            .submit(SubmitOptions::in_group("g"), |_| Ok(11))
            .unwrap();
        let slot = Arc::clone(&seen);
        harness
            .bridge
            .deliver(record.handle(), move |outcome| *slot.lock() = Some(outcome));

        assert!(harness.pump_until(|| seen.lock().is_some(), Duration::from_secs(5)));
        assert_eq!(*seen.lock(), Some(Ok(11)));
    }

    #[test]
    fn test_pump_until_times_out() {
        let harness = TestHarness::new();
        assert!(!harness.pump_until(|| false, Duration::from_millis(10)));
        assert!(harness.settle(Duration::from_millis(10)));
    }
}
