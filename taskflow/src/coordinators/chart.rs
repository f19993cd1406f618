//! Paired per-tick chart refresh units.

use super::tick::{schedule_tick, TickFn};
use crate::bridge::DeliveryBridge;
use crate::cancellation::{CancelReason, CancellationToken};
use crate::config::ChartConfig;
use crate::core::Priority;
use crate::errors::{SubmitError, TaskOutcome, TaskflowError};
use crate::runtime::{Runtime, SubmitOptions, TaskId, TaskRecord};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Group holding chart refresh units.
pub const CHART_GROUP: &str = "chart.refresh";

type RefreshFn<R> = Arc<dyn Fn(ChartUnit, &CancellationToken) -> anyhow::Result<R> + Send + Sync>;
type ChartListener<R> = Arc<dyn Fn(ChartUnit, TaskOutcome<R>) + Send + Sync>;

/// The two units refreshed on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartUnit {
    /// Symbol information panel.
    Info,
    /// Chart drawing.
    Drawing,
}

impl ChartUnit {
    /// Both units, in submission order.
    pub const ALL: [Self; 2] = [Self::Info, Self::Drawing];

    /// Returns the unit name used for task names and metadata.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Drawing => "drawing",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Info => 0,
            Self::Drawing => 1,
        }
    }
}

impl fmt::Display for ChartUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a refresh did for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitRefresh {
    /// The unit was submitted.
    Submitted(TaskId),
    /// The previous refresh of this unit is still in flight.
    Skipped,
    /// The runtime refused the submission.
    Unavailable(SubmitError),
}

/// Per-unit result of [`ChartCoordinator::trigger_refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    /// Info unit.
    pub info: UnitRefresh,
    /// Drawing unit.
    pub drawing: UnitRefresh,
}

impl RefreshReport {
    /// Returns the number of units submitted.
    #[must_use]
    pub fn submitted(&self) -> usize {
        [&self.info, &self.drawing]
            .into_iter()
            .filter(|unit| matches!(unit, UnitRefresh::Submitted(_)))
            .count()
    }
}

struct ChartState<R> {
    units: [Option<TaskRecord<R>>; 2],
    ticker: Option<CancellationToken>,
}

struct ChartInner<R> {
    runtime: Runtime,
    bridge: Arc<DeliveryBridge>,
    config: ChartConfig,
    refresh: RefreshFn<R>,
    listener: ChartListener<R>,
    state: Mutex<ChartState<R>>,
}

/// Coordinates chart refreshes.
///
/// Each refresh submits an info unit and a drawing unit under one group,
/// each with the configured timeout. Unless forced, a unit whose previous
/// refresh is still in flight is skipped.
pub struct ChartCoordinator<R> {
    inner: Arc<ChartInner<R>>,
}

impl<R> Clone for ChartCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Clone + Send + Sync + 'static> ChartCoordinator<R> {
    /// Creates a coordinator running `refresh` for each unit and reporting
    /// results to `listener`.
    pub fn new<F, L>(
        runtime: Runtime,
        bridge: Arc<DeliveryBridge>,
        config: ChartConfig,
        refresh: F,
        listener: L,
    ) -> Result<Self, TaskflowError>
    where
        F: Fn(ChartUnit, &CancellationToken) -> anyhow::Result<R> + Send + Sync + 'static,
        L: Fn(ChartUnit, TaskOutcome<R>) + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ChartInner {
                runtime,
                bridge,
                config,
                refresh: Arc::new(refresh),
                listener: Arc::new(listener),
                state: Mutex::new(ChartState {
                    units: [None, None],
                    ticker: None,
                }),
            }),
        })
    }

    /// Refreshes both units.
    ///
    /// With `force`, units still in flight are superseded and resubmitted.
    pub fn trigger_refresh(&self, force: bool) -> RefreshReport {
        self.inner.trigger_refresh(force)
    }

    /// Starts periodic refreshes at `interval`, replacing any previous
    /// ticker. A zero interval is ignored.
    pub fn start_ticking(&self, interval: Duration) {
        if interval.is_zero() {
            warn!("Chart ticking not started, interval must be positive");
            return;
        }
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.state.lock().ticker.replace(token.clone()) {
            previous.cancel();
        }
        info!(interval_ms = interval.as_millis() as u64, "Chart ticking started");
        self.inner.arm(&token, interval);
    }

    /// Starts periodic refreshes at the configured tick interval.
    pub fn start_ticking_default(&self) {
        self.start_ticking(self.inner.config.tick_interval());
    }

    /// Stops periodic refreshes. In-flight units are left to finish.
    pub fn stop_ticking(&self) {
        if let Some(token) = self.inner.state.lock().ticker.take() {
            token.cancel();
            info!("Chart ticking stopped");
        }
    }

    /// Returns true while a ticker is armed.
    #[must_use]
    pub fn is_ticking(&self) -> bool {
        self.inner.state.lock().ticker.is_some()
    }

    /// Returns true while the unit's latest refresh is in flight.
    #[must_use]
    pub fn is_busy(&self, unit: ChartUnit) -> bool {
        self.inner.state.lock().units[unit.index()]
            .as_ref()
            .is_some_and(|record| !record.is_terminal())
    }

    /// Cancels in-flight refreshes of both units.
    pub fn cancel(&self) -> usize {
        self.inner.runtime.cancel_group(CHART_GROUP)
    }
}

impl<R: Clone + Send + Sync + 'static> ChartInner<R> {
    fn trigger_refresh(self: &Arc<Self>, force: bool) -> RefreshReport {
        RefreshReport {
            info: self.refresh_unit(ChartUnit::Info, force),
            drawing: self.refresh_unit(ChartUnit::Drawing, force),
        }
    }

    fn refresh_unit(self: &Arc<Self>, unit: ChartUnit, force: bool) -> UnitRefresh {
        let previous = self.state.lock().units[unit.index()].clone();
        if let Some(previous) = previous.filter(|record| !record.is_terminal()) {
            if !force {
                debug!(unit = %unit, "Chart unit still in flight, skipping");
                return UnitRefresh::Skipped;
            }
            previous.info.cancel(CancelReason::Superseded);
        }

        let refresh = Arc::clone(&self.refresh);
        let options = SubmitOptions::in_group(CHART_GROUP)
            .with_name(unit.as_str())
            .with_timeout(self.config.refresh_timeout())
            .with_priority(if force { Priority::User } else { Priority::Autorun })
            .with_metadata("unit", unit.as_str());

        let record = match self.runtime.submit(options, move |token| refresh(unit, token)) {
            Ok(record) => record,
            Err(err) => return UnitRefresh::Unavailable(err),
        };

        let task_id = record.id();
        let handle = record.handle().clone();
        self.state.lock().units[unit.index()] = Some(record);

        let weak: Weak<Self> = Arc::downgrade(self);
        self.bridge.deliver(&handle, move |outcome| {
            if let Some(inner) = weak.upgrade() {
                inner.finished(unit, task_id, outcome);
            }
        });
        UnitRefresh::Submitted(task_id)
    }

    /// Runs on the bridge consumer thread.
    fn finished(&self, unit: ChartUnit, task_id: TaskId, outcome: TaskOutcome<R>) {
        let current = self.state.lock().units[unit.index()]
            .as_ref()
            .is_some_and(|record| record.id() == task_id);
        if !current {
            debug!(unit = %unit, task_id = %task_id, "Discarding superseded chart result");
            return;
        }
        (self.listener)(unit, outcome);
    }

    fn arm(self: &Arc<Self>, token: &CancellationToken, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let chain = token.clone();
        let tick: TickFn = Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.trigger_refresh(false);
                inner.arm(&chain, interval);
            }
        });
        schedule_tick(&self.runtime, &self.bridge, token, interval, tick);
    }
}

impl<R> std::fmt::Debug for ChartCoordinator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ChartCoordinator")
            .field("info", &state.units[0].as_ref().map(|record| record.info.id))
            .field("drawing", &state.units[1].as_ref().map(|record| record.info.id))
            .field("ticking", &state.ticker.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_outcome_timed_out, TestHarness};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    type Seen = Arc<Mutex<Vec<(ChartUnit, TaskOutcome<&'static str>)>>>;

    fn chart(
        harness: &TestHarness,
        config: ChartConfig,
        hold: Arc<AtomicBool>,
    ) -> (ChartCoordinator<&'static str>, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let coordinator = ChartCoordinator::new(
            harness.runtime.clone(),
            Arc::clone(&harness.bridge),
            config,
            move |unit, token: &CancellationToken| {
                while hold.load(Ordering::SeqCst) {
                    token.sleep(Duration::from_millis(5))?;
                }
                Ok(unit.as_str())
            },
            move |unit, outcome| sink.lock().push((unit, outcome)),
        )
        .unwrap();
        (coordinator, seen)
    }

    #[test]
    fn test_refresh_submits_both_units() {
        let harness = TestHarness::new();
        let (chart, seen) = chart(&harness, ChartConfig::new(), Arc::new(AtomicBool::new(false)));

        let report = chart.trigger_refresh(false);
        assert_eq!(report.submitted(), 2);

        assert!(harness.pump_until(|| seen.lock().len() == 2, WAIT));
        let mut seen = seen.lock().clone();
        seen.sort_by_key(|(unit, _)| *unit as u8);
        assert_eq!(
            seen,
            vec![(ChartUnit::Info, Ok("info")), (ChartUnit::Drawing, Ok("drawing"))]
        );
    }

    #[test]
    fn test_skip_if_busy_and_force() {
        let harness = TestHarness::new();
        let hold = Arc::new(AtomicBool::new(true));
        let (chart, seen) = chart(&harness, ChartConfig::new(), Arc::clone(&hold));

        let first = chart.trigger_refresh(false);
        assert_eq!(first.submitted(), 2);
        assert!(chart.is_busy(ChartUnit::Info));

        let skipped = chart.trigger_refresh(false);
        assert_eq!(skipped.info, UnitRefresh::Skipped);
        assert_eq!(skipped.drawing, UnitRefresh::Skipped);

        let forced = chart.trigger_refresh(true);
        assert_eq!(forced.submitted(), 2);

        hold.store(false, Ordering::SeqCst);
        assert!(harness.settle(WAIT));
        assert!(harness.pump_until(|| seen.lock().len() == 2, WAIT));

        // Superseded first-round results are discarded
        assert!(seen.lock().iter().all(|(_, outcome)| outcome.is_ok()));
    }

    #[test]
    fn test_unit_timeout() {
        let harness = TestHarness::new();
        let (chart, seen) = chart(
            &harness,
            ChartConfig::new().with_refresh_timeout(Duration::from_millis(30)),
            Arc::new(AtomicBool::new(true)),
        );

        chart.trigger_refresh(false);
        assert!(harness.pump_until(|| seen.lock().len() == 2, WAIT));
        for (_, outcome) in seen.lock().iter() {
            assert_outcome_timed_out(outcome);
        }
    }

    #[test]
    fn test_ticking() {
        let harness = TestHarness::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let chart = ChartCoordinator::new(
            harness.runtime.clone(),
            Arc::clone(&harness.bridge),
            ChartConfig::new(),
            move |_, _: &CancellationToken| Ok(counter.fetch_add(1, Ordering::SeqCst)),
            |_, _| {},
        )
        .unwrap();

        chart.start_ticking(Duration::from_millis(10));
        assert!(chart.is_ticking());
        assert!(harness.pump_until(|| calls.load(Ordering::SeqCst) >= 4, WAIT));

        chart.stop_ticking();
        assert!(!chart.is_ticking());
        assert!(harness.settle(WAIT));
        let after_stop = calls.load(Ordering::SeqCst);
        harness.pump_for(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_invalid_config_and_zero_interval() {
        let harness = TestHarness::new();
        let invalid = ChartCoordinator::new(
            harness.runtime.clone(),
            Arc::clone(&harness.bridge),
            ChartConfig::new().with_tick_interval(Duration::ZERO),
            |_, _: &CancellationToken| Ok(()),
            |_, _| {},
        );
        assert!(invalid.is_err());

        let (chart, _seen) = chart(&harness, ChartConfig::new(), Arc::new(AtomicBool::new(false)));
        chart.start_ticking(Duration::ZERO);
        assert!(!chart.is_ticking());
    }
}
