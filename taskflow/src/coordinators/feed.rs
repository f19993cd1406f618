//! Periodic feed polling with producer-side admission control.

use super::tick::{jittered, schedule_tick, TickFn};
use crate::bridge::DeliveryBridge;
use crate::cancellation::CancellationToken;
use crate::config::FeedConfig;
use crate::core::Priority;
use crate::errors::{SubmitError, TaskOutcome, TaskflowError};
use crate::runtime::{Runtime, SubmitOptions, TaskId, TaskRecord};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Group holding feed polls.
pub const FEED_GROUP: &str = "feed.poll";

type PollFn<R> = Arc<dyn Fn(&CancellationToken) -> anyhow::Result<R> + Send + Sync>;
type FeedListener<R> = Arc<dyn Fn(TaskOutcome<R>) + Send + Sync>;

/// Result of a poll trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A poll was submitted.
    Submitted(TaskId),
    /// A poll is already in flight; nothing was submitted.
    Busy,
    /// The bridge backlog is over the limit; nothing was submitted.
    Backlogged,
    /// The runtime refused the submission.
    Unavailable(SubmitError),
}

struct FeedState<R> {
    /// Parent of every poll token while polling; cancelled by `stop_polling`.
    root: CancellationToken,
    polling: bool,
    listener: Option<FeedListener<R>>,
    active: Option<TaskRecord<R>>,
}

struct FeedInner<R> {
    runtime: Runtime,
    bridge: Arc<DeliveryBridge>,
    config: FeedConfig,
    poll: PollFn<R>,
    state: Mutex<FeedState<R>>,
}

/// Coordinates periodic polling of a data feed.
///
/// One tick chain drives autoruns at the configured interval. Autoruns are
/// skipped while a poll is in flight and dropped while the bridge backlog
/// exceeds the configured limit. Poll results reach the listener on the
/// bridge consumer thread; results of superseded polls are discarded.
pub struct FeedCoordinator<R> {
    inner: Arc<FeedInner<R>>,
}

impl<R> Clone for FeedCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Clone + Send + Sync + 'static> FeedCoordinator<R> {
    /// Creates a coordinator running `poll` for each refresh.
    pub fn new<P>(
        runtime: Runtime,
        bridge: Arc<DeliveryBridge>,
        config: FeedConfig,
        poll: P,
    ) -> Result<Self, TaskflowError>
    where
        P: Fn(&CancellationToken) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(FeedInner {
                runtime,
                bridge,
                config,
                poll: Arc::new(poll),
                state: Mutex::new(FeedState {
                    root: CancellationToken::new(),
                    polling: false,
                    listener: None,
                    active: None,
                }),
            }),
        })
    }

    /// Starts self-rescheduling polling, delivering results to `listener`.
    ///
    /// Restarting replaces the previous chain and listener.
    pub fn start_polling<L>(&self, listener: L)
    where
        L: Fn(TaskOutcome<R>) + Send + Sync + 'static,
    {
        let root = {
            let mut state = self.inner.state.lock();
            state.root.cancel();
            state.root = CancellationToken::new();
            state.polling = true;
            state.listener = Some(Arc::new(listener));
            state.active = None;
            state.root.clone()
        };
        info!(interval_ms = self.inner.config.poll_interval_ms, "Feed polling started");
        self.inner.arm(&root);
    }

    /// Stops the tick chain and cancels any in-flight poll.
    ///
    /// Manual refreshes keep working afterwards under a fresh root.
    pub fn stop_polling(&self) {
        let root = {
            let mut state = self.inner.state.lock();
            state.polling = false;
            state.active = None;
            std::mem::take(&mut state.root)
        };
        root.cancel();
        self.inner.runtime.cancel_group(FEED_GROUP);
        info!("Feed polling stopped");
    }

    /// Returns true between `start_polling` and `stop_polling`.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.inner.state.lock().polling
    }

    /// Runs an automatic poll.
    ///
    /// Skipped while a poll is in flight. Unless `force` is set, dropped
    /// while the bridge backlog exceeds the configured limit.
    pub fn trigger_autorun(&self, force: bool) -> TriggerOutcome {
        self.inner.trigger_autorun(force)
    }

    /// Cancels any in-flight poll and polls at user priority.
    pub fn refresh_now(&self) -> TriggerOutcome {
        let cancelled = self.inner.runtime.cancel_group(FEED_GROUP);
        if cancelled > 0 {
            debug!(cancelled, "Preempted in-flight poll");
        }
        self.inner.submit(Priority::User)
    }

    /// Returns true while a poll is pending or running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.is_busy()
    }
}

impl<R: Clone + Send + Sync + 'static> FeedInner<R> {
    fn is_busy(&self) -> bool {
        self.state
            .lock()
            .active
            .as_ref()
            .is_some_and(|record| !record.is_terminal())
    }

    fn trigger_autorun(self: &Arc<Self>, force: bool) -> TriggerOutcome {
        let backlog = self.bridge.backlog();
        if !force && backlog > self.config.backlog_limit {
            debug!(backlog, limit = self.config.backlog_limit, "Autorun dropped, bridge backlogged");
            return TriggerOutcome::Backlogged;
        }
        if self.is_busy() {
            debug!("Autorun skipped, poll in flight");
            return TriggerOutcome::Busy;
        }
        self.submit(Priority::Autorun)
    }

    fn submit(self: &Arc<Self>, priority: Priority) -> TriggerOutcome {
        let root = self.state.lock().root.clone();
        let poll = Arc::clone(&self.poll);
        let options = SubmitOptions::in_group(FEED_GROUP)
            .with_name("poll")
            .with_parent(&root)
            .with_priority(priority)
            .with_timeout_opt(self.config.poll_timeout());

        let record = match self.runtime.submit(options, move |token| poll(token)) {
            Ok(record) => record,
            Err(err) => return TriggerOutcome::Unavailable(err),
        };

        let task_id = record.id();
        let handle = record.handle().clone();
        self.state.lock().active = Some(record);

        let weak: Weak<Self> = Arc::downgrade(self);
        self.bridge.deliver(&handle, move |outcome| {
            if let Some(inner) = weak.upgrade() {
                inner.finished(task_id, outcome);
            }
        });
        TriggerOutcome::Submitted(task_id)
    }

    /// Runs on the bridge consumer thread.
    fn finished(&self, task_id: TaskId, outcome: TaskOutcome<R>) {
        let listener = {
            let mut state = self.state.lock();
            if !state.active.as_ref().is_some_and(|r| r.id() == task_id) {
                debug!(task_id = %task_id, "Discarding superseded poll result");
                return;
            }
            state.active = None;
            state.listener.clone()
        };
        if let Some(listener) = listener {
            listener(outcome);
        }
    }

    fn arm(self: &Arc<Self>, root: &CancellationToken) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let tick: TickFn = Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.tick();
            }
        });
        let delay = jittered(self.config.poll_interval(), self.config.jitter_ratio);
        schedule_tick(&self.runtime, &self.bridge, root, delay, tick);
    }

    /// Runs on the bridge consumer thread.
    fn tick(self: &Arc<Self>) {
        let root = {
            let state = self.state.lock();
            if !state.polling {
                return;
            }
            state.root.clone()
        };
        self.trigger_autorun(false);
        self.arm(&root);
    }
}

impl<R> std::fmt::Debug for FeedCoordinator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("FeedCoordinator")
            .field("polling", &state.polling)
            .field("active", &state.active.as_ref().map(|record| record.info.id))
            .field("config", &self.inner.config)
            .finish()
    }
}
