//! Long-running analysis sessions: one active session, one queued autorun.

use crate::bridge::DeliveryBridge;
use crate::cancellation::CancellationToken;
use crate::core::Priority;
use crate::errors::{SubmitError, TaskOutcome};
use crate::runtime::{Runtime, SubmitOptions, TaskId, TaskRecord};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Group holding session work.
pub const SESSION_GROUP: &str = "analysis.session";

/// Group holding sub-work spawned by a session, such as uploads.
pub const UPLOAD_GROUP: &str = "analysis.upload";

/// Work executed for one session.
pub type SessionWork<R> = Box<dyn FnOnce(&CancellationToken) -> anyhow::Result<R> + Send>;

type SessionListener<R> = Arc<dyn Fn(&str, TaskOutcome<R>) + Send + Sync>;

/// Result of asking the coordinator to start a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStart {
    /// The session was submitted.
    Started(TaskId),
    /// Another session is active; this autorun will start when it ends.
    Queued,
    /// Another session is active; nothing was submitted.
    Rejected,
    /// The runtime refused the submission.
    Unavailable(SubmitError),
}

struct ActiveSession<R> {
    id: String,
    token: CancellationToken,
    record: TaskRecord<R>,
}

struct QueuedSession<R> {
    id: String,
    work: SessionWork<R>,
}

struct SessionState<R> {
    active: Option<ActiveSession<R>>,
    queued: Option<QueuedSession<R>>,
    /// Set between a start decision and the submission landing in `active`.
    reserved: bool,
}

impl<R: Send + Sync + 'static> SessionState<R> {
    fn busy(&self) -> bool {
        self.reserved || self.active.as_ref().is_some_and(|a| !a.record.is_terminal())
    }

    /// Claims the slot if it is free.
    fn reserve(&mut self) -> bool {
        if self.busy() {
            return false;
        }
        self.reserved = true;
        true
    }
}

struct SessionInner<R> {
    runtime: Runtime,
    bridge: Arc<DeliveryBridge>,
    listener: SessionListener<R>,
    state: Mutex<SessionState<R>>,
}

/// Coordinates analysis sessions.
///
/// At most one session runs at a time. A user start while busy is
/// rejected; an autorun while busy is queued and started as soon as the
/// active session completes, whether or not its result could be delivered.
/// Results reach the listener on the bridge consumer thread.
pub struct SessionCoordinator<R> {
    inner: Arc<SessionInner<R>>,
}

impl<R> Clone for SessionCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Clone + Send + Sync + 'static> SessionCoordinator<R> {
    /// Creates a coordinator that reports `(session_id, outcome)` to
    /// `listener`.
    #[must_use]
    pub fn new<L>(runtime: Runtime, bridge: Arc<DeliveryBridge>, listener: L) -> Self
    where
        L: Fn(&str, TaskOutcome<R>) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SessionInner {
                runtime,
                bridge,
                listener: Arc::new(listener),
                state: Mutex::new(SessionState {
                    active: None,
                    queued: None,
                    reserved: false,
                }),
            }),
        }
    }

    /// Starts a session at user priority unless one is already running.
    pub fn start_session<F>(&self, id: impl Into<String>, work: F) -> SessionStart
    where
        F: FnOnce(&CancellationToken) -> anyhow::Result<R> + Send + 'static,
    {
        let id = id.into();
        if !self.inner.state.lock().reserve() {
            info!(session_id = %id, "Session start rejected, another session is active");
            return SessionStart::Rejected;
        }
        self.inner.launch(id, Box::new(work), Priority::User)
    }

    /// Starts a session at autorun priority, or queues it if busy.
    ///
    /// A newer queued autorun replaces an older one.
    pub fn enqueue_autorun<F>(&self, id: impl Into<String>, work: F) -> SessionStart
    where
        F: FnOnce(&CancellationToken) -> anyhow::Result<R> + Send + 'static,
    {
        let id = id.into();
        {
            let mut state = self.inner.state.lock();
            if !state.reserve() {
                if let Some(replaced) = state.queued.replace(QueuedSession {
                    id: id.clone(),
                    work: Box::new(work),
                }) {
                    debug!(session_id = %replaced.id, "Queued autorun replaced");
                }
                info!(session_id = %id, "Autorun queued behind active session");
                return SessionStart::Queued;
            }
        }
        self.inner.launch(id, Box::new(work), Priority::Autorun)
    }

    /// Stops a session.
    ///
    /// For the active session this cancels its token and both the session
    /// and upload groups. A queued autorun with this id is dropped. Returns
    /// false if the id is unknown.
    pub fn stop_session(&self, id: &str) -> bool {
        let (token, dequeued) = {
            let mut state = self.inner.state.lock();
            let token = state
                .active
                .as_ref()
                .filter(|active| active.id == id)
                .map(|active| active.token.clone());
            let dequeued = state.queued.as_ref().is_some_and(|q| q.id == id);
            if dequeued {
                state.queued = None;
            }
            (token, dequeued)
        };

        if let Some(token) = &token {
            token.cancel();
            let sessions = self.inner.runtime.cancel_group(SESSION_GROUP);
            let uploads = self.inner.runtime.cancel_group(UPLOAD_GROUP);
            info!(session_id = %id, sessions, uploads, "Session stopped");
        }
        token.is_some() || dequeued
    }

    /// Submits sub-work for the active session in the upload group.
    ///
    /// The work's token derives from the active session's token, so stopping
    /// the session stops its uploads too.
    pub fn submit_upload<U, F>(&self, name: &str, work: F) -> Result<TaskRecord<U>, SubmitError>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&CancellationToken) -> anyhow::Result<U> + Send + 'static,
    {
        let parent = self
            .inner
            .state
            .lock()
            .active
            .as_ref()
            .map(|active| active.token.clone());
        let mut options = SubmitOptions::in_group(UPLOAD_GROUP).with_name(name);
        if let Some(parent) = &parent {
            options = options.with_parent(parent);
        }
        self.inner.runtime.submit(options, work)
    }

    /// Returns the id of the active session while it is non-terminal.
    #[must_use]
    pub fn active_session(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .active
            .as_ref()
            .filter(|active| !active.record.is_terminal())
            .map(|active| active.id.clone())
    }

    /// Returns the id of the queued autorun.
    #[must_use]
    pub fn queued_session(&self) -> Option<String> {
        self.inner.state.lock().queued.as_ref().map(|q| q.id.clone())
    }

    /// Returns true while a session is pending or running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.state.lock().busy()
    }
}

impl<R: Clone + Send + Sync + 'static> SessionInner<R> {
    /// Submits a session. The caller must hold the reservation.
    fn launch(self: &Arc<Self>, id: String, work: SessionWork<R>, priority: Priority) -> SessionStart {
        let token = CancellationToken::new();
        let options = SubmitOptions::in_group(SESSION_GROUP)
            .with_name(format!("session:{id}"))
            .with_parent(&token)
            .with_priority(priority)
            .with_metadata("session_id", id.as_str());

        let record = match self.runtime.submit(options, work) {
            Ok(record) => record,
            Err(err) => {
                info!(session_id = %id, error = %err, "Session submission refused");
                self.state.lock().reserved = false;
                self.promote_queued();
                return SessionStart::Unavailable(err);
            }
        };

        let task_id = record.id();
        let handle = record.handle().clone();
        info!(session_id = %id, task_id = %task_id, priority = %priority, "Session started");
        {
            let mut state = self.state.lock();
            state.active = Some(ActiveSession {
                id: id.clone(),
                token,
                record,
            });
            state.reserved = false;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        self.bridge.deliver(&handle, move |outcome| {
            if let Some(inner) = weak.upgrade() {
                (inner.listener)(&id, outcome);
            }
        });

        // Registered after the delivery hook so a promoted autorun's result
        // is posted behind this one.
        let weak: Weak<Self> = Arc::downgrade(self);
        handle.on_done(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.completed(task_id);
            }
        });
        SessionStart::Started(task_id)
    }

    /// Runs on the thread that completed the session.
    fn completed(self: &Arc<Self>, task_id: TaskId) {
        {
            let mut state = self.state.lock();
            if state.active.as_ref().is_some_and(|a| a.record.id() == task_id) {
                state.active = None;
            }
        }
        self.promote_queued();
    }

    fn promote_queued(self: &Arc<Self>) {
        let next = {
            let mut state = self.state.lock();
            if state.queued.is_some() && state.reserve() {
                state.queued.take()
            } else {
                None
            }
        };
        if let Some(queued) = next {
            debug!(session_id = %queued.id, "Promoting queued autorun");
            self.launch(queued.id, queued.work, Priority::Autorun);
        }
    }
}

impl<R> std::fmt::Debug for SessionCoordinator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SessionCoordinator")
            .field("active", &state.active.as_ref().map(|a| a.id.as_str()))
            .field("queued", &state.queued.as_ref().map(|q| q.id.as_str()))
            .field("reserved", &state.reserved)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancelReason;
    use crate::errors::TaskError;
    use crate::config::{BridgeConfig, RuntimeConfig};
    use crate::testing::TestHarness;
    use pretty_assertions::assert_eq;
    use std::sync::{mpsc, Barrier};
    use std::time::{Duration, Instant};

    const WAIT: Duration = Duration::from_secs(5);

    type Log = Arc<Mutex<Vec<(String, TaskOutcome<u32>)>>>;

    fn coordinator(harness: &TestHarness) -> (SessionCoordinator<u32>, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let coordinator = SessionCoordinator::new(
            harness.runtime.clone(),
            Arc::clone(&harness.bridge),
            move |id: &str, outcome| sink.lock().push((id.to_string(), outcome)),
        );
        (coordinator, log)
    }

    /// Session work that waits for a release or cancellation.
    fn gated(
        value: u32,
    ) -> (
        impl FnOnce(&CancellationToken) -> anyhow::Result<u32> + Send + 'static,
        mpsc::Sender<()>,
    ) {
        let (tx, rx) = mpsc::channel::<()>();
        let work = move |token: &CancellationToken| {
            while rx.try_recv().is_err() {
                token.sleep(Duration::from_millis(5))?;
            }
            Ok(value)
        };
        (work, tx)
    }

    #[test]
    fn test_session_completes_and_clears() {
        let harness = TestHarness::new();
        let (sessions, log) = coordinator(&harness);

        let start = sessions.start_session("s1", |_| Ok(7));
        assert!(matches!(start, SessionStart::Started(_)));

        assert!(harness.pump_until(|| log.lock().len() == 1, WAIT));
        assert_eq!(log.lock()[0], ("s1".to_string(), Ok(7)));
        assert!(!sessions.is_busy());
        assert_eq!(sessions.active_session(), None);
    }

    #[test]
    fn test_second_start_is_rejected_without_touching_first() {
        let harness = TestHarness::new();
        let (sessions, log) = coordinator(&harness);
        let (work, release) = gated(1);

        assert!(matches!(sessions.start_session("first", work), SessionStart::Started(_)));
        assert_eq!(sessions.start_session("second", |_| Ok(2)), SessionStart::Rejected);
        assert_eq!(sessions.active_session(), Some("first".to_string()));

        release.send(()).unwrap();
        assert!(harness.pump_until(|| log.lock().len() == 1, WAIT));
        assert_eq!(log.lock()[0], ("first".to_string(), Ok(1)));
    }

    #[test]
    fn test_autorun_queued_then_promoted() {
        let harness = TestHarness::new();
        let (sessions, log) = coordinator(&harness);
        let (work, release) = gated(1);

        sessions.start_session("manual", work);
        assert_eq!(sessions.enqueue_autorun("auto", |_| Ok(2)), SessionStart::Queued);
        assert_eq!(sessions.queued_session(), Some("auto".to_string()));

        release.send(()).unwrap();
        assert!(harness.pump_until(|| log.lock().len() == 2, WAIT));

        let log = log.lock();
        assert_eq!(log[0], ("manual".to_string(), Ok(1)));
        assert_eq!(log[1], ("auto".to_string(), Ok(2)));
        assert_eq!(sessions.queued_session(), None);
    }

    #[test]
    fn test_autorun_starts_when_idle() {
        let harness = TestHarness::new();
        let (sessions, _log) = coordinator(&harness);
        let (work, _release) = gated(3);

        let task_id = match sessions.enqueue_autorun("auto", work) {
            SessionStart::Started(task_id) => task_id,
            other => panic!("expected start, got {other:?}"),
        };

        let summaries = harness.runtime.snapshot(Some(SESSION_GROUP));
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, task_id);
        assert_eq!(summaries[0].metadata["priority"], "autorun");
        assert_eq!(summaries[0].metadata["session_id"], "auto");
    }

    #[test]
    fn test_stop_session_cancels_uploads() {
        let harness = TestHarness::new();
        let (sessions, log) = coordinator(&harness);
        let (work, _release) = gated(1);
        sessions.start_session("s1", work);

        let upload = sessions
            .submit_upload("upload:chart.png", |token: &CancellationToken| {
                token.sleep(Duration::from_secs(5))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(upload.token().depth(), 1);

        assert!(sessions.stop_session("s1"));
        assert!(upload.handle().wait(Some(WAIT)));
        assert!(upload.handle().outcome().unwrap().is_err());

        assert!(harness.pump_until(|| log.lock().len() == 1, WAIT));
        assert!(matches!(
            log.lock()[0].1,
            Err(TaskError::Cancelled { .. })
        ));
        assert!(!sessions.stop_session("s1"));
    }

    #[test]
    fn test_stop_drops_queued_autorun() {
        let harness = TestHarness::new();
        let (sessions, log) = coordinator(&harness);
        let (work, release) = gated(1);
        sessions.start_session("manual", work);
        sessions.enqueue_autorun("auto", |_| Ok(2));

        assert!(sessions.stop_session("auto"));
        assert_eq!(sessions.queued_session(), None);

        release.send(()).unwrap();
        assert!(harness.pump_until(|| log.lock().len() == 1, WAIT));
        harness.pump_for(Duration::from_millis(30));
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_start_after_shutdown_is_unavailable() {
        let harness = TestHarness::new();
        let (sessions, _log) = coordinator(&harness);
        harness.runtime.shutdown(false, None, false);
        assert_eq!(
            sessions.start_session("late", |_| Ok(0)),
            SessionStart::Unavailable(SubmitError::ShutDown)
        );
    }

    #[test]
    fn test_stopped_session_reports_user_cancel() {
        let harness = TestHarness::new();
        let (sessions, log) = coordinator(&harness);
        let (work, _release) = gated(1);
        sessions.start_session("s1", work);
        sessions.stop_session("s1");

        assert!(harness.pump_until(|| log.lock().len() == 1, WAIT));
        let outcome = log.lock()[0].1.clone();
        // Either the session token or the group cancel is observed first
        assert!(
            outcome == Err(TaskError::cancelled(CancelReason::User))
                || outcome == Err(TaskError::cancelled(CancelReason::Group))
        );
    }

    fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn test_autorun_promoted_when_delivery_is_dropped() {
        let harness = TestHarness::with_config(
            RuntimeConfig::new(),
            BridgeConfig::new().with_thresholds(1, 1),
        );
        let (sessions, _log) = coordinator(&harness);
        assert!(harness.bridge.post(|| {}));

        let (work, release) = gated(1);
        let (auto_work, _auto_release) = gated(2);
        sessions.start_session("manual", work);
        assert_eq!(sessions.enqueue_autorun("auto", auto_work), SessionStart::Queued);

        // Nothing is drained, so the manual result is dropped by the full bridge
        release.send(()).unwrap();
        assert!(wait_until(
            || sessions.active_session().as_deref() == Some("auto"),
            WAIT
        ));
        assert_eq!(sessions.queued_session(), None);
        assert!(harness.bridge.metrics().dropped() >= 1);
    }

    #[test]
    fn test_concurrent_starts_admit_one() {
        let harness = TestHarness::new();
        let (sessions, _log) = coordinator(&harness);
        let barrier = Barrier::new(8);
        let mut releases = Mutex::new(Vec::new());

        let started = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|i| {
                    let sessions = sessions.clone();
                    let barrier = &barrier;
                    let releases = &releases;
                    scope.spawn(move || {
                        let (work, release) = gated(i);
                        releases.lock().push(release);
                        barrier.wait();
                        sessions.start_session(format!("s{i}"), work)
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| worker.join().unwrap())
                .filter(|start| matches!(start, SessionStart::Started(_)))
                .count()
        });

        assert_eq!(started, 1);
        assert_eq!(harness.runtime.snapshot(Some(SESSION_GROUP)).len(), 1);
        for release in releases.get_mut().drain(..) {
            let _ = release.send(());
        }
    }
}
