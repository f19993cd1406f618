//! Timeout watchers.

use super::record::TaskInfo;
use crate::cancellation::CancelReason;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Samples the record until it is terminal or `timeout` has elapsed.
///
/// At the deadline a still-running record has its token cancelled with
/// [`CancelReason::Timeout`] and handle cancellation requested. Work that
/// never checks its token keeps running.
pub(crate) async fn watch_timeout(info: Arc<TaskInfo>, timeout: Duration, interval: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        if info.is_terminal() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }

    if info.is_terminal() {
        return;
    }
    debug!(
        group = %info.group,
        task = %info.name,
        task_id = %info.id,
        timeout_ms = timeout.as_millis() as u64,
        "Timeout reached, cancelling task"
    );
    info.cancel(CancelReason::Timeout);
}
