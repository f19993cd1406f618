//! Self-rescheduling tick chains delivered on the UI thread.

use crate::bridge::DeliveryBridge;
use crate::cancellation::CancellationToken;
use crate::runtime::{Runtime, WeakRuntime};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Work run on the UI thread for each tick.
pub(crate) type TickFn = Arc<dyn Fn() + Send + Sync>;

/// Arms one link of a tick chain.
///
/// After `delay` the timer thread posts `tick` to the bridge. A rejected
/// post re-arms the link instead of breaking the chain. The tick itself is
/// responsible for arming the next link. Cancelling `token` ends the chain
/// at whichever step observes it. The pending link holds the runtime only
/// weakly, so an armed chain never keeps the pool alive. Returns false if
/// the runtime is shut down.
pub(crate) fn schedule_tick(
    runtime: &Runtime,
    bridge: &Arc<DeliveryBridge>,
    token: &CancellationToken,
    delay: Duration,
    tick: TickFn,
) -> bool {
    let weak_runtime: WeakRuntime = runtime.downgrade();
    let weak_bridge = Arc::downgrade(bridge);
    let chain_token = token.clone();

    runtime.call_later(delay, token, move || {
        let Some(bridge) = weak_bridge.upgrade() else {
            return;
        };
        let on_ui = Arc::clone(&tick);
        let ui_token = chain_token.clone();
        let accepted = bridge.post(move || {
            if !ui_token.is_cancelled() {
                on_ui();
            }
        });
        if !accepted {
            let Some(runtime) = weak_runtime.upgrade() else {
                return;
            };
            debug!(backlog = bridge.backlog(), "Tick rejected by bridge, re-arming");
            schedule_tick(&runtime, &bridge, &chain_token, delay, tick);
        }
    })
}

/// Adds up to `ratio * interval` of random delay.
pub(crate) fn jittered(interval: Duration, ratio: f64) -> Duration {
    if ratio.is_nan() || ratio <= 0.0 {
        return interval;
    }
    let extra = rand::thread_rng().gen_range(0.0..=ratio);
    interval + interval.mul_f64(extra)
}
