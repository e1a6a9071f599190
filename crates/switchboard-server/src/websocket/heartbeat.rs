//! Pong-based liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::channel::ClientChannel;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No activity from the client within `timeout`.
    TimedOut,
    /// The session ended or shutdown began.
    Cancelled,
}

/// Watch `channel` until it goes quiet for `timeout` or `cancel` fires.
///
/// Checked once per `interval`; the writer sends the pings, the reader calls
/// [`ClientChannel::mark_alive`] on any inbound frame.
pub async fn run_heartbeat(
    channel: Arc<ClientChannel>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // first tick completes immediately
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !channel.check_alive() && channel.last_pong_elapsed() >= timeout {
                    return HeartbeatResult::TimedOut;
                }
            }
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }
    }
}
