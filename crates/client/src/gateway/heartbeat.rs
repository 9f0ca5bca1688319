//! The heartbeat scheduler task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use chatwire_shared::{protocol, Frame};

use super::session::SessionState;

/// Spawns the periodic heartbeat task for one session.
///
/// The connection sends the immediate post-Hello heartbeat itself before
/// calling this; the task only handles the scheduled ones. Each tick checks
/// that the previous beat was acknowledged: a missing ack is a liveness
/// failure reported through `liveness`, which forces the connection to
/// reconnect. When the outbound channel closes (socket gone), the task exits
/// silently; a heartbeat is never worth raising over a dead transport.
pub(crate) fn spawn(
    session: Arc<SessionState>,
    interval: Duration,
    outbound: mpsc::Sender<Frame>,
    liveness: mpsc::Sender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            if !session.heartbeat_acknowledged() {
                warn!("heartbeat was not acknowledged in time, forcing reconnect");
                let _ = liveness.send(()).await;
                return;
            }

            let frame = protocol::heartbeat(session.sequence());
            if outbound.send(frame).await.is_err() {
                debug!("outbound channel closed, stopping heartbeat");
                return;
            }
            session.mark_heartbeat_sent();
        }
    })
}
