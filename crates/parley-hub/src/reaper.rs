use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::hub::Hub;

/// Periodic liveness sweep. Event-driven teardown handles the common cases;
/// this loop converges the stragglers (half-dead transports, sessions whose
/// departure events were lost).
pub fn spawn_reaper(hub: Arc<Hub>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; skip it so a fresh boot never sweeps.
        ticker.tick().await;
        info!(period_secs = period.as_secs(), "reaper started");
        loop {
            ticker.tick().await;
            let (evicted, reaped) = hub.reap();
            if evicted > 0 || reaped > 0 {
                info!(evicted, reaped, "reaper sweep complete");
            } else {
                debug!("reaper sweep found nothing to do");
            }
        }
    })
}
