//! Background tasks for the daemon.
//!
//! Periodically flushes a fresh snapshot (and therefore a fresh
//! checkpoint row) for every open tab, so a crash loses at most the
//! interval's worth of events beyond what `append_event_hook` already
//! wrote incrementally.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::DaemonState;

/// Default interval between background snapshot flushes (5 minutes).
const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 300;

pub async fn snapshot_flush_task(state: Arc<DaemonState>) {
    let mut ticker = interval(Duration::from_secs(DEFAULT_SNAPSHOT_INTERVAL_SECS));

    info!(
        "Background snapshot task started (interval: {} secs)",
        DEFAULT_SNAPSHOT_INTERVAL_SECS
    );

    loop {
        ticker.tick().await;

        if state.should_shutdown() {
            info!("Background snapshot task stopping due to shutdown");
            break;
        }

        let Some(coordinator) = state.coordinator().await else {
            debug!("No session open yet, skipping snapshot flush");
            continue;
        };

        let mut flushed = 0u64;
        for tab_id in coordinator.tab_ids().await {
            let Some(chain) = coordinator.chain(&tab_id).await else { continue };
            let snapshot = chain.snapshot().await;
            match state.db.save_snapshot(&tab_id, &snapshot) {
                Ok(()) => flushed += 1,
                Err(err) => warn!(tab_id, error = %err, "background snapshot flush failed"),
            }
        }

        if flushed > 0 {
            debug!(flushed, "background snapshot flush complete");
        }
    }
}
