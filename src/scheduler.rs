use std::sync::Arc;

use tokio::time::{interval, Duration};
use tracing::{info, warn};

use crate::api::{self, AppState};
use crate::error::Error;
use crate::reconcile;

/// Delay before the first pass so the listener is up first.
const INITIAL_DELAY_SECS: u64 = 30;

/// Spawns the scheduler unless the configured interval is zero.
pub fn start(state: Arc<AppState>) {
    let hours = state.config.reconcile_interval_hours;
    if hours == 0 {
        info!("reconciliation scheduler disabled");
        return;
    }

    tokio::spawn(async move {
        info!("reconciliation scheduler started ({hours}h interval)");
        tokio::time::sleep(Duration::from_secs(INITIAL_DELAY_SECS)).await;

        let mut ticks = interval(Duration::from_secs(hours * 60 * 60));
        loop {
            ticks.tick().await;
            run_scheduled_pass(&state).await;
        }
    });
}

/// One pass. Failures are logged and left for the next tick.
async fn run_scheduled_pass(state: &Arc<AppState>) {
    let snapshots = state.snapshots.clone();
    let outcome =
        api::with_store(state, move |store| reconcile::reconcile_latest(store, &snapshots)).await;
    match outcome {
        Ok((path, result)) => info!(
            "scheduled reconciliation of {} done: {} created, {} updated, {} archived",
            path.display(),
            result.created,
            result.updated,
            result.archived
        ),
        Err(api::ApiError::Store(Error::NotFound(what))) => {
            info!("scheduled reconciliation skipped: no {what}")
        }
        Err(err) => warn!("scheduled reconciliation failed: {err}"),
    }
}
