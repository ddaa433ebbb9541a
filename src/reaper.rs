//! Reaper: periodic sweep that removes containers idle past an absolute
//! horizon, independent of refcount (spec §4.5). Implemented as one
//! long-lived task on a bare `tokio::time::interval`, following the
//! teacher's `cmd/root.rs` "background task on a ticker" idiom rather than
//! the generic `cron::Scheduler` abstraction — there's exactly one job here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::driver::ContainerDriver;

pub const REAP_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const MAX_IDLE: Duration = Duration::from_secs(24 * 60 * 60);

/// Spawn the reaper task. It runs until `shutdown` is cancelled.
pub fn spawn(
    driver: Arc<dyn ContainerDriver>,
    db: Arc<Database>,
    reap_interval: Duration,
    max_idle: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reap_interval);
        ticker.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("reaper stopping");
                    return;
                }
                _ = ticker.tick() => {
                    sweep(&driver, &db, max_idle).await;
                }
            }
        }
    });
}

async fn sweep(driver: &Arc<dyn ContainerDriver>, db: &Arc<Database>, max_idle: Duration) {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(max_idle).expect("max_idle fits in chrono::Duration");

    let expired = match db.boxes().list_expired(cutoff).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "reaper sweep failed to list expired boxes");
            return;
        }
    };

    if expired.is_empty() {
        return;
    }

    info!(count = expired.len(), "reaping expired boxes");

    for row in expired {
        if let Err(e) = driver.remove(&row.container_id).await {
            warn!(fingerprint = %row.fingerprint, container_id = %row.container_id, error = %e, "reaper failed to remove container");
        }
        if let Err(e) = db.boxes().delete(&row.fingerprint).await {
            warn!(fingerprint = %row.fingerprint, error = %e, "reaper failed to delete box row");
        }
    }
}
