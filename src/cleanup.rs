//! Scheduled cleanup of expired sessions and elapsed rate counters.
//!
//! Expiry is always checked when a session is used, so this only bounds
//! storage growth.

use crate::clock::unix_now;
use crate::service::AuthService;
use std::time::Duration;
use tracing::{error, info};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run all cleanup tasks once.
pub async fn run_cleanup(service: &AuthService) {
    let now = unix_now();

    match service.database().sessions().delete_expired(now).await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired sessions", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up expired sessions: {}", e),
    }

    match service.rate_guard().purge_elapsed(now).await {
        Ok(count) if count > 0 => info!("Cleaned up {} elapsed rate counters", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up rate counters: {}", e),
    }
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(service: AuthService) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        // The first tick completes immediately; startup already ran a pass
        interval.tick().await;

        loop {
            interval.tick().await;
            run_cleanup(&service).await;
        }
    })
}
