//! Periodic removal of expired completed jobs.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::JobRegistry;

/// Spawn a task calling [`JobRegistry::sweep_expired`] every `interval` until cancelled.
pub fn spawn_sweeper(
    registry: Arc<JobRegistry>,
    interval: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately; nothing can have expired yet.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = registry.sweep_expired().await;
                    tracing::debug!(removed, "job sweep finished");
                }
                _ = cancel_token.cancelled() => {
                    tracing::debug!("job sweeper stopped");
                    break;
                }
            }
        }
    })
}
