//! Periodic pruning of finished jobs.
//!
//! Jobs that reached a terminal state more than the retention period ago are
//! dropped from the runner's memory, the progress broadcaster, and the
//! `jobs` table.

use std::sync::Arc;
use std::time::Duration;

use melon_pipeline::JobRunner;
use tokio_util::sync::CancellationToken;

/// How often the cleanup runs.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Run the retention loop until `cancel` is triggered.
pub async fn run(
    runner: Arc<JobRunner>,
    retention: Duration,
    every: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_secs = retention.as_secs(),
        interval_secs = every.as_secs(),
        "Job retention task started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = interval.tick() => {
                match runner.prune(retention).await {
                    Ok(deleted) if deleted > 0 => {
                        tracing::info!(deleted, "Job retention: pruned finished jobs");
                    }
                    Ok(_) => tracing::debug!("Job retention: nothing to prune"),
                    Err(e) => tracing::error!(error = %e, "Job retention: cleanup failed"),
                }
            }
        }
    }
}
