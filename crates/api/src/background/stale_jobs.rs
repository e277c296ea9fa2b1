//! Periodic sweep that fails jobs whose worker went silent.
//!
//! A live job whose stage has not moved for the configured timeout is
//! marked `FAILED`. Runs on a fixed interval using `tokio::time::interval`.

use std::sync::Arc;
use std::time::Duration;

use brickyard_pipeline::JobOrchestrator;
use tokio_util::sync::CancellationToken;

/// Run the stalled-job sweep loop until `cancel` is triggered.
pub async fn run(
    orchestrator: Arc<JobOrchestrator>,
    timeout: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        timeout_secs = timeout.as_secs(),
        interval_secs = interval.as_secs(),
        "Stalled job sweep started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stalled job sweep stopping");
                break;
            }
            _ = ticker.tick() => {
                match orchestrator.fail_stalled(timeout).await {
                    Ok(0) => tracing::debug!("Stalled job sweep: nothing to fail"),
                    Ok(failed) => tracing::info!(failed, "Stalled job sweep: failed silent jobs"),
                    Err(e) => tracing::error!(error = %e, "Stalled job sweep failed"),
                }
            }
        }
    }
}
