use crate::services::retention::RetentionSweeper;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Periodic retention sweep, enabled with `SWEEP_INTERVAL_SECS`.
pub struct BackgroundWorker {
    sweeper: Arc<RetentionSweeper>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl BackgroundWorker {
    pub fn new(
        sweeper: Arc<RetentionSweeper>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sweeper,
            interval,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!("🚀 Background worker started (interval {:?})", self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("🛑 Background worker shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    tracing::info!("🧹 Running periodic retention sweep...");
                    let report = self.sweeper.sweep_all().await;
                    tracing::info!(
                        "✅ Periodic sweep completed: {} files deleted",
                        report.total()
                    );
                }
            }
        }
    }
}
