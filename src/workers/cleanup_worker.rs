use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::CacheStore;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Periodic cache maintenance: orphan reconciliation and score refresh
/// every 30 minutes, plus one pass at startup to heal whatever the last
/// shutdown left behind.
pub struct CleanupWorker {
    store: Arc<CacheStore>,
    interval: Duration,
}

impl CleanupWorker {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            store,
            interval: CLEANUP_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_interval(store: Arc<CacheStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run_once().await;

            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await; // immediate first tick already handled

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_once().await,
                    _ = shutdown.cancelled() => {
                        info!("Cache cleanup worker stopping");
                        return;
                    }
                }
            }
        })
    }

    async fn run_once(&self) {
        match self.store.cleanup().await {
            Ok(report) => info!(
                "Cache stats: {} files, {:.2} GB used, {} orphans removed",
                report.entries,
                report.total_bytes as f64 / 1024.0 / 1024.0 / 1024.0,
                report.orphans_removed
            ),
            Err(e) => warn!("Cache cleanup error: {e}"),
        }
    }
}
