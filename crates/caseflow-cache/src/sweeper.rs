//! Background removal of expired entries.

use crate::orchestrator::CacheOrchestrator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Periodically purges expired entries so memory stays bounded by live data.
pub struct Sweeper {
    cache: Arc<CacheOrchestrator>,
    every: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl Sweeper {
    pub fn new(cache: Arc<CacheOrchestrator>, every: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            cache,
            every,
            shutdown_tx,
        }
    }

    /// Spawns the sweep loop on the current runtime.
    pub fn spawn(self) -> SweeperHandle {
        let shutdown_tx = self.shutdown_tx.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let task = tokio::spawn(self.run(shutdown_rx));
        SweeperHandle { shutdown_tx, task }
    }

    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.every.as_secs(),
            backend = self.cache.backend(),
            "Starting cache sweeper"
        );

        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing can have expired yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.cache.sweep_expired().await {
                        error!(error = %e, "Failed to sweep expired cache entries");
                    }
                }
            }
        }

        info!("Cache sweeper stopped");
    }
}

/// Handle to a running sweeper.
pub struct SweeperHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the sweeper and waits for it to exit.
    pub async fn shutdown(self) {
        info!("Stopping cache sweeper...");
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Cache sweeper task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::CacheInterface;
    use crate::key::CacheKey;
    use crate::tags::TagSet;
    use caseflow_config::CacheConfig;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_expired_entries() {
        let cache = Arc::new(CacheOrchestrator::in_memory(&CacheConfig::default()));
        let key = CacheKey::new("cases_a").unwrap();
        cache
            .store(&key, "1".into(), Duration::from_secs(5), &TagSet::from(["cases_list"]))
            .await
            .unwrap();

        let handle = Sweeper::new(cache.clone(), Duration::from_secs(10)).spawn();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cache.stats().invalidated, 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let cache = Arc::new(CacheOrchestrator::in_memory(&CacheConfig::default()));
        let handle = Sweeper::new(cache, Duration::from_secs(3600)).spawn();
        assert!(!handle.is_finished());
        handle.shutdown().await;
    }
}
