//! Retention sweeper
//!
//! Periodically evicts store entries older than the configured retention.
//! Without a retention the store keeps entries for the life of the process.

use super::MetricStore;
use crate::observability::{AdapterMetrics, StructuredLogger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info};

/// Background task that expires old profiling runs
pub struct RetentionSweeper {
    store: Arc<MetricStore>,
    retention: Duration,
    interval: Duration,
    metrics: AdapterMetrics,
    logger: StructuredLogger,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<MetricStore>,
        retention: Duration,
        interval: Duration,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            retention,
            interval,
            metrics: AdapterMetrics::new(),
            logger,
        }
    }

    /// Run one eviction pass, returning the number of evicted entries
    pub async fn sweep_once(&self) -> usize {
        let evicted = self.store.evict_older_than(self.retention).await;
        if !evicted.is_empty() {
            self.metrics.inc_entries_evicted(evicted.len() as u64);
            self.logger.log_eviction(evicted.len(), self.retention);
        } else {
            debug!("Retention sweep found nothing to evict");
        }
        evicted.len()
    }

    /// Sweep on every tick until shutdown is signalled
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            retention_secs = self.retention.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Starting retention sweeper"
        );

        let mut ticker = interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down retention sweeper");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::StaticResourceMapper;
    use crate::quantity::Quantity;
    use crate::store::{MetricInfo, MetricKey, NamespacedName};

    fn empty_store() -> Arc<MetricStore> {
        Arc::new(MetricStore::new(Arc::new(StaticResourceMapper::new())))
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_entries() {
        let store = empty_store();
        store
            .put(
                MetricKey::new(MetricInfo::pods("7-freq"), NamespacedName::new("n", "p")),
                Quantity::from_int(10),
            )
            .await
            .unwrap();

        let sweeper = RetentionSweeper::new(
            store.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(60),
            StructuredLogger::new("test"),
        );
        assert_eq!(sweeper.sweep_once().await, 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_evicts_expired_entries() {
        let store = empty_store();
        store
            .put(
                MetricKey::new(MetricInfo::pods("7-freq"), NamespacedName::new("n", "p")),
                Quantity::from_int(10),
            )
            .await
            .unwrap();

        let sweeper = RetentionSweeper::new(
            store.clone(),
            Duration::ZERO,
            Duration::from_secs(60),
            StructuredLogger::new("test"),
        );
        assert_eq!(sweeper.sweep_once().await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = empty_store();
        let sweeper = RetentionSweeper::new(
            store,
            Duration::from_secs(3600),
            Duration::from_millis(10),
            StructuredLogger::new("test"),
        );
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(sweeper.run(rx));
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
