//! In-memory metric store
//!
//! Maps normalized [`MetricKey`]s to [`Quantity`] values behind a single
//! reader/writer lock. Keys are normalized before every read and write.
//! Batch operations (`put_many`, `get_many`, `remove_many`) run under one
//! lock acquisition, so a reader never sees half of a batch.

mod key;
mod sweeper;

pub use key::{MetricInfo, MetricKey, NamespacedName};
pub use sweeper::RetentionSweeper;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{AdapterError, Result};
use crate::mapper::ResourceMapper;
use crate::observability::AdapterMetrics;
use crate::quantity::Quantity;

#[derive(Debug, Clone)]
struct StoredValue {
    value: Quantity,
    written_at: Instant,
}

/// Shared last-write-wins metric store
pub struct MetricStore {
    mapper: Arc<dyn ResourceMapper>,
    entries: RwLock<HashMap<MetricKey, StoredValue>>,
    metrics: AdapterMetrics,
}

impl MetricStore {
    pub fn new(mapper: Arc<dyn ResourceMapper>) -> Self {
        Self {
            mapper,
            entries: RwLock::new(HashMap::new()),
            metrics: AdapterMetrics::new(),
        }
    }

    fn normalize(&self, key: &MetricKey) -> Result<MetricKey> {
        key.normalized(self.mapper.as_ref())
    }

    fn normalize_all(&self, keys: &[MetricKey]) -> Result<Vec<MetricKey>> {
        keys.iter().map(|k| self.normalize(k)).collect()
    }

    /// Upsert a single value
    pub async fn put(&self, key: MetricKey, value: Quantity) -> Result<()> {
        self.put_many(vec![(key, value)]).await
    }

    /// Upsert several values atomically. Either every key normalizes and all
    /// are written with the same timestamp, or nothing is written.
    pub async fn put_many(&self, batch: Vec<(MetricKey, Quantity)>) -> Result<()> {
        let normalized = batch
            .into_iter()
            .map(|(key, value)| Ok((self.normalize(&key)?, value)))
            .collect::<Result<Vec<_>>>()?;

        let mut entries = self.entries.write().await;
        let written_at = Instant::now();
        for (key, value) in normalized {
            debug!(key = %key, value = %value, "Storing metric");
            entries.insert(key, StoredValue { value, written_at });
        }
        self.metrics.set_store_entries(entries.len() as i64);
        Ok(())
    }

    /// Read one value; a missing key is an error, never a zero value
    pub async fn get(&self, key: &MetricKey) -> Result<Quantity> {
        let key = self.normalize(key)?;
        let entries = self.entries.read().await;
        entries.get(&key).map(|stored| stored.value).ok_or_else(|| {
            AdapterError::metric_not_found(
                &key.info.group_resource,
                &key.info.metric,
                &key.name.to_string(),
            )
        })
    }

    /// Read several values under one consistent view, `None` where absent
    pub async fn get_many(&self, keys: &[MetricKey]) -> Result<Vec<Option<Quantity>>> {
        let normalized = self.normalize_all(keys)?;
        let entries = self.entries.read().await;
        Ok(normalized
            .iter()
            .map(|k| entries.get(k).map(|stored| stored.value))
            .collect())
    }

    /// Remove several keys atomically, returning how many existed
    pub async fn remove_many(&self, keys: &[MetricKey]) -> Result<usize> {
        let normalized = self.normalize_all(keys)?;
        let mut entries = self.entries.write().await;
        let removed = normalized
            .iter()
            .filter(|k| entries.remove(*k).is_some())
            .count();
        self.metrics.set_store_entries(entries.len() as i64);
        Ok(removed)
    }

    /// Distinct metric descriptors currently populated, ignoring which object
    /// they belong to
    pub async fn list_metric_infos(&self) -> Vec<MetricInfo> {
        let entries = self.entries.read().await;
        let infos: BTreeSet<&MetricInfo> = entries.keys().map(|k| &k.info).collect();
        infos.into_iter().cloned().collect()
    }

    /// Drop every entry written more than `age` ago, returning the evicted
    /// keys. Batches share a timestamp, so they are evicted together.
    pub async fn evict_older_than(&self, age: Duration) -> Vec<MetricKey> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let expired: Vec<MetricKey> = entries
            .iter()
            .filter(|(_, stored)| now.saturating_duration_since(stored.written_at) >= age)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        self.metrics.set_store_entries(entries.len() as i64);
        expired
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
