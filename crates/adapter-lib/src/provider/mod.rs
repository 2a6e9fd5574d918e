//! Custom metrics provider
//!
//! Answers list-all, get-by-name and get-by-selector queries from the metric
//! store. Only the selector query talks to the cluster, to resolve which
//! objects the label selector matches.

pub mod types;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cluster::{ClusterClient, Deadline};
use crate::error::Result;
use crate::mapper::{ResourceMapper, ResourceMapping};
use crate::quantity::Quantity;
use crate::selector::LabelSelector;
use crate::store::{MetricInfo, MetricKey, MetricStore, NamespacedName};
use types::{APIResource, APIResourceList, MetricIdentifier, MetricValue, MetricValueList, ObjectReference};

/// Read-only view of the store in custom metrics API terms
pub struct MetricsProvider {
    store: Arc<MetricStore>,
    mapper: Arc<dyn ResourceMapper>,
    cluster: Arc<dyn ClusterClient>,
    cluster_timeout: Duration,
}

impl MetricsProvider {
    pub fn new(
        store: Arc<MetricStore>,
        mapper: Arc<dyn ResourceMapper>,
        cluster: Arc<dyn ClusterClient>,
        cluster_timeout: Duration,
    ) -> Self {
        Self {
            store,
            mapper,
            cluster,
            cluster_timeout,
        }
    }

    /// Every populated (resource, metric) pair
    pub async fn list_all_metrics(&self) -> Vec<MetricInfo> {
        self.store.list_metric_infos().await
    }

    /// Discovery document for the populated metrics
    pub async fn api_resources(&self) -> APIResourceList {
        let resources = self
            .list_all_metrics()
            .await
            .into_iter()
            .map(|info| APIResource {
                name: format!("{}/{}", info.group_resource, info.metric),
                singular_name: String::new(),
                namespaced: info.namespaced,
                kind: "MetricValueList".to_string(),
                verbs: vec!["get".to_string()],
            })
            .collect();
        APIResourceList::new(resources)
    }

    fn metric_value(
        &self,
        mapping: &ResourceMapping,
        name: &NamespacedName,
        info: &MetricInfo,
        metric_selector: &LabelSelector,
        value: Quantity,
    ) -> MetricValue {
        MetricValue {
            described_object: ObjectReference {
                kind: mapping.kind.clone(),
                namespace: if mapping.namespaced {
                    name.namespace.clone()
                } else {
                    String::new()
                },
                name: name.name.clone(),
                api_version: mapping.api_version(),
            },
            metric: MetricIdentifier {
                name: info.metric.clone(),
                selector: (!metric_selector.is_empty()).then(|| metric_selector.to_string()),
            },
            timestamp: Utc::now(),
            window_seconds: None,
            value,
        }
    }

    /// Value of `info` for one object. The metric selector is echoed back
    /// but does not filter, values carry no labels.
    pub async fn get_metric_by_name(
        &self,
        name: NamespacedName,
        info: MetricInfo,
        metric_selector: &LabelSelector,
    ) -> Result<MetricValue> {
        let mapping = self.mapper.resolve(&info.group_resource)?;
        let key = MetricKey::new(info, name);
        let value = self.store.get(&key).await?;
        Ok(self.metric_value(&mapping, &key.name, &key.info, metric_selector, value))
    }

    /// Values of `info` for every object in `namespace` matching `selector`.
    /// Objects without a stored value are left out.
    pub async fn get_metric_by_selector(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        info: MetricInfo,
        metric_selector: &LabelSelector,
    ) -> Result<MetricValueList> {
        let mapping = self.mapper.resolve(&info.group_resource)?;
        let names = Deadline::after(self.cluster_timeout)
            .run(
                "list_objects",
                self.cluster.list_object_names(namespace, &mapping, selector),
            )
            .await?;

        let keys: Vec<MetricKey> = names
            .into_iter()
            .map(|name| MetricKey::new(info.clone(), NamespacedName::new(namespace, name)))
            .collect();
        let values = self.store.get_many(&keys).await?;

        let items: Vec<MetricValue> = keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| {
                value.map(|v| self.metric_value(&mapping, &key.name, &key.info, metric_selector, v))
            })
            .collect();
        debug!(
            namespace = %namespace,
            selector = %selector,
            metric = %info.metric,
            matched = keys.len(),
            returned = items.len(),
            "Resolved metric by selector"
        );
        Ok(MetricValueList::new(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::mapper::{GroupResource, StaticResourceMapper};

    async fn setup() -> MetricsProvider {
        let mapper: Arc<dyn ResourceMapper> = Arc::new(StaticResourceMapper::new());
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.add_namespace("n");
        cluster.add_pod("n", "web-1", Some("nodeA"), &[("app", "web")]);
        cluster.add_pod("n", "web-2", Some("nodeA"), &[("app", "web")]);
        cluster.add_pod("n", "db-1", Some("nodeB"), &[("app", "db")]);

        let store = Arc::new(MetricStore::new(mapper.clone()));
        store
            .put(
                MetricKey::new(MetricInfo::pods("7-cpu"), NamespacedName::new("n", "web-1")),
                "150m".parse().unwrap(),
            )
            .await
            .unwrap();
        store
            .put(
                MetricKey::new(MetricInfo::pods("7-cpu"), NamespacedName::new("n", "db-1")),
                "300m".parse().unwrap(),
            )
            .await
            .unwrap();
        store
            .put(
                MetricKey::new(MetricInfo::pods("7-ram"), NamespacedName::new("n", "web-1")),
                "256Mi".parse().unwrap(),
            )
            .await
            .unwrap();

        MetricsProvider::new(store, mapper, cluster, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_list_all_metrics_is_distinct() {
        let provider = setup().await;
        let metrics: Vec<String> = provider
            .list_all_metrics()
            .await
            .into_iter()
            .map(|info| info.metric)
            .collect();
        assert_eq!(metrics, vec!["7-cpu", "7-ram"]);

        let resources = provider.api_resources().await;
        assert_eq!(resources.resources[0].name, "pods/7-cpu");
        assert!(resources.resources.iter().all(|r| r.namespaced));
    }

    #[tokio::test]
    async fn test_get_by_name() {
        let provider = setup().await;
        let value = provider
            .get_metric_by_name(
                NamespacedName::new("n", "web-1"),
                MetricInfo::new(GroupResource::core("pod"), true, "7-cpu"),
                &LabelSelector::everything(),
            )
            .await
            .unwrap();
        assert_eq!(value.value.to_string(), "150m");
        assert_eq!(value.described_object.kind, "Pod");
        assert_eq!(value.described_object.namespace, "n");
        assert_eq!(value.metric.selector, None);
    }

    #[tokio::test]
    async fn test_get_by_name_missing() {
        let provider = setup().await;
        let err = provider
            .get_metric_by_name(
                NamespacedName::new("n", "web-2"),
                MetricInfo::pods("7-cpu"),
                &LabelSelector::everything(),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_get_by_selector_skips_missing_values() {
        let provider = setup().await;
        let list = provider
            .get_metric_by_selector(
                "n",
                &"app=web".parse().unwrap(),
                MetricInfo::pods("7-cpu"),
                &LabelSelector::everything(),
            )
            .await
            .unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].described_object.name, "web-1");

        let all = provider
            .get_metric_by_selector(
                "n",
                &LabelSelector::everything(),
                MetricInfo::pods("7-cpu"),
                &LabelSelector::everything(),
            )
            .await
            .unwrap();
        let mut names: Vec<&str> = all
            .items
            .iter()
            .map(|item| item.described_object.name.as_str())
            .collect();
        names.sort();
        assert_eq!(names, vec!["db-1", "web-1"]);
    }

    #[tokio::test]
    async fn test_unknown_resource_is_an_error() {
        let provider = setup().await;
        let err = provider
            .get_metric_by_selector(
                "n",
                &LabelSelector::everything(),
                MetricInfo::new(GroupResource::core("widgets"), true, "7-cpu"),
                &LabelSelector::everything(),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
