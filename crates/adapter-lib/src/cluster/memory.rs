//! In-process [`ClusterClient`]
//!
//! Holds namespaces, pods, Jobs and labelled objects in memory. Used by the
//! test suites and for running the adapter without an API server.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::ClusterClient;
use crate::error::{AdapterError, Result};
use crate::mapper::ResourceMapping;
use crate::selector::LabelSelector;

type Labels = BTreeMap<String, String>;

#[derive(Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    pods: BTreeMap<(String, String), Pod>,
    jobs: BTreeMap<(String, String), Job>,
    /// (plural, namespace, name) -> labels, for resources other than pods
    objects: BTreeMap<(String, String, String), Labels>,
}

/// Cluster state kept in process memory
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
    reject_jobs: AtomicBool,
    latency_ms: AtomicU64,
}

fn to_labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_namespace(&self, name: &str) {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        self.state().namespaces.insert(name.to_string(), namespace);
    }

    /// Add a pod, scheduled on `node` when given
    pub fn add_pod(&self, namespace: &str, name: &str, node: Option<&str>, labels: &[(&str, &str)]) {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(to_labels(labels)),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: node.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.state()
            .pods
            .insert((namespace.to_string(), name.to_string()), pod);
    }

    /// Add a labelled object of any other resource type
    pub fn add_object(&self, plural: &str, namespace: &str, name: &str, labels: &[(&str, &str)]) {
        self.state().objects.insert(
            (plural.to_string(), namespace.to_string(), name.to_string()),
            to_labels(labels),
        );
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.state().jobs.values().cloned().collect()
    }

    pub fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        self.state()
            .jobs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Make every subsequent Job creation fail
    pub fn reject_job_creation(&self, reject: bool) {
        self.reject_jobs.store(reject, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        self.simulate_latency().await;
        Ok(self.state().namespaces.get(name).cloned())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        self.simulate_latency().await;
        Ok(self
            .state()
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        self.simulate_latency().await;
        Ok(self.job(namespace, name))
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job> {
        self.simulate_latency().await;
        if self.reject_jobs.load(Ordering::SeqCst) {
            return Err(AdapterError::internal("job creation rejected by cluster"));
        }

        let name = job.name_any();
        let mut state = self.state();
        let key = (namespace.to_string(), name.clone());
        if state.jobs.contains_key(&key) {
            return Err(AdapterError::conflict(format!(
                "job \"{}\" already exists in namespace \"{}\"",
                name, namespace
            )));
        }

        let mut created = job.clone();
        created.metadata.namespace = Some(namespace.to_string());
        state.jobs.insert(key, created.clone());
        Ok(created)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<bool> {
        self.simulate_latency().await;
        Ok(self
            .state()
            .jobs
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some())
    }

    async fn list_object_names(
        &self,
        namespace: &str,
        resource: &ResourceMapping,
        selector: &LabelSelector,
    ) -> Result<Vec<String>> {
        self.simulate_latency().await;
        let state = self.state();
        let in_scope = |ns: &str| !resource.namespaced || ns == namespace;

        let names = if resource.plural == "pods" {
            state
                .pods
                .iter()
                .filter(|((ns, _), pod)| {
                    let labels = pod.metadata.labels.clone().unwrap_or_default();
                    in_scope(ns.as_str()) && selector.matches(&labels)
                })
                .map(|((_, name), _)| name.clone())
                .collect()
        } else {
            state
                .objects
                .iter()
                .filter(|((plural, ns, _), labels)| {
                    plural == &resource.plural && in_scope(ns.as_str()) && selector.matches(labels)
                })
                .map(|((_, _, name), _)| name.clone())
                .collect()
        };
        Ok(names)
    }
}
