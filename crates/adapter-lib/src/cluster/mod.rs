//! Cluster access
//!
//! The adapter reads namespaces and pods, creates and deletes profiling Jobs
//! and lists object names by label selector. [`ClusterClient`] is the seam:
//! [`KubeClusterClient`] talks to a real API server, [`InMemoryCluster`]
//! answers from in-process state.

mod kube_client;
mod memory;

pub use kube_client::KubeClusterClient;
pub use memory::InMemoryCluster;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{AdapterError, Result};
use crate::mapper::ResourceMapping;
use crate::observability::AdapterMetrics;
use crate::selector::LabelSelector;

/// Operations the adapter needs from the cluster control plane
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;

    /// Create a Job; an existing Job of the same name is a `Conflict`
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job>;

    /// Delete a Job with background propagation, `false` if it did not exist
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Names of the objects of `resource` in `namespace` matching `selector`
    async fn list_object_names(
        &self,
        namespace: &str,
        resource: &ResourceMapping,
        selector: &LabelSelector,
    ) -> Result<Vec<String>>;
}

/// Time budget of one inbound request, shared by every cluster call it makes
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
            budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Await a cluster call for at most the remaining budget
    pub async fn run<T, F>(&self, call: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.remaining(), fut).await;
        AdapterMetrics::new().observe_cluster_call(call, started.elapsed().as_secs_f64());
        outcome.unwrap_or_else(|_| {
            Err(AdapterError::Timeout {
                call,
                after: self.budget,
            })
        })
    }
}
