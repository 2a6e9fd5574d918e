//! Target existence checks

use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;
use tracing::debug;

use crate::cluster::{ClusterClient, Deadline};
use crate::error::{AdapterError, Result};

/// Confirms a namespace and pod exist before any state is written
pub struct PodValidator {
    cluster: Arc<dyn ClusterClient>,
}

impl PodValidator {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self { cluster }
    }

    /// Check the namespace, then the pod inside it. Returns the pod so its
    /// node placement can be read. Stops at the first missing object.
    pub async fn validate(&self, namespace: &str, pod: &str, deadline: &Deadline) -> Result<Pod> {
        deadline
            .run("get_namespace", self.cluster.get_namespace(namespace))
            .await?
            .ok_or_else(|| AdapterError::not_found(format!("namespaces {:?} not found", namespace)))?;

        let found = deadline
            .run("get_pod", self.cluster.get_pod(namespace, pod))
            .await?
            .ok_or_else(|| {
                AdapterError::not_found(format!(
                    "pods {:?} not found in namespace {:?}",
                    pod, namespace
                ))
            })?;

        debug!(namespace = %namespace, pod = %pod, "Target validated");
        Ok(found)
    }
}
