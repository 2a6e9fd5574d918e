//! [`ClusterClient`] backed by the Kubernetes API

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Client, ResourceExt};
use tracing::debug;

use super::ClusterClient;
use crate::error::{AdapterError, Result};
use crate::mapper::ResourceMapping;
use crate::selector::LabelSelector;

fn has_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == code)
}

/// Cluster client using a `kube` client (in-cluster or kubeconfig)
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the in-cluster service account or the local kubeconfig
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), job).await {
            Ok(created) => Ok(created),
            Err(err) if has_status(&err, 409) => Err(AdapterError::conflict(format!(
                "job \"{}\" already exists in namespace \"{}\"",
                job.name_any(),
                namespace
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<bool> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(true),
            Err(err) if has_status(&err, 404) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_object_names(
        &self,
        namespace: &str,
        resource: &ResourceMapping,
        selector: &LabelSelector,
    ) -> Result<Vec<String>> {
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        let api_resource = ApiResource::from_gvk_with_plural(&gvk, &resource.plural);
        let api: Api<DynamicObject> = if resource.namespaced {
            Api::namespaced_with(self.client.clone(), namespace, &api_resource)
        } else {
            Api::all_with(self.client.clone(), &api_resource)
        };

        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector.to_string());
        }

        let objects = api.list(&params).await?;
        let names: Vec<String> = objects.items.iter().map(|o| o.name_any()).collect();
        debug!(
            resource = %resource.plural,
            namespace = %namespace,
            selector = %selector,
            matched = names.len(),
            "Listed objects by selector"
        );
        Ok(names)
    }
}
