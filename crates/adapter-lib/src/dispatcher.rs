//! Profiling Job construction and submission
//!
//! Builds a `batch/v1` Job that runs the profiling tool next to the target
//! pod: pinned to the pod's node, with the host `/proc` and cgroup trees
//! mounted read-only, posting its result back to `api:<ns>.<pod>.<pid>`.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, HostPathVolumeSource, Pod, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::cluster::{ClusterClient, Deadline};
use crate::error::{AdapterError, Result};
use crate::models::{JobParam, RunId};

const JOB_NAME_SUFFIX: &str = "-profiler-job";
const MAX_NAME_LEN: usize = 63;
const RUN_HASH_LEN: usize = 8;
const CONTAINER_NAME: &str = "profiler-job";
const PROC_VOLUME: &str = "proc-dir";
const CGROUP_VOLUME: &str = "cgroup-dir";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "profiler-adapter";
pub const TARGET_NAMESPACE_LABEL: &str = "profiler.dev/target-namespace";
pub const TARGET_POD_LABEL: &str = "profiler.dev/target-pod";
pub const PID_LABEL: &str = "profiler.dev/pid";

/// Where and how profiling Jobs run
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// Execution namespace, separate from the profiled pods
    pub namespace: String,
    pub image: String,
    pub image_pull_policy: String,
    pub service_account: String,
    /// Executable started in the Job container
    pub tool: String,
    pub proc_host_path: String,
    pub cgroup_host_path: String,
    pub proc_mount_path: String,
    pub cgroup_mount_path: String,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            namespace: "profiler".to_string(),
            image: "profiler-job:latest".to_string(),
            image_pull_policy: "IfNotPresent".to_string(),
            service_account: "profiler-job".to_string(),
            tool: "profiler".to_string(),
            proc_host_path: "/proc".to_string(),
            cgroup_host_path: "/sys/fs/cgroup".to_string(),
            proc_mount_path: "/tmp/proc".to_string(),
            cgroup_mount_path: "/tmp/cgroup".to_string(),
        }
    }
}

/// What to do with stored parameters when the Job cannot be submitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Keep them so the caller can retry or inspect
    #[default]
    Retain,
    /// Remove the parameter triple again
    Rollback,
}

/// What to do when a run for the same process already has a Job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    #[default]
    Reject,
    /// Delete the existing Job and submit a fresh one
    Replace,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatchPolicy {
    pub on_failure: FailurePolicy,
    pub on_duplicate: DuplicatePolicy,
}

fn sanitize(raw: &str, max_len: usize) -> String {
    let mut name: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    name.truncate(max_len);
    name.trim_matches('-').to_string()
}

/// Job name for one run, always a valid DNS-1123 label
///
/// Jobs for every target namespace share one execution namespace, so the
/// readable prefix carries a digest of the exact `ns/pod/pid` triple. Two
/// runs never collide even when sanitizing or truncation merges prefixes.
pub fn job_name(run: &RunId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}/{}/{}", run.namespace, run.pod, run.pid));
    let digest = hex::encode(hasher.finalize());

    let prefix = sanitize(
        &format!("{}-{}-{}", run.namespace, run.pod, run.pid),
        MAX_NAME_LEN - JOB_NAME_SUFFIX.len() - RUN_HASH_LEN - 1,
    );
    format!("{}-{}{}", prefix, &digest[..RUN_HASH_LEN], JOB_NAME_SUFFIX)
}

/// Tool command line for one run
pub fn profiler_command(tool: &str, params: &JobParam, run: &RunId) -> Vec<String> {
    vec![
        tool.to_string(),
        "--pid".to_string(),
        run.pid.clone(),
        "--freq".to_string(),
        params.frequency.to_string(),
        "--iter".to_string(),
        params.iteration.to_string(),
        "--pert".to_string(),
        params.percentile.to_string(),
        "--out".to_string(),
        run.sink_address(),
        "--mtype".to_string(),
        "all".to_string(),
    ]
}

fn host_path_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: Some("Directory".to_string()),
        }),
        ..Default::default()
    }
}

fn read_only_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

/// Build the profiling Job for `run` against the validated `pod`.
///
/// Fails with `Internal` when the pod has not been scheduled yet, since the
/// Job has to share its node.
pub fn build_profiling_job(
    settings: &JobSettings,
    pod: &Pod,
    params: &JobParam,
    run: &RunId,
) -> Result<Job> {
    let node = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_name.clone())
        .filter(|node| !node.is_empty())
        .ok_or_else(|| {
            AdapterError::internal(format!(
                "pod {} is not scheduled on a node",
                run.namespaced_name()
            ))
        })?;

    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels.insert(
        TARGET_NAMESPACE_LABEL.to_string(),
        sanitize(&run.namespace, MAX_NAME_LEN),
    );
    labels.insert(TARGET_POD_LABEL.to_string(), sanitize(&run.pod, MAX_NAME_LEN));
    labels.insert(PID_LABEL.to_string(), sanitize(&run.pid, MAX_NAME_LEN));

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(settings.image.clone()),
        image_pull_policy: Some(settings.image_pull_policy.clone()),
        command: Some(profiler_command(&settings.tool, params, run)),
        volume_mounts: Some(vec![
            read_only_mount(PROC_VOLUME, &settings.proc_mount_path),
            read_only_mount(CGROUP_VOLUME, &settings.cgroup_mount_path),
        ]),
        ..Default::default()
    };

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(job_name(run)),
            namespace: Some(settings.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    node_name: Some(node),
                    service_account_name: Some(settings.service_account.clone()),
                    restart_policy: Some("Never".to_string()),
                    containers: vec![container],
                    volumes: Some(vec![
                        host_path_volume(PROC_VOLUME, &settings.proc_host_path),
                        host_path_volume(CGROUP_VOLUME, &settings.cgroup_host_path),
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Submits and withdraws profiling Jobs
pub struct JobDispatcher {
    cluster: Arc<dyn ClusterClient>,
    settings: JobSettings,
}

impl JobDispatcher {
    pub fn new(cluster: Arc<dyn ClusterClient>, settings: JobSettings) -> Self {
        Self { cluster, settings }
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// Build and create the Job. A single attempt: `Conflict` and `Timeout`
    /// pass through, every other cluster error becomes `DispatchFailure`.
    pub async fn submit(
        &self,
        pod: &Pod,
        params: &JobParam,
        run: &RunId,
        deadline: &Deadline,
    ) -> Result<Job> {
        let job = build_profiling_job(&self.settings, pod, params, run)?;
        let name = job.metadata.name.clone().unwrap_or_default();
        debug!(job = %name, namespace = %self.settings.namespace, "Creating profiling job");

        match deadline
            .run("create_job", self.cluster.create_job(&self.settings.namespace, &job))
            .await
        {
            Ok(created) => {
                info!(job = %name, run = %run, "Created profiling job");
                Ok(created)
            }
            Err(err @ (AdapterError::Conflict(_) | AdapterError::Timeout { .. })) => Err(err),
            Err(err) => Err(AdapterError::dispatch(format!("job {}: {}", name, err))),
        }
    }

    /// Whether a Job for `run` currently exists
    pub async fn exists(&self, run: &RunId, deadline: &Deadline) -> Result<bool> {
        let name = job_name(run);
        let job = deadline
            .run("get_job", self.cluster.get_job(&self.settings.namespace, &name))
            .await?;
        Ok(job.is_some())
    }

    /// Delete the Job for `run`, `false` if there was none
    pub async fn withdraw(&self, run: &RunId, deadline: &Deadline) -> Result<bool> {
        let name = job_name(run);
        let deleted = deadline
            .run(
                "delete_job",
                self.cluster.delete_job(&self.settings.namespace, &name),
            )
            .await?;
        if deleted {
            info!(job = %name, run = %run, "Deleted profiling job");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use std::time::Duration;

    fn scheduled_pod(node: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("p".to_string()),
                namespace: Some("n".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some(node.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn build() -> Job {
        build_profiling_job(
            &JobSettings::default(),
            &scheduled_pod("nodeA"),
            &JobParam::new(10, 1000, 99),
            &RunId::new("n", "p", "7"),
        )
        .unwrap()
    }

    fn pod_spec(job: &Job) -> &PodSpec {
        job.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    #[test]
    fn job_name_format() {
        let name = job_name(&RunId::new("n", "p", "7"));
        assert!(name.starts_with("n-p-7-"));
        assert!(name.ends_with("-profiler-job"));
        assert_eq!(name.len(), "n-p-7-".len() + 8 + "-profiler-job".len());
        assert_eq!(name, job_name(&RunId::new("n", "p", "7")));

        let name = job_name(&RunId::new("n", "Web.V2", "42"));
        assert!(name.starts_with("n-web-v2-42-"));
    }

    #[test]
    fn job_name_is_bounded() {
        let name = job_name(&RunId::new("n", &"a".repeat(100), "123"));
        assert!(name.len() <= 63);
        assert!(name.ends_with("-profiler-job"));
        assert!(!name.contains("--"));
    }

    #[test]
    fn job_names_separate_runs() {
        let names = [
            job_name(&RunId::new("n1", "p", "7")),
            job_name(&RunId::new("n2", "p", "7")),
            job_name(&RunId::new("n", "web.v2", "7")),
            job_name(&RunId::new("n", "web-v2", "7")),
            job_name(&RunId::new("n", &format!("{}x", "a".repeat(100)), "7")),
            job_name(&RunId::new("n", &format!("{}y", "a".repeat(100)), "7")),
        ];
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn job_metadata() {
        let job = build();
        assert_eq!(
            job.metadata.name,
            Some(job_name(&RunId::new("n", "p", "7")))
        );
        assert_eq!(job.metadata.namespace.as_deref(), Some("profiler"));

        let labels = job.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get(MANAGED_BY_LABEL).unwrap(), MANAGED_BY);
        assert_eq!(labels.get(TARGET_NAMESPACE_LABEL).unwrap(), "n");
        assert_eq!(labels.get(TARGET_POD_LABEL).unwrap(), "p");
        assert_eq!(labels.get(PID_LABEL).unwrap(), "7");
    }

    #[test]
    fn job_is_pinned_to_target_node() {
        let job = build();
        let spec = pod_spec(&job);
        assert_eq!(spec.node_name.as_deref(), Some("nodeA"));
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.service_account_name.as_deref(), Some("profiler-job"));
        assert_eq!(job.spec.as_ref().unwrap().backoff_limit, Some(0));
    }

    #[test]
    fn job_command_line() {
        let job = build();
        let container = &pod_spec(&job).containers[0];
        assert_eq!(container.name, "profiler-job");
        let command = container.command.as_ref().unwrap().join(" ");
        assert_eq!(
            command,
            "profiler --pid 7 --freq 10 --iter 1000 --pert 99 --out api:n.p.7 --mtype all"
        );
    }

    #[test]
    fn job_mounts_host_trees_read_only() {
        let job = build();
        let spec = pod_spec(&job);
        let volumes = spec.volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 2);
        let proc_dir = volumes[0].host_path.as_ref().unwrap();
        assert_eq!(volumes[0].name, "proc-dir");
        assert_eq!(proc_dir.path, "/proc");
        assert_eq!(proc_dir.type_.as_deref(), Some("Directory"));
        let cgroup = volumes[1].host_path.as_ref().unwrap();
        assert_eq!(volumes[1].name, "cgroup-dir");
        assert_eq!(cgroup.path, "/sys/fs/cgroup");

        let mounts = spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/tmp/proc");
        assert_eq!(mounts[1].mount_path, "/tmp/cgroup");
        assert!(mounts.iter().all(|m| m.read_only == Some(true)));
    }

    #[test]
    fn unscheduled_pod_is_rejected() {
        let mut pod = scheduled_pod("nodeA");
        pod.spec = Some(PodSpec::default());
        let err = build_profiling_job(
            &JobSettings::default(),
            &pod,
            &JobParam::default(),
            &RunId::new("n", "p", "7"),
        )
        .unwrap_err();
        assert!(matches!(err, AdapterError::Internal(_)));
    }

    #[test]
    fn policy_names() {
        let policy: DispatchPolicy =
            serde_json::from_str(r#"{"on_failure":"rollback","on_duplicate":"replace"}"#).unwrap();
        assert_eq!(policy.on_failure, FailurePolicy::Rollback);
        assert_eq!(policy.on_duplicate, DuplicatePolicy::Replace);
        assert_eq!(DispatchPolicy::default().on_failure, FailurePolicy::Retain);
    }

    #[tokio::test]
    async fn submit_and_withdraw() {
        let cluster = Arc::new(InMemoryCluster::new());
        let dispatcher = JobDispatcher::new(cluster.clone(), JobSettings::default());
        let run = RunId::new("n", "p", "7");
        let deadline = Deadline::after(Duration::from_secs(1));

        dispatcher
            .submit(&scheduled_pod("nodeA"), &JobParam::default(), &run, &deadline)
            .await
            .unwrap();
        assert!(cluster.job("profiler", &job_name(&run)).is_some());
        assert!(dispatcher.exists(&run, &deadline).await.unwrap());

        let err = dispatcher
            .submit(&scheduled_pod("nodeA"), &JobParam::default(), &run, &deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Conflict(_)));

        assert!(dispatcher.withdraw(&run, &deadline).await.unwrap());
        assert!(!dispatcher.withdraw(&run, &deadline).await.unwrap());
        assert!(!dispatcher.exists(&run, &deadline).await.unwrap());
    }

    #[tokio::test]
    async fn cluster_rejection_is_a_dispatch_failure() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.reject_job_creation(true);
        let dispatcher = JobDispatcher::new(cluster, JobSettings::default());
        let err = dispatcher
            .submit(
                &scheduled_pod("nodeA"),
                &JobParam::default(),
                &RunId::new("n", "p", "7"),
                &Deadline::after(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::DispatchFailure(_)));
    }
}
