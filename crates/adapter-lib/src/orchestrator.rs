//! Process-run lifecycle
//!
//! A run is keyed by (namespace, pod, pid) and lives in the metric store as
//! a parameter triple (`<pid>-freq/-iter/-pert`) and a result quadruple
//! (`<pid>-cpu/-ram/-ig/-eg`). Requesting a run validates the target, writes
//! the parameters and dispatches the profiling Job. The Job later posts its
//! result back. Both groups are written and read as single batches.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::cluster::{ClusterClient, Deadline};
use crate::dispatcher::{DispatchPolicy, DuplicatePolicy, FailurePolicy, JobDispatcher, JobSettings};
use crate::error::{AdapterError, Result};
use crate::models::{JobParam, JobResult, RunId};
use crate::observability::{AdapterMetrics, StructuredLogger};
use crate::quantity::Quantity;
use crate::store::{MetricKey, MetricStore};
use crate::validator::PodValidator;

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Budget shared by all cluster calls of one request
    pub cluster_timeout: Duration,
    pub policy: DispatchPolicy,
    pub job: JobSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            cluster_timeout: Duration::from_secs(10),
            policy: DispatchPolicy::default(),
            job: JobSettings::default(),
        }
    }
}

/// Releases the in-flight claim of a run when dropped
struct RunClaim<'a> {
    claims: &'a DashMap<RunId, ()>,
    run: RunId,
}

impl Drop for RunClaim<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.run);
    }
}

/// Orchestrates profiling runs over the store and the cluster
pub struct ProcessRuns {
    store: Arc<MetricStore>,
    validator: PodValidator,
    dispatcher: JobDispatcher,
    in_flight: DashMap<RunId, ()>,
    config: RunConfig,
    metrics: AdapterMetrics,
    logger: StructuredLogger,
}

impl ProcessRuns {
    pub fn new(
        store: Arc<MetricStore>,
        cluster: Arc<dyn ClusterClient>,
        config: RunConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            validator: PodValidator::new(cluster.clone()),
            dispatcher: JobDispatcher::new(cluster, config.job.clone()),
            in_flight: DashMap::new(),
            config,
            metrics: AdapterMetrics::new(),
            logger,
        }
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.config.cluster_timeout)
    }

    fn claim(&self, run: &RunId) -> Result<RunClaim<'_>> {
        match self.in_flight.entry(run.clone()) {
            Entry::Occupied(_) => Err(AdapterError::conflict(format!(
                "a run for {} is already in progress",
                run
            ))),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(RunClaim {
                    claims: &self.in_flight,
                    run: run.clone(),
                })
            }
        }
    }

    fn record<T>(&self, operation: &str, outcome: &Result<T>) {
        let label = match outcome {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        self.metrics.record_request(operation, label);
    }

    /// Validate the target, store the parameters and dispatch the Job
    pub async fn run_job(
        &self,
        namespace: &str,
        pod: &str,
        pid: &str,
        params: JobParam,
    ) -> Result<String> {
        let outcome = self.start_run(RunId::new(namespace, pod, pid), params).await;
        self.record("run_job", &outcome);
        outcome
    }

    async fn start_run(&self, run: RunId, params: JobParam) -> Result<String> {
        params.validate()?;
        self.logger
            .log_run_requested(&run.namespace, &run.pod, &run.pid);

        let _claim = self.claim(&run)?;
        let deadline = self.deadline();
        let target = self
            .validator
            .validate(&run.namespace, &run.pod, &deadline)
            .await?;

        if self.dispatcher.exists(&run, &deadline).await? {
            match self.config.policy.on_duplicate {
                DuplicatePolicy::Reject => {
                    return Err(AdapterError::conflict(format!(
                        "a profiling job for {} already exists",
                        run
                    )))
                }
                DuplicatePolicy::Replace => {
                    self.dispatcher.withdraw(&run, &deadline).await?;
                }
            }
        }

        let keys = run.param_keys();
        let values = [params.frequency, params.iteration, params.percentile]
            .map(|v| Quantity::from_int(i64::from(v)));
        self.store
            .put_many(keys.iter().cloned().zip(values).collect())
            .await?;

        match self
            .dispatcher
            .submit(&target, &params, &run, &deadline)
            .await
        {
            Ok(job) => {
                self.metrics.inc_jobs_dispatched();
                let node = job
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.template.spec.as_ref())
                    .and_then(|spec| spec.node_name.as_deref())
                    .unwrap_or_default();
                self.logger.log_job_dispatched(
                    &run.namespace,
                    &run.pod,
                    &run.pid,
                    job.metadata.name.as_deref().unwrap_or_default(),
                    node,
                );
                Ok(format!(
                    "Running profiler: {} {} {}",
                    run.namespace, run.pod, run.pid
                ))
            }
            Err(err) => {
                self.metrics.inc_dispatch_failures();
                let retained = match self.config.policy.on_failure {
                    FailurePolicy::Retain => true,
                    FailurePolicy::Rollback => match self.store.remove_many(&keys).await {
                        Ok(_) => false,
                        Err(rollback_err) => {
                            warn!(
                                run = %run,
                                error = %rollback_err,
                                "Failed to roll back profiling parameters"
                            );
                            true
                        }
                    },
                };
                self.logger.log_dispatch_failed(
                    &run.namespace,
                    &run.pod,
                    &run.pid,
                    &err.to_string(),
                    retained,
                );
                Err(err)
            }
        }
    }

    /// Read the stored parameter triple; any missing member is `NotFound`
    pub async fn get_parameter(&self, namespace: &str, pod: &str, pid: &str) -> Result<JobParam> {
        let run = RunId::new(namespace, pod, pid);
        let outcome = self.read_parameter(&run).await;
        self.record("get_parameter", &outcome);
        outcome
    }

    async fn read_parameter(&self, run: &RunId) -> Result<JobParam> {
        let values = self.read_all(run, &run.param_keys()).await?;
        let as_u32 = |q: &Quantity| {
            u32::try_from(q.value()).map_err(|_| {
                AdapterError::internal(format!("stored parameter {} of {} is out of range", q, run))
            })
        };
        Ok(JobParam::new(
            as_u32(&values[0])?,
            as_u32(&values[1])?,
            as_u32(&values[2])?,
        ))
    }

    async fn read_all(&self, run: &RunId, keys: &[MetricKey]) -> Result<Vec<Quantity>> {
        let values = self.store.get_many(keys).await?;
        values
            .into_iter()
            .zip(keys)
            .map(|(value, key)| {
                value.ok_or_else(|| {
                    AdapterError::not_found(format!(
                        "metric {} not found for run {}",
                        key.info.metric, run
                    ))
                })
            })
            .collect()
    }

    /// Store the result posted back for `namespace.pod.pid`
    pub async fn put_result(&self, result_id: &str, result: &JobResult) -> Result<String> {
        let outcome = self.store_result(result_id, result).await;
        self.record("put_result", &outcome);
        outcome
    }

    async fn store_result(&self, result_id: &str, result: &JobResult) -> Result<String> {
        let run = RunId::parse_result_id(result_id)?;
        self.validator
            .validate(&run.namespace, &run.pod, &self.deadline())
            .await?;

        let fields = [
            ("cpu", &result.cpu),
            ("ram", &result.ram),
            ("ingress", &result.ingress),
            ("egress", &result.egress),
        ];
        let mut values = Vec::with_capacity(fields.len());
        for (field, raw) in fields {
            let value: Quantity = raw.parse().map_err(|err| {
                AdapterError::internal(format!("invalid {} quantity {:?}: {}", field, raw, err))
            })?;
            values.push(value);
        }

        self.store
            .put_many(run.result_keys().into_iter().zip(values).collect())
            .await?;
        self.logger
            .log_result_posted(&run.namespace, &run.pod, &run.pid);
        Ok(format!("Put profiler result: {}", run))
    }

    /// Read the stored result quadruple; any missing member is `NotFound`
    pub async fn get_result(&self, namespace: &str, pod: &str, pid: &str) -> Result<JobResult> {
        let run = RunId::new(namespace, pod, pid);
        let outcome = self
            .read_all(&run, &run.result_keys())
            .await
            .map(|values| JobResult {
                cpu: values[0].to_string(),
                ram: values[1].to_string(),
                ingress: values[2].to_string(),
                egress: values[3].to_string(),
            });
        self.record("get_result", &outcome);
        outcome
    }

    /// Forget a run: drop its stored entries and delete its Job if one is
    /// left. `NotFound` when there was neither.
    pub async fn close_run(&self, namespace: &str, pod: &str, pid: &str) -> Result<String> {
        let run = RunId::new(namespace, pod, pid);
        let outcome = self.remove_run(&run).await;
        self.record("close_run", &outcome);
        outcome
    }

    async fn remove_run(&self, run: &RunId) -> Result<String> {
        let _claim = self.claim(run)?;
        let mut keys = run.param_keys();
        keys.extend(run.result_keys());
        let removed = self.store.remove_many(&keys).await?;

        let withdrawn = match self.dispatcher.withdraw(run, &self.deadline()).await {
            Ok(deleted) => deleted,
            Err(err) => {
                warn!(run = %run, error = %err, "Failed to delete profiling job");
                false
            }
        };

        if removed == 0 && !withdrawn {
            return Err(AdapterError::not_found(format!("no profiling run {}", run)));
        }
        self.logger
            .log_run_closed(&run.namespace, &run.pod, &run.pid, removed);
        Ok(format!("Closed profiler run: {}", run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::dispatcher::job_name;
    use crate::mapper::{GroupResource, ResourceMapper, ResourceMapping, StaticResourceMapper};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolves the first `budget` lookups, then fails every later one
    struct ExhaustibleMapper {
        inner: StaticResourceMapper,
        budget: AtomicUsize,
    }

    impl ResourceMapper for ExhaustibleMapper {
        fn resolve(&self, resource: &GroupResource) -> Result<ResourceMapping> {
            let left = self.budget.load(Ordering::SeqCst);
            if left == 0 {
                return Err(AdapterError::Internal("mapper unavailable".to_string()));
            }
            self.budget.store(left - 1, Ordering::SeqCst);
            self.inner.resolve(resource)
        }
    }

    fn setup_with(config: RunConfig) -> (Arc<InMemoryCluster>, Arc<ProcessRuns>) {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.add_namespace("n");
        cluster.add_pod("n", "p", Some("nodeA"), &[("app", "web")]);
        let store = Arc::new(MetricStore::new(Arc::new(StaticResourceMapper::new())));
        let runs = ProcessRuns::new(store, cluster.clone(), config, StructuredLogger::new("test"));
        (cluster, Arc::new(runs))
    }

    fn setup() -> (Arc<InMemoryCluster>, Arc<ProcessRuns>) {
        setup_with(RunConfig::default())
    }

    fn result() -> JobResult {
        JobResult {
            cpu: "150m".to_string(),
            ram: "256Mi".to_string(),
            ingress: "10k".to_string(),
            egress: "5k".to_string(),
        }
    }

    #[tokio::test]
    async fn test_run_then_read_parameters() {
        let (cluster, runs) = setup();
        let ack = runs
            .run_job("n", "p", "7", JobParam::new(10, 1000, 99))
            .await
            .unwrap();
        assert_eq!(ack, "Running profiler: n p 7");

        let params = runs.get_parameter("n", "p", "7").await.unwrap();
        assert_eq!(params, JobParam::new(10, 1000, 99));

        let job = cluster
            .job("profiler", &job_name(&RunId::new("n", "p", "7")))
            .unwrap();
        let spec = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(spec.node_name.as_deref(), Some("nodeA"));
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let (_, runs) = setup();
        assert!(runs.get_parameter("n", "p", "9").await.unwrap_err().is_not_found());
        assert!(runs.get_result("n", "p", "9").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_partial_parameters_are_not_found() {
        let (_, runs) = setup();
        let run = RunId::new("n", "p", "7");
        runs.store()
            .put(run.key("freq"), Quantity::from_int(10))
            .await
            .unwrap();
        assert!(runs.get_parameter("n", "p", "7").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_missing_target_writes_nothing() {
        let (cluster, runs) = setup();
        let err = runs
            .run_job("n", "ghost", "7", JobParam::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(runs.store().is_empty().await);
        assert!(cluster.jobs().is_empty());

        let err = runs.put_result("n.ghost.7", &result()).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(runs.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_parameters_are_malformed() {
        let (_, runs) = setup();
        let err = runs
            .run_job("n", "p", "7", JobParam::new(0, 1000, 99))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::MalformedRequest(_)));
        assert!(runs.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_result_round_trip() {
        let (_, runs) = setup();
        let ack = runs.put_result("n.p.7", &result()).await.unwrap();
        assert_eq!(ack, "Put profiler result: n.p.7");
        assert_eq!(runs.get_result("n", "p", "7").await.unwrap(), result());
    }

    #[tokio::test]
    async fn test_result_without_parameters_is_accepted() {
        let (_, runs) = setup();
        runs.put_result("n.p.8", &result()).await.unwrap();
        assert!(runs.get_parameter("n", "p", "8").await.unwrap_err().is_not_found());
        assert!(runs.get_result("n", "p", "8").await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_result_id() {
        let (_, runs) = setup();
        let err = runs.put_result("n.p", &result()).await.unwrap_err();
        assert!(matches!(err, AdapterError::MalformedRequest(_)));
        assert!(runs.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_bad_quantity_writes_nothing() {
        let (_, runs) = setup();
        let mut bad = result();
        bad.egress = "lots".to_string();
        let err = runs.put_result("n.p.7", &bad).await.unwrap_err();
        assert!(matches!(err, AdapterError::Internal(_)));
        assert!(runs.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_dispatch_failure_retains_parameters() {
        let (cluster, runs) = setup();
        cluster.reject_job_creation(true);
        let err = runs
            .run_job("n", "p", "7", JobParam::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::DispatchFailure(_)));
        assert_eq!(
            runs.get_parameter("n", "p", "7").await.unwrap(),
            JobParam::default()
        );
    }

    #[tokio::test]
    async fn test_dispatch_failure_rolls_back_parameters() {
        let (cluster, runs) = setup_with(RunConfig {
            policy: DispatchPolicy {
                on_failure: FailurePolicy::Rollback,
                ..Default::default()
            },
            ..Default::default()
        });
        cluster.reject_job_creation(true);
        let err = runs
            .run_job("n", "p", "7", JobParam::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::DispatchFailure(_)));
        assert!(runs.get_parameter("n", "p", "7").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_failed_rollback_still_reports_dispatch_failure() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.add_namespace("n");
        cluster.add_pod("n", "p", Some("nodeA"), &[]);
        cluster.reject_job_creation(true);
        // Enough lookups for the three parameter writes, none for the rollback.
        let mapper = ExhaustibleMapper {
            inner: StaticResourceMapper::new(),
            budget: AtomicUsize::new(3),
        };
        let store = Arc::new(MetricStore::new(Arc::new(mapper)));
        let runs = ProcessRuns::new(
            store.clone(),
            cluster,
            RunConfig {
                policy: DispatchPolicy {
                    on_failure: FailurePolicy::Rollback,
                    ..Default::default()
                },
                ..Default::default()
            },
            StructuredLogger::new("test"),
        );

        let err = runs
            .run_job("n", "p", "7", JobParam::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::DispatchFailure(_)));
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_same_pod_name_in_two_namespaces() {
        let (cluster, runs) = setup();
        cluster.add_namespace("m");
        cluster.add_pod("m", "p", Some("nodeB"), &[]);

        runs.run_job("n", "p", "7", JobParam::new(10, 1000, 99))
            .await
            .unwrap();
        runs.run_job("m", "p", "7", JobParam::new(20, 500, 90))
            .await
            .unwrap();
        assert_eq!(cluster.jobs().len(), 2);

        runs.close_run("m", "p", "7").await.unwrap();
        assert!(cluster
            .job("profiler", &job_name(&RunId::new("n", "p", "7")))
            .is_some());
        assert!(cluster
            .job("profiler", &job_name(&RunId::new("m", "p", "7")))
            .is_none());
        assert_eq!(
            runs.get_parameter("n", "p", "7").await.unwrap(),
            JobParam::new(10, 1000, 99)
        );
        assert!(runs.close_run("m", "p", "7").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_existing_job_is_rejected() {
        let (cluster, runs) = setup();
        runs.run_job("n", "p", "7", JobParam::new(10, 1000, 99))
            .await
            .unwrap();
        let err = runs
            .run_job("n", "p", "7", JobParam::new(20, 500, 90))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Conflict(_)));
        assert_eq!(
            runs.get_parameter("n", "p", "7").await.unwrap(),
            JobParam::new(10, 1000, 99)
        );
        assert_eq!(cluster.jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_existing_job_is_replaced() {
        let (cluster, runs) = setup_with(RunConfig {
            policy: DispatchPolicy {
                on_duplicate: DuplicatePolicy::Replace,
                ..Default::default()
            },
            ..Default::default()
        });
        runs.run_job("n", "p", "7", JobParam::new(10, 1000, 99))
            .await
            .unwrap();
        runs.run_job("n", "p", "7", JobParam::new(20, 500, 90))
            .await
            .unwrap();
        assert_eq!(
            runs.get_parameter("n", "p", "7").await.unwrap(),
            JobParam::new(20, 500, 90)
        );

        let jobs = cluster.jobs();
        assert_eq!(jobs.len(), 1);
        let command = jobs[0].spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .command
            .clone()
            .unwrap()
            .join(" ");
        assert!(command.contains("--freq 20"));
    }

    #[tokio::test]
    async fn test_concurrent_request_for_same_run_conflicts() {
        let (cluster, runs) = setup();
        cluster.set_latency(Duration::from_millis(50));

        let first = tokio::spawn({
            let runs = runs.clone();
            async move { runs.run_job("n", "p", "7", JobParam::default()).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = runs.run_job("n", "p", "7", JobParam::default()).await;

        assert!(matches!(second, Err(AdapterError::Conflict(_))));
        assert!(first.await.unwrap().is_ok());
        assert_eq!(cluster.jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_runs_for_distinct_pids() {
        let (cluster, runs) = setup();
        let mut handles = Vec::new();
        for pid in 1..=20u32 {
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                runs.run_job("n", "p", &pid.to_string(), JobParam::new(pid, pid * 10, 50))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for pid in 1..=20u32 {
            let params = runs.get_parameter("n", "p", &pid.to_string()).await.unwrap();
            assert_eq!(params, JobParam::new(pid, pid * 10, 50));
        }
        assert_eq!(cluster.jobs().len(), 20);
    }

    #[tokio::test]
    async fn test_slow_cluster_times_out() {
        let (cluster, runs) = setup_with(RunConfig {
            cluster_timeout: Duration::from_millis(20),
            ..Default::default()
        });
        cluster.set_latency(Duration::from_millis(100));
        let err = runs
            .run_job("n", "p", "7", JobParam::default())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(runs.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_close_run() {
        let (cluster, runs) = setup();
        runs.run_job("n", "p", "7", JobParam::default()).await.unwrap();
        runs.put_result("n.p.7", &result()).await.unwrap();

        let ack = runs.close_run("n", "p", "7").await.unwrap();
        assert_eq!(ack, "Closed profiler run: n.p.7");
        assert!(runs.store().is_empty().await);
        assert!(cluster.jobs().is_empty());

        assert!(runs.close_run("n", "p", "7").await.unwrap_err().is_not_found());

        runs.run_job("n", "p", "7", JobParam::default()).await.unwrap();
    }
}
