//! Observability infrastructure for the profiler adapter
//!
//! Provides:
//! - Prometheus metrics (request outcomes, cluster call latency, dispatches, store size)
//! - Structured JSON logging of profiling run events with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for cluster API round trips (in seconds)
const CLUSTER_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AdapterMetricsInner> = OnceLock::new();

struct AdapterMetricsInner {
    requests_total: IntCounterVec,
    cluster_call_latency_seconds: HistogramVec,
    jobs_dispatched: IntCounter,
    dispatch_failures: IntCounter,
    store_entries: IntGauge,
    entries_evicted: IntCounter,
}

impl AdapterMetricsInner {
    fn new() -> Self {
        Self {
            requests_total: register_int_counter_vec!(
                "profiler_adapter_requests_total",
                "Profiling requests handled, by operation and outcome",
                &["operation", "outcome"]
            )
            .expect("Failed to register requests_total"),

            cluster_call_latency_seconds: register_histogram_vec!(
                "profiler_adapter_cluster_call_latency_seconds",
                "Time spent waiting on the cluster API",
                &["call"],
                CLUSTER_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cluster_call_latency_seconds"),

            jobs_dispatched: register_int_counter!(
                "profiler_adapter_jobs_dispatched_total",
                "Profiling jobs submitted to the cluster"
            )
            .expect("Failed to register jobs_dispatched"),

            dispatch_failures: register_int_counter!(
                "profiler_adapter_dispatch_failures_total",
                "Profiling job submissions that failed"
            )
            .expect("Failed to register dispatch_failures"),

            store_entries: register_int_gauge!(
                "profiler_adapter_store_entries",
                "Number of values held in the metric store"
            )
            .expect("Failed to register store_entries"),

            entries_evicted: register_int_counter!(
                "profiler_adapter_entries_evicted_total",
                "Store entries removed by the retention sweeper"
            )
            .expect("Failed to register entries_evicted"),
        }
    }
}

/// Handle to the process-wide adapter metrics.
///
/// Clones share the same underlying Prometheus collectors.
#[derive(Clone)]
pub struct AdapterMetrics {
    _private: (),
}

impl Default for AdapterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AdapterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &'static AdapterMetricsInner {
        GLOBAL_METRICS.get_or_init(AdapterMetricsInner::new)
    }

    pub fn record_request(&self, operation: &str, outcome: &str) {
        self.inner()
            .requests_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn observe_cluster_call(&self, call: &str, duration_secs: f64) {
        self.inner()
            .cluster_call_latency_seconds
            .with_label_values(&[call])
            .observe(duration_secs);
    }

    pub fn inc_jobs_dispatched(&self) {
        self.inner().jobs_dispatched.inc();
    }

    pub fn inc_dispatch_failures(&self) {
        self.inner().dispatch_failures.inc();
    }

    pub fn set_store_entries(&self, entries: i64) {
        self.inner().store_entries.set(entries);
    }

    pub fn inc_entries_evicted(&self, count: u64) {
        self.inner().entries_evicted.inc_by(count);
    }
}

/// Structured logger for profiling run events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_run_requested(&self, namespace: &str, pod: &str, pid: &str) {
        info!(
            event = "run_requested",
            instance = %self.instance,
            namespace = %namespace,
            pod = %pod,
            pid = %pid,
            "Profiling run requested"
        );
    }

    pub fn log_job_dispatched(&self, namespace: &str, pod: &str, pid: &str, job: &str, node: &str) {
        info!(
            event = "job_dispatched",
            instance = %self.instance,
            namespace = %namespace,
            pod = %pod,
            pid = %pid,
            job = %job,
            node = %node,
            "Profiling job created"
        );
    }

    pub fn log_dispatch_failed(
        &self,
        namespace: &str,
        pod: &str,
        pid: &str,
        error: &str,
        parameters_retained: bool,
    ) {
        warn!(
            event = "dispatch_failed",
            instance = %self.instance,
            namespace = %namespace,
            pod = %pod,
            pid = %pid,
            error = %error,
            parameters_retained = parameters_retained,
            "Failed to create profiling job"
        );
    }

    pub fn log_result_posted(&self, namespace: &str, pod: &str, pid: &str) {
        info!(
            event = "result_posted",
            instance = %self.instance,
            namespace = %namespace,
            pod = %pod,
            pid = %pid,
            "Profiling result stored"
        );
    }

    pub fn log_run_closed(&self, namespace: &str, pod: &str, pid: &str, entries: usize) {
        info!(
            event = "run_closed",
            instance = %self.instance,
            namespace = %namespace,
            pod = %pod,
            pid = %pid,
            entries = entries,
            "Profiling run closed"
        );
    }

    pub fn log_eviction(&self, entries: usize, retention: Duration) {
        info!(
            event = "runs_evicted",
            instance = %self.instance,
            entries = entries,
            retention_secs = retention.as_secs(),
            "Evicted expired profiling data"
        );
    }

    pub fn log_startup(&self, version: &str, port: u16) {
        info!(
            event = "adapter_started",
            instance = %self.instance,
            adapter_version = %version,
            port = port,
            "Profiler adapter started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "adapter_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Profiler adapter shutting down"
        );
    }
}
