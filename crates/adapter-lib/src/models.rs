//! Profiling run data model

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AdapterError, Result};
use crate::store::{MetricInfo, MetricKey, NamespacedName};

fn default_frequency() -> u32 {
    10
}

fn default_iteration() -> u32 {
    1000
}

fn default_percentile() -> u32 {
    99
}

/// Sampling configuration for one profiling run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParam {
    /// Frequency of queries
    #[serde(rename = "freq", default = "default_frequency")]
    pub frequency: u32,
    /// Number of query iterations
    #[serde(rename = "iter", default = "default_iteration")]
    pub iteration: u32,
    /// Percentile reported by the analysis
    #[serde(rename = "pert", default = "default_percentile")]
    pub percentile: u32,
}

impl Default for JobParam {
    fn default() -> Self {
        Self {
            frequency: default_frequency(),
            iteration: default_iteration(),
            percentile: default_percentile(),
        }
    }
}

impl JobParam {
    pub fn new(frequency: u32, iteration: u32, percentile: u32) -> Self {
        Self {
            frequency,
            iteration,
            percentile,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.frequency == 0 {
            return Err(AdapterError::malformed("freq must be greater than zero"));
        }
        if self.iteration == 0 {
            return Err(AdapterError::malformed("iter must be greater than zero"));
        }
        if !(1..=100).contains(&self.percentile) {
            return Err(AdapterError::malformed("pert must be between 1 and 100"));
        }
        Ok(())
    }
}

/// Measured resource usage, as quantity strings usable in a pod spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub cpu: String,
    pub ram: String,
    pub ingress: String,
    pub egress: String,
}

/// Parameter metric suffixes, in `freq, iter, pert` order
pub const PARAM_SUFFIXES: [&str; 3] = ["freq", "iter", "pert"];

/// Result metric suffixes, in `cpu, ram, ingress, egress` order
pub const RESULT_SUFFIXES: [&str; 4] = ["cpu", "ram", "ig", "eg"];

/// Identity of a profiling run: one process inside one pod
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId {
    pub namespace: String,
    pub pod: String,
    pub pid: String,
}

impl RunId {
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>, pid: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            pid: pid.into(),
        }
    }

    /// Parse a dot-joined `namespace.pod.pid` result identifier.
    ///
    /// Namespaces and process ids never contain dots but pod names may, so
    /// the first segment is the namespace, the last the pid and everything in
    /// between the pod.
    pub fn parse_result_id(raw: &str) -> Result<Self> {
        let malformed =
            || AdapterError::malformed(format!("result id {:?} is not namespace.pod.pid", raw));

        let (namespace, rest) = raw.split_once('.').ok_or_else(malformed)?;
        let (pod, pid) = rest.rsplit_once('.').ok_or_else(malformed)?;
        if namespace.is_empty() || pod.is_empty() || pid.is_empty() {
            return Err(malformed());
        }
        Ok(Self::new(namespace, pod, pid))
    }

    pub fn namespaced_name(&self) -> NamespacedName {
        NamespacedName::new(self.namespace.clone(), self.pod.clone())
    }

    /// Store key of one of this run's metrics, e.g. `7-freq`
    pub fn key(&self, suffix: &str) -> MetricKey {
        MetricKey::new(
            MetricInfo::pods(format!("{}-{}", self.pid, suffix)),
            self.namespaced_name(),
        )
    }

    pub fn param_keys(&self) -> Vec<MetricKey> {
        PARAM_SUFFIXES.iter().map(|s| self.key(s)).collect()
    }

    pub fn result_keys(&self) -> Vec<MetricKey> {
        RESULT_SUFFIXES.iter().map(|s| self.key(s)).collect()
    }

    /// Where the profiling job posts its result back to
    pub fn sink_address(&self) -> String {
        format!("api:{}", self)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.namespace, self.pod, self.pid)
    }
}
