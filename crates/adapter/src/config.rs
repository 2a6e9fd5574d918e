//! Adapter configuration

use adapter_lib::dispatcher::{DispatchPolicy, JobSettings};
use adapter_lib::orchestrator::RunConfig;
use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

/// Adapter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    /// Instance name attached to structured log events
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Port for the profiling, custom metrics and health endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Mount point of the profiling endpoints
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Budget for the cluster calls of one request
    #[serde(default = "default_cluster_timeout")]
    pub cluster_timeout_secs: u64,

    /// Age after which stored values are evicted, unset keeps them forever
    #[serde(default)]
    pub retention_secs: Option<u64>,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default)]
    pub job: JobSettings,

    #[serde(default)]
    pub dispatch: DispatchPolicy,
}

fn default_instance() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| "profiler-adapter".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_base_path() -> String {
    "/profiler".to_string()
}

fn default_cluster_timeout() -> u64 {
    10
}

fn default_sweep_interval() -> u64 {
    60
}

impl AdapterConfig {
    /// Load configuration from an optional file (`ADAPTER_CONFIG`) overlaid
    /// with `ADAPTER_*` environment variables, `__` separating nested keys
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var("ADAPTER_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("ADAPTER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn cluster_timeout(&self) -> Duration {
        Duration::from_secs(self.cluster_timeout_secs)
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            cluster_timeout: self.cluster_timeout(),
            policy: self.dispatch,
            job: self.job.clone(),
        }
    }
}
