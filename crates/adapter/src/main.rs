//! Profiler Adapter - per-process profiling for Kubernetes pods
//!
//! This binary runs in the cluster, dispatches profiling Jobs next to the
//! pods it is asked about and serves their results through the custom
//! metrics API.

use adapter_lib::{
    api::{self, AppState},
    cluster::{ClusterClient, KubeClusterClient},
    health::{components, HealthRegistry},
    mapper::{ResourceMapper, StaticResourceMapper},
    observability::{AdapterMetrics, StructuredLogger},
    orchestrator::ProcessRuns,
    provider::MetricsProvider,
    store::{MetricStore, RetentionSweeper},
};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const ADAPTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting profiler-adapter");

    let config = config::AdapterConfig::load()?;
    info!(
        instance = %config.instance,
        job_namespace = %config.job.namespace,
        on_failure = ?config.dispatch.on_failure,
        on_duplicate = ?config.dispatch.on_duplicate,
        "Adapter configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::STORE).await;
    health_registry.register(components::CLUSTER).await;

    let metrics = AdapterMetrics::new();
    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(ADAPTER_VERSION, config.api_port);

    let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::try_default().await?);
    let mapper: Arc<dyn ResourceMapper> = Arc::new(StaticResourceMapper::new());
    let store = Arc::new(MetricStore::new(mapper.clone()));

    let runs = Arc::new(ProcessRuns::new(
        store.clone(),
        cluster.clone(),
        config.run_config(),
        logger.clone(),
    ));
    let provider = Arc::new(MetricsProvider::new(
        store.clone(),
        mapper,
        cluster,
        config.cluster_timeout(),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);

    if let Some(retention) = config.retention() {
        let sweeper = RetentionSweeper::new(
            store,
            retention,
            config.sweep_interval(),
            logger.clone(),
        );
        tokio::spawn(sweeper.run(shutdown_tx.subscribe()));
    }

    let app_state = Arc::new(AppState::new(runs, provider, health_registry.clone(), metrics));

    // Mark adapter as ready after initialization
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        config.base_path.clone(),
        app_state,
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    let _ = shutdown_tx.send(());
    api_handle.await??;

    Ok(())
}
