//! HTTP surfaces: profiling runs, custom metrics queries, health and
//! Prometheus metrics

mod custom_metrics;
mod health;
mod profiling;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::error::AdapterError;
use crate::health::HealthRegistry;
use crate::observability::AdapterMetrics;
use crate::orchestrator::ProcessRuns;
use crate::provider::MetricsProvider;

pub use custom_metrics::CUSTOM_METRICS_PREFIX;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub runs: Arc<ProcessRuns>,
    pub provider: Arc<MetricsProvider>,
    pub health_registry: HealthRegistry,
    pub metrics: AdapterMetrics,
}

impl AppState {
    pub fn new(
        runs: Arc<ProcessRuns>,
        provider: Arc<MetricsProvider>,
        health_registry: HealthRegistry,
        metrics: AdapterMetrics,
    ) -> Self {
        Self {
            runs,
            provider,
            health_registry,
            metrics,
        }
    }
}

impl AdapterError {
    /// Status on the profiling surface, where every client-side failure
    /// including a missing target or value is a 400
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) | Self::Kube(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DispatchFailure(_) => StatusCode::BAD_GATEWAY,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for AdapterError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "Request failed");
        }
        (status, self.to_string()).into_response()
    }
}

/// Create the API router with the profiling surface mounted at `base_path`
pub fn create_router(state: Arc<AppState>, base_path: &str) -> Router {
    let base_path = base_path.trim_end_matches('/');
    let profiling = profiling::routes();

    let router = if base_path.is_empty() {
        Router::new().merge(profiling)
    } else {
        Router::new().nest(base_path, profiling)
    };

    router
        .merge(custom_metrics::routes())
        .merge(health::routes())
        .with_state(state)
}

/// Serve until a shutdown signal arrives
pub async fn serve(
    port: u16,
    base_path: String,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state, &base_path);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, base_path = %base_path, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
