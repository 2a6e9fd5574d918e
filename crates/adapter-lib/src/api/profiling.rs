//! Profiling run endpoints
//!
//! | Method | Path                        | Operation     |
//! |--------|-----------------------------|---------------|
//! | POST   | `/:namespace/:pod/:process` | run_job       |
//! | GET    | `/:namespace/:pod/:process` | get_result    |
//! | DELETE | `/:namespace/:pod/:process` | close_run     |
//! | GET    | `/:namespace/:pod/:process/param` | get_parameter |
//! | POST   | `/:result_id`               | put_result    |

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use super::AppState;
use crate::error::{AdapterError, Result};
use crate::models::{JobParam, JobResult};

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|err| AdapterError::malformed(format!("invalid request body: {}", err)))
}

async fn run_job(
    State(state): State<Arc<AppState>>,
    Path((namespace, pod, process)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<String> {
    let params: JobParam = parse_body(&body)?;
    let outcome = state.runs.run_job(&namespace, &pod, &process, params).await;
    state.health_registry.record_cluster_outcome(&outcome).await;
    outcome
}

async fn get_parameter(
    State(state): State<Arc<AppState>>,
    Path((namespace, pod, process)): Path<(String, String, String)>,
) -> Result<Json<JobParam>> {
    state
        .runs
        .get_parameter(&namespace, &pod, &process)
        .await
        .map(Json)
}

async fn put_result(
    State(state): State<Arc<AppState>>,
    Path(result_id): Path<String>,
    body: Bytes,
) -> Result<String> {
    let result: JobResult = parse_body(&body)?;
    let outcome = state.runs.put_result(&result_id, &result).await;
    state.health_registry.record_cluster_outcome(&outcome).await;
    outcome
}

async fn get_result(
    State(state): State<Arc<AppState>>,
    Path((namespace, pod, process)): Path<(String, String, String)>,
) -> Result<Json<JobResult>> {
    state
        .runs
        .get_result(&namespace, &pod, &process)
        .await
        .map(Json)
}

async fn close_run(
    State(state): State<Arc<AppState>>,
    Path((namespace, pod, process)): Path<(String, String, String)>,
) -> Result<String> {
    let outcome = state.runs.close_run(&namespace, &pod, &process).await;
    state.health_registry.record_cluster_outcome(&outcome).await;
    outcome
}

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:result_id", post(put_result))
        .route(
            "/:namespace/:pod/:process",
            post(run_job).get(get_result).delete(close_run),
        )
        .route("/:namespace/:pod/:process/param", get(get_parameter))
}
