//! `custom.metrics.k8s.io/v1beta2` query endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use super::AppState;
use crate::error::AdapterError;
use crate::mapper::GroupResource;
use crate::provider::types::{APIResourceList, MetricValueList};
use crate::selector::LabelSelector;
use crate::store::{MetricInfo, NamespacedName};

pub const CUSTOM_METRICS_PREFIX: &str = "/apis/custom.metrics.k8s.io/v1beta2";

/// Metrics API errors: a missing metric or resource is a 404 here
struct MetricsApiError(AdapterError);

impl From<AdapterError> for MetricsApiError {
    fn from(err: AdapterError) -> Self {
        Self(err)
    }
}

impl IntoResponse for MetricsApiError {
    fn into_response(self) -> Response {
        match self.0 {
            AdapterError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            other => other.into_response(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectorQuery {
    label_selector: Option<String>,
    metric_label_selector: Option<String>,
}

fn parse_selector(raw: Option<&str>) -> Result<LabelSelector, AdapterError> {
    raw.map(str::parse::<LabelSelector>)
        .transpose()
        .map(Option::unwrap_or_default)
}

async fn list_metrics(State(state): State<Arc<AppState>>) -> Json<APIResourceList> {
    Json(state.provider.api_resources().await)
}

async fn get_namespaced_metric(
    State(state): State<Arc<AppState>>,
    Path((namespace, resource, name, metric)): Path<(String, String, String, String)>,
    Query(query): Query<SelectorQuery>,
) -> Result<Json<MetricValueList>, MetricsApiError> {
    let info = MetricInfo::new(GroupResource::parse(&resource), true, metric);
    let metric_selector = parse_selector(query.metric_label_selector.as_deref())?;

    if name == "*" {
        let selector = parse_selector(query.label_selector.as_deref())?;
        let outcome = state
            .provider
            .get_metric_by_selector(&namespace, &selector, info, &metric_selector)
            .await;
        state.health_registry.record_cluster_outcome(&outcome).await;
        return Ok(Json(outcome?));
    }

    let value = state
        .provider
        .get_metric_by_name(NamespacedName::new(namespace, name), info, &metric_selector)
        .await?;
    Ok(Json(MetricValueList::new(vec![value])))
}

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(CUSTOM_METRICS_PREFIX, get(list_metrics))
        .route(&format!("{}/", CUSTOM_METRICS_PREFIX), get(list_metrics))
        .route(
            &format!(
                "{}/namespaces/:namespace/:resource/:name/:metric",
                CUSTOM_METRICS_PREFIX
            ),
            get(get_namespaced_metric),
        )
}
