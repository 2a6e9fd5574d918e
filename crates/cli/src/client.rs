//! API client for the profiler adapter

use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("API URL {0} cannot carry a path")]
    NotABase(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The adapter answered with a non-success status
    #[error("API error ({status}): {message}")]
    Status { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// API client for the adapter's profiling and custom metrics endpoints
pub struct ApiClient {
    client: Client,
    base_url: Url,
    base_path: Vec<String>,
}

impl ApiClient {
    /// Create a new API client. `base_path` is where the adapter mounts
    /// its profiling endpoints.
    pub fn new(base_url: &str, base_path: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::NotABase(base_url.to_string()));
        }

        let base_path = base_path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            client,
            base_url,
            base_path,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::NotABase(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn profiling_url(&self, tail: &[&str]) -> Result<Url> {
        let mut segments: Vec<&str> = self.base_path.iter().map(String::as_str).collect();
        segments.extend_from_slice(tail);
        self.url(&segments)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }
        Ok(response)
    }

    async fn text(&self, request: RequestBuilder) -> Result<String> {
        Ok(self.send(request).await?.text().await?)
    }

    async fn json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        Ok(self.send(self.client.get(url)).await?.json().await?)
    }

    /// Start a profiling run, returning the adapter's acknowledgement
    pub async fn run_job(
        &self,
        namespace: &str,
        pod: &str,
        pid: &str,
        params: &JobParams,
    ) -> Result<String> {
        let url = self.profiling_url(&[namespace, pod, pid])?;
        self.text(self.client.post(url).json(params)).await
    }

    pub async fn get_params(&self, namespace: &str, pod: &str, pid: &str) -> Result<JobParams> {
        self.json(self.profiling_url(&[namespace, pod, pid, "param"])?)
            .await
    }

    pub async fn get_result(&self, namespace: &str, pod: &str, pid: &str) -> Result<JobResult> {
        self.json(self.profiling_url(&[namespace, pod, pid])?).await
    }

    pub async fn close_run(&self, namespace: &str, pod: &str, pid: &str) -> Result<String> {
        let url = self.profiling_url(&[namespace, pod, pid])?;
        self.text(self.client.delete(url)).await
    }

    pub async fn list_metrics(&self) -> Result<MetricResourceList> {
        self.json(self.url(&CUSTOM_METRICS_PATH)?).await
    }

    pub async fn get_metric(
        &self,
        namespace: &str,
        resource: &str,
        name: &str,
        metric: &str,
        selector: Option<&str>,
    ) -> Result<MetricValueList> {
        let mut segments: Vec<&str> = CUSTOM_METRICS_PATH.to_vec();
        segments.extend_from_slice(&["namespaces", namespace, resource, name, metric]);
        let mut url = self.url(&segments)?;
        if let Some(selector) = selector {
            url.query_pairs_mut().append_pair("labelSelector", selector);
        }
        self.json(url).await
    }
}

const CUSTOM_METRICS_PATH: [&str; 3] = ["apis", "custom.metrics.k8s.io", "v1beta2"];

// API response types

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParams {
    pub freq: u32,
    pub iter: u32,
    pub pert: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub cpu: String,
    pub ram: String,
    pub ingress: String,
    pub egress: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricResource {
    pub name: String,
    pub namespaced: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricResourceList {
    pub group_version: String,
    pub resources: Vec<MetricResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribedObject {
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricName {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValue {
    pub described_object: DescribedObject,
    pub metric: MetricName,
    pub timestamp: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricValueList {
    pub items: Vec<MetricValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_run_job_posts_params() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/profiler/n/p/7")
            .match_body(Matcher::Json(serde_json::json!({"freq": 10, "iter": 1000, "pert": 99})))
            .with_status(200)
            .with_body("Running profiler: n p 7")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), "/profiler").unwrap();
        let params = JobParams {
            freq: 10,
            iter: 1000,
            pert: 99,
        };
        let ack = client.run_job("n", "p", "7", &params).await.unwrap();

        assert_eq!(ack, "Running profiler: n p 7");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_carries_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/profiler/n/p/7/param")
            .with_status(400)
            .with_body("metric 7-freq not found for run n.p.7")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), "/profiler").unwrap();
        let err = client.get_params("n", "p", "7").await.unwrap_err();

        match err {
            ApiError::Status { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("7-freq"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_result_and_close() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/profiler/n/p/7")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"cpu":"150m","ram":"256Mi","ingress":"10k","egress":"5k"}"#)
            .create_async()
            .await;
        server
            .mock("DELETE", "/profiler/n/p/7")
            .with_status(200)
            .with_body("Closed profiler run: n.p.7")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), "profiler/").unwrap();
        let result = client.get_result("n", "p", "7").await.unwrap();
        assert_eq!(result.ram, "256Mi");

        let ack = client.close_run("n", "p", "7").await.unwrap();
        assert_eq!(ack, "Closed profiler run: n.p.7");
    }

    #[tokio::test]
    async fn test_get_metric_by_selector() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "GET",
                "/apis/custom.metrics.k8s.io/v1beta2/namespaces/n/pods/*/7-cpu",
            )
            .match_query(Matcher::UrlEncoded("labelSelector".into(), "app=web".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"kind":"MetricValueList","items":[{"describedObject":{"kind":"Pod","namespace":"n","name":"p","apiVersion":"v1"},"metric":{"name":"7-cpu"},"timestamp":"2024-01-01T00:00:00Z","value":"150m"}]}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), "/profiler").unwrap();
        let list = client
            .get_metric("n", "pods", "*", "7-cpu", Some("app=web"))
            .await
            .unwrap();

        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].described_object.name, "p");
        assert_eq!(list.items[0].value, "150m");
        mock.assert_async().await;
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            ApiClient::new("not a url", "/profiler"),
            Err(ApiError::InvalidUrl(_))
        ));
        assert!(matches!(
            ApiClient::new("mailto:ops@example.com", "/profiler"),
            Err(ApiError::NotABase(_))
        ));
    }
}
