//! Error types for the profiler adapter

use std::time::Duration;

use thiserror::Error;

use crate::mapper::GroupResource;

/// Main error type for adapter operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdapterError {
    /// A namespace, pod or stored metric does not exist
    #[error("{0}")]
    NotFound(String),

    /// Request body or identifier could not be understood
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Server-side failure (quantity parsing, store writes, unscheduled targets)
    #[error("internal error: {0}")]
    Internal(String),

    /// The profiling job could not be submitted to the cluster
    #[error("failed to dispatch profiling job: {0}")]
    DispatchFailure(String),

    /// A run for the same target is already in flight or already has a job
    #[error("conflict: {0}")]
    Conflict(String),

    /// A cluster call did not complete within the request deadline
    #[error("{call} did not complete within {after:?}")]
    Timeout { call: &'static str, after: Duration },

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl AdapterError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::DispatchFailure(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// The error returned when no value is stored for a metric
    pub fn metric_not_found(resource: &GroupResource, metric: &str, object: &str) -> Self {
        Self::NotFound(format!(
            "the server could not find the metric {} for {} {}",
            metric, resource, object
        ))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Short label used as the `outcome` of request metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::MalformedRequest(_) => "malformed",
            Self::Internal(_) => "internal",
            Self::DispatchFailure(_) => "dispatch_failure",
            Self::Conflict(_) => "conflict",
            Self::Timeout { .. } => "timeout",
            Self::Kube(_) => "kube",
        }
    }
}

pub type Result<T, E = AdapterError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_not_found_names_metric_and_object() {
        let err = AdapterError::metric_not_found(&GroupResource::core("pods"), "7-cpu", "n/p");
        assert!(err.is_not_found());
        let msg = err.to_string();
        assert!(msg.contains("7-cpu"));
        assert!(msg.contains("pods"));
        assert!(msg.contains("n/p"));
    }

    #[test]
    fn timeout_message_names_the_call() {
        let err = AdapterError::Timeout {
            call: "get pod",
            after: Duration::from_secs(3),
        };
        assert!(err.is_timeout());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "get pod did not complete within 3s");
    }

    #[test]
    fn constructors_pick_variants() {
        assert!(matches!(
            AdapterError::malformed("x"),
            AdapterError::MalformedRequest(_)
        ));
        assert!(matches!(AdapterError::internal("x"), AdapterError::Internal(_)));
        assert!(matches!(
            AdapterError::dispatch("x"),
            AdapterError::DispatchFailure(_)
        ));
        assert!(matches!(AdapterError::conflict("x"), AdapterError::Conflict(_)));
    }

    #[test]
    fn kind_labels() {
        assert_eq!(AdapterError::not_found("x").kind(), "not_found");
        assert_eq!(AdapterError::dispatch("x").kind(), "dispatch_failure");
    }
}
