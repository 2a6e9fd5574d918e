//! Profiler adapter library
//!
//! This crate provides the core functionality for:
//! - Triggering per-process profiling Jobs next to a running pod
//! - Storing profiling parameters and results in an in-memory metric store
//! - Serving stored values through the custom metrics API
//! - Health checks and observability

pub mod api;
pub mod cluster;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod mapper;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod provider;
pub mod quantity;
pub mod selector;
pub mod store;
pub mod validator;

pub use error::{AdapterError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AdapterMetrics, StructuredLogger};
pub use quantity::Quantity;
