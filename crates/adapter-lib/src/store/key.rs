//! Metric key model

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::mapper::{GroupResource, ResourceMapper};

/// Namespace plus object name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What is measured: a metric name on a kind of resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricInfo {
    pub group_resource: GroupResource,
    pub namespaced: bool,
    pub metric: String,
}

impl MetricInfo {
    pub fn new(group_resource: GroupResource, namespaced: bool, metric: impl Into<String>) -> Self {
        Self {
            group_resource,
            namespaced,
            metric: metric.into(),
        }
    }

    /// A metric attached to pods
    pub fn pods(metric: impl Into<String>) -> Self {
        Self::new(GroupResource::core("pods"), true, metric)
    }

    /// Canonical form: resource resolved to its group and plural, scope taken
    /// from the resource. Applying it twice yields the same value.
    pub fn normalized(&self, mapper: &dyn ResourceMapper) -> Result<Self> {
        let mapping = mapper.resolve(&self.group_resource)?;
        Ok(Self {
            group_resource: mapping.group_resource(),
            namespaced: mapping.namespaced,
            metric: self.metric.clone(),
        })
    }
}

/// Address of one stored value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub info: MetricInfo,
    pub name: NamespacedName,
}

impl MetricKey {
    pub fn new(info: MetricInfo, name: NamespacedName) -> Self {
        Self { info, name }
    }

    pub fn normalized(&self, mapper: &dyn ResourceMapper) -> Result<Self> {
        Ok(Self {
            info: self.info.normalized(mapper)?,
            name: self.name.clone(),
        })
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.info.group_resource, self.name, self.info.metric
        )
    }
}
