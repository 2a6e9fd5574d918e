//! Resource name resolution
//!
//! Maps the many spellings of a resource (`pod`, `Pod`, `pods`, `po`) onto its
//! canonical group and plural so metric keys compare equal no matter how a
//! caller wrote them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AdapterError, Result};

/// A resource plural qualified by its API group (`""` for the core group)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
        }
    }

    /// A resource in the core API group
    pub fn core(resource: impl Into<String>) -> Self {
        Self::new("", resource)
    }

    /// Parse `resource` or `resource.group` (e.g. `deployments.apps`)
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('.') {
            Some((resource, group)) => Self::new(group, resource),
            None => Self::core(raw),
        }
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// Everything known about one resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMapping {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub singular: String,
    pub short_names: Vec<String>,
    pub namespaced: bool,
}

impl ResourceMapping {
    pub fn new(group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            singular: kind.to_lowercase(),
            short_names: Vec::new(),
            namespaced,
        }
    }

    pub fn with_short_names(mut self, names: &[&str]) -> Self {
        self.short_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(self.group.clone(), self.plural.clone())
    }

    /// `v1` for the core group, `group/version` otherwise
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    fn answers_to(&self, name: &str) -> bool {
        self.plural == name
            || self.singular == name
            || self.kind.to_lowercase() == name
            || self.short_names.iter().any(|s| s == name)
    }
}

/// Resolves resource spellings to their canonical mapping
pub trait ResourceMapper: Send + Sync {
    fn resolve(&self, resource: &GroupResource) -> Result<ResourceMapping>;

    /// Canonical group and plural for `resource`
    fn normalize(&self, resource: &GroupResource) -> Result<GroupResource> {
        self.resolve(resource).map(|m| m.group_resource())
    }
}

/// Mapper over a fixed table of resource types
#[derive(Debug, Clone)]
pub struct StaticResourceMapper {
    mappings: Vec<ResourceMapping>,
}

impl Default for StaticResourceMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticResourceMapper {
    /// Mapper preloaded with the built-in workload resources
    pub fn new() -> Self {
        Self {
            mappings: vec![
                ResourceMapping::new("", "v1", "Pod", "pods", true).with_short_names(&["po"]),
                ResourceMapping::new("", "v1", "Service", "services", true)
                    .with_short_names(&["svc"]),
                ResourceMapping::new("", "v1", "Namespace", "namespaces", false)
                    .with_short_names(&["ns"]),
                ResourceMapping::new("", "v1", "Node", "nodes", false).with_short_names(&["no"]),
                ResourceMapping::new("apps", "v1", "Deployment", "deployments", true)
                    .with_short_names(&["deploy"]),
                ResourceMapping::new("apps", "v1", "StatefulSet", "statefulsets", true)
                    .with_short_names(&["sts"]),
                ResourceMapping::new("apps", "v1", "ReplicaSet", "replicasets", true)
                    .with_short_names(&["rs"]),
                ResourceMapping::new("apps", "v1", "DaemonSet", "daemonsets", true)
                    .with_short_names(&["ds"]),
                ResourceMapping::new("batch", "v1", "Job", "jobs", true),
                ResourceMapping::new("batch", "v1", "CronJob", "cronjobs", true)
                    .with_short_names(&["cj"]),
            ],
        }
    }

    /// Register an additional resource type
    pub fn with_mapping(mut self, mapping: ResourceMapping) -> Self {
        self.mappings.push(mapping);
        self
    }
}

impl ResourceMapper for StaticResourceMapper {
    fn resolve(&self, resource: &GroupResource) -> Result<ResourceMapping> {
        let name = resource.resource.to_lowercase();
        let group = resource.group.to_lowercase();

        // An unqualified name matches in any group, the first registration wins.
        self.mappings
            .iter()
            .find(|m| (group.is_empty() || m.group == group) && m.answers_to(&name))
            .cloned()
            .ok_or_else(|| {
                AdapterError::not_found(format!("no matches for resource \"{}\"", resource))
            })
    }
}
