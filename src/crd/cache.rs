//! # Cache
//!
//! A single cache hosted by a `CacheCluster`.

use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

use super::status::Condition;

/// Cache Custom Resource Definition
///
/// Exactly one of `templateName` or `template` should be set.
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Cache",
    group = "cache.octopilot.io",
    version = "v1",
    namespaced,
    status = "CacheStatus",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CacheSpec {
    /// Name of the `CacheCluster` hosting this cache
    pub cluster_name: String,
    /// Name of the cache on the cluster, defaults to the resource name
    #[serde(default)]
    pub name: Option<String>,
    /// Create the cache from a server-side template
    #[serde(default)]
    pub template_name: Option<String>,
    /// Create the cache from an inline definition
    #[serde(default)]
    pub template: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Service clients use to reach the cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

impl Cache {
    /// Name of the cache on the cluster
    #[must_use]
    pub fn cache_name(&self) -> String {
        self.spec.name.clone().unwrap_or_else(|| self.name_any())
    }
}
