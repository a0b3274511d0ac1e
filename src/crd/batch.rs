//! # CacheBatch
//!
//! Job-style resource running a batch of CLI commands against a cluster.

use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

use super::status::JobStatus;

/// Exactly one of `configMap` or `config` must be set.
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "CacheBatch",
    group = "cache.octopilot.io",
    version = "v1",
    namespaced,
    status = "JobStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CacheBatchSpec {
    /// Name of the `CacheCluster` the batch runs against
    pub cluster: String,
    /// Existing ConfigMap holding a `batch` key
    #[serde(default)]
    pub config_map: Option<String>,
    /// Inline batch commands
    #[serde(default)]
    pub config: Option<String>,
}

impl CacheBatch {
    /// ConfigMap mounted into the job: the referenced one, or the one materialized from `config`
    #[must_use]
    pub fn config_map_name(&self) -> String {
        self.spec
            .config_map
            .clone()
            .unwrap_or_else(|| self.name_any())
    }

    #[must_use]
    pub fn job_name(&self) -> String {
        self.name_any()
    }
}
