//! # CacheBackup
//!
//! Job-style resource taking a backup of a cluster's caches.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::status::JobStatus;

#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "CacheBackup",
    group = "cache.octopilot.io",
    version = "v1",
    namespaced,
    status = "JobStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CacheBackupSpec {
    /// Name of the `CacheCluster` to back up
    pub cluster: String,
    /// Restrict the backup to these resources (everything when absent)
    #[serde(default)]
    pub resources: Option<BackupResources>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupResources {
    #[serde(default)]
    pub caches: Vec<String>,
    #[serde(default)]
    pub templates: Vec<String>,
}
