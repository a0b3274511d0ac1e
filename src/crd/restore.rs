//! # CacheRestore
//!
//! Job-style resource restoring a completed backup into a cluster.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::backup::BackupResources;
use super::status::JobStatus;

#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "CacheRestore",
    group = "cache.octopilot.io",
    version = "v1",
    namespaced,
    status = "JobStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CacheRestoreSpec {
    /// Name of the `CacheCluster` to restore into
    pub cluster: String,
    /// Name of a succeeded `CacheBackup`
    pub backup: String,
    /// Restrict the restore to these resources
    #[serde(default)]
    pub resources: Option<BackupResources>,
}
