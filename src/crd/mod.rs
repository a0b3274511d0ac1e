//! # Custom Resource Definitions
//!
//! CRD types for the cache operator.
//!
//! ## Module Structure
//!
//! - `cluster.rs` - `CacheCluster`, the primary resource
//! - `cache.rs` - `Cache`, a cache hosted by a cluster
//! - `backup.rs`, `restore.rs`, `batch.rs` - job-style resources
//! - `status.rs` - conditions and the phase/reason contract

mod backup;
mod batch;
mod cache;
mod cluster;
mod restore;
mod status;

pub use backup::{BackupResources, CacheBackup, CacheBackupSpec};
pub use batch::{CacheBatch, CacheBatchSpec};
pub use cache::{Cache, CacheSpec, CacheStatus};
pub use cluster::{
    CacheCluster, CacheClusterSpec, CacheClusterStatus, ClientCertType, ContainerSpec,
    EndpointEncryption, PodStatus, SecuritySpec,
};
pub use restore::{CacheRestore, CacheRestoreSpec};
pub use status::{condition_is_true, set_condition, Condition, JobPhase, JobStatus};
