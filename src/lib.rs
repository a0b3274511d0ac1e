//! # Cache Operator
//!
//! A Kubernetes operator that reconciles distributed cache clusters
//! (`CacheCluster`), the caches they host (`Cache`), and job-style resources
//! that back up, restore or batch-configure a cluster (`CacheBackup`,
//! `CacheRestore`, `CacheBatch`).
//!
//! Every reconcile runs an ordered pipeline of handlers against a fresh
//! context. Handlers shape the desired state of the instance and its owned
//! objects in a resource registry; closing the context diffs desired against
//! persisted state and writes only what changed, status last and separately.

pub mod admin;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod events;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod workload;
