//! # Object Store
//!
//! Boundary to the declarative-state store (the Kubernetes API server).
//!
//! Every operation returns a typed [`StoreError`] so callers can tell a
//! missing object from a stale-version conflict from anything else. Optimistic
//! concurrency is carried in the patch body: a patch containing
//! `metadata.resourceVersion` fails with [`StoreError::Conflict`] when the
//! stored object has moved on.
//!
//! - `kube_store`: implementation backed by `kube::Api`
//! - `memory`: in-memory implementation with the same version semantics,
//!   used by tests and dry runs

mod kube_store;
mod memory;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use thiserror::Error;

use crate::crd::{Cache, CacheBackup, CacheBatch, CacheCluster, CacheRestore};

pub use kube_store::{KubeStore, KubeStoreFactory};
pub use memory::{MemoryStore, MemoryStoreFactory, WriteRecord, WriteVerb};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("conflict writing {kind} '{name}': {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("{kind} '{name}' rejected: {message}")]
    Invalid {
        kind: String,
        name: String,
        message: String,
    },

    #[error("kubernetes api error: {0}")]
    Api(#[source] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Conflicts and transport failures are resolved by reprocessing; invalid
    /// objects and serialization bugs are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::AlreadyExists { .. } | StoreError::Api(_)
        )
    }
}

/// Typed access to one kind of object in one namespace
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    /// Fetch an object. Absence is [`StoreError::NotFound`].
    async fn get(&self, name: &str) -> Result<K, StoreError>;

    /// List objects matching a label selector (`key=value,...`; empty matches all)
    async fn list(&self, selector: &str) -> Result<Vec<K>, StoreError>;

    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    /// Apply a JSON merge patch to everything except the status sub-resource
    async fn patch(&self, name: &str, patch: &serde_json::Value) -> Result<K, StoreError>;

    /// Apply a JSON merge patch to the status sub-resource only
    async fn patch_status(&self, name: &str, patch: &serde_json::Value) -> Result<K, StoreError>;

    /// Delete an object, failing with a conflict if `resource_version` no longer matches
    async fn delete(&self, name: &str, resource_version: Option<&str>) -> Result<(), StoreError>;
}

/// Hands out namespaced stores for every kind the operator tracks
pub trait StoreFactory: Send + Sync + Debug {
    fn secrets(&self, namespace: &str) -> Arc<dyn ObjectStore<Secret>>;
    fn config_maps(&self, namespace: &str) -> Arc<dyn ObjectStore<ConfigMap>>;
    fn services(&self, namespace: &str) -> Arc<dyn ObjectStore<Service>>;
    fn stateful_sets(&self, namespace: &str) -> Arc<dyn ObjectStore<StatefulSet>>;
    fn jobs(&self, namespace: &str) -> Arc<dyn ObjectStore<Job>>;
    fn cache_clusters(&self, namespace: &str) -> Arc<dyn ObjectStore<CacheCluster>>;
    fn caches(&self, namespace: &str) -> Arc<dyn ObjectStore<Cache>>;
    fn backups(&self, namespace: &str) -> Arc<dyn ObjectStore<CacheBackup>>;
    fn restores(&self, namespace: &str) -> Arc<dyn ObjectStore<CacheRestore>>;
    fn batches(&self, namespace: &str) -> Arc<dyn ObjectStore<CacheBatch>>;
}
