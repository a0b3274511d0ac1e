//! # Cache Administration API
//!
//! Boundary to the cache cluster's own administration endpoint. Handlers only
//! see the [`CacheAdmin`] trait; [`HttpAdminFactory`] builds the REST client
//! used in production.

mod http;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::crd::{BackupResources, CacheCluster};

pub use http::{HttpAdmin, HttpAdminFactory};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("administration endpoint rejected the credentials")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(String),

    #[error("administration endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response from administration endpoint: {0}")]
    InvalidResponse(String),

    #[error("failed to reach administration endpoint: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Identity the operator authenticates with
#[derive(Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How a cache is created on the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheSource {
    /// A template known to the server
    Template(String),
    /// A full cache definition (JSON, XML or YAML)
    Definition(String),
}

/// Membership and health as reported by the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterHealth {
    pub members: Vec<String>,
    pub status: String,
}

impl ClusterHealth {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("HEALTHY")
    }
}

/// Progress of an asynchronous server-side operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Running,
    Succeeded,
    Failed,
}

#[async_trait]
pub trait CacheAdmin: Send + Sync {
    /// Names of every cache on the cluster, internal ones included
    async fn cache_names(&self) -> Result<Vec<String>, AdminError>;

    async fn cache_exists(&self, name: &str) -> Result<bool, AdminError>;

    async fn create_cache(&self, name: &str, source: &CacheSource) -> Result<(), AdminError>;

    /// The cache's configuration as the server renders it
    async fn cache_config(&self, name: &str) -> Result<String, AdminError>;

    async fn health(&self) -> Result<ClusterHealth, AdminError>;

    /// Ask every member to stop gracefully, persisting state
    async fn shutdown(&self) -> Result<(), AdminError>;

    async fn start_backup(
        &self,
        name: &str,
        resources: Option<&BackupResources>,
    ) -> Result<(), AdminError>;

    async fn backup_status(&self, name: &str) -> Result<OperationStatus, AdminError>;

    async fn start_restore(
        &self,
        name: &str,
        backup: &str,
        resources: Option<&BackupResources>,
    ) -> Result<(), AdminError>;

    async fn restore_status(&self, name: &str) -> Result<OperationStatus, AdminError>;
}

/// Builds an admin client for one cluster
pub trait AdminClientFactory: Send + Sync {
    /// # Errors
    ///
    /// Fails when the client cannot be constructed.
    fn connect(
        &self,
        cluster: &CacheCluster,
        credentials: &AdminCredentials,
    ) -> Result<Arc<dyn CacheAdmin>, AdminError>;
}
