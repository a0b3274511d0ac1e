//! # Reconciliation Context
//!
//! Everything one reconcile invocation works on: the target instance, the
//! resource registry, the flow controller, artifacts collected by earlier
//! handlers, and the collaborators handlers may call.
//!
//! A context lives for exactly one invocation. [`Context::close`] persists
//! every accumulated change, the instance's own status last.

use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::flow::FlowController;
use super::registry::{persist_object, PersistError, PersistOutcome, PersistReport, ResourceRegistry, TrackedKind};
use super::store::{ObjectStore, StoreFactory};
use crate::admin::{AdminClientFactory, AdminCredentials, AdminError, CacheAdmin};
use crate::config::OperatorSettings;
use crate::crd::CacheCluster;
use crate::events::EventPublisher;
use crate::workload::WorkloadLogs;

/// External services a reconcile may call
#[derive(Clone)]
pub struct Collaborators {
    pub stores: Arc<dyn StoreFactory>,
    pub events: Arc<dyn EventPublisher>,
    pub admin: Arc<dyn AdminClientFactory>,
    pub logs: Arc<dyn WorkloadLogs>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("stores", &self.stores)
            .finish_non_exhaustive()
    }
}

/// Material gathered by collect/configure handlers for later handlers
#[derive(Default)]
pub struct Artifacts {
    pub admin_credentials: Option<AdminCredentials>,
    pub user_credentials: Option<AdminCredentials>,
    /// Rendered server configuration and its SHA-256
    pub server_config: Option<String>,
    pub config_hash: Option<String>,
    /// Secret holding the client-certificate truststore
    pub truststore_secret: Option<String>,
    /// Cluster a dependent resource targets
    pub cluster: Option<CacheCluster>,
    admin: Option<Arc<dyn CacheAdmin>>,
}

impl fmt::Debug for Artifacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifacts")
            .field("admin_credentials", &self.admin_credentials)
            .field("user_credentials", &self.user_credentials)
            .field("config_hash", &self.config_hash)
            .field("truststore_secret", &self.truststore_secret)
            .field("cluster", &self.cluster.as_ref().map(ResourceExt::name_any))
            .finish_non_exhaustive()
    }
}

pub struct Context<K: TrackedKind> {
    persisted: K,
    instance: K,
    instance_store: Arc<dyn ObjectStore<K>>,
    namespace: String,
    pub registry: ResourceRegistry,
    pub flow: FlowController,
    pub artifacts: Artifacts,
    settings: Arc<OperatorSettings>,
    collaborators: Collaborators,
    cancel: CancellationToken,
}

impl<K: TrackedKind> fmt::Debug for Context<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("kind", &K::kind(&()))
            .field("name", &self.instance.name_any())
            .field("namespace", &self.namespace)
            .field("flow", &self.flow)
            .finish_non_exhaustive()
    }
}

impl<K: TrackedKind> Context<K> {
    /// The instance as handlers have shaped it so far
    #[must_use]
    pub fn instance(&self) -> &K {
        &self.instance
    }

    pub fn instance_mut(&mut self) -> &mut K {
        &mut self.instance
    }

    /// The instance as it was loaded at the start of the invocation
    #[must_use]
    pub fn persisted_instance(&self) -> &K {
        &self.persisted
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn settings(&self) -> &OperatorSettings {
        &self.settings
    }

    #[must_use]
    pub fn stores(&self) -> &dyn StoreFactory {
        self.collaborators.stores.as_ref()
    }

    #[must_use]
    pub fn workload_logs(&self) -> &dyn WorkloadLogs {
        self.collaborators.logs.as_ref()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Admin client for `cluster`, connected once per invocation
    ///
    /// # Errors
    ///
    /// Fails when no admin credentials were collected or the client cannot be built.
    pub fn admin(&mut self, cluster: &CacheCluster) -> Result<Arc<dyn CacheAdmin>, AdminError> {
        if let Some(admin) = &self.artifacts.admin {
            return Ok(Arc::clone(admin));
        }
        let Some(credentials) = self.artifacts.admin_credentials.as_ref() else {
            return Err(AdminError::Unauthorized);
        };
        let admin = self.collaborators.admin.connect(cluster, credentials)?;
        self.artifacts.admin = Some(Arc::clone(&admin));
        Ok(admin)
    }

    #[must_use]
    pub fn object_ref(&self) -> ObjectReference {
        self.instance.object_ref(&())
    }

    /// Publish an event about the instance; never fails
    pub async fn publish_event(&self, type_: EventType, reason: &str, action: &str, note: Option<String>) {
        self.collaborators
            .events
            .publish(&self.object_ref(), type_, reason, action, note)
            .await;
    }

    /// Persist the registry, then the instance.
    ///
    /// # Errors
    ///
    /// Returns the first write that failed. Conflicts are retryable.
    pub async fn close(&mut self) -> Result<PersistReport, PersistError> {
        let mut report = self.registry.persist().await?;
        let outcome = persist_object(self.instance_store.as_ref(), Some(&self.persisted), &self.instance).await?;
        report.record(&outcome);
        match outcome {
            PersistOutcome::Created(obj) | PersistOutcome::Patched { object: obj, .. } => {
                self.persisted = obj.clone();
                self.instance = obj;
            }
            PersistOutcome::Vanished => {
                debug!(kind = %K::kind(&()), name = %self.instance.name_any(), "instance deleted during reconcile");
            }
            PersistOutcome::Unchanged => {}
        }
        Ok(report)
    }
}

/// Hands out a fresh [`Context`] per invocation
#[derive(Clone)]
pub struct ContextProvider {
    collaborators: Collaborators,
    settings: Arc<OperatorSettings>,
    cancel: CancellationToken,
}

impl fmt::Debug for ContextProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextProvider")
            .field("settings", &self.settings)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ContextProvider {
    #[must_use]
    pub fn new(
        collaborators: Collaborators,
        settings: Arc<OperatorSettings>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            collaborators,
            settings,
            cancel,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Arc<OperatorSettings> {
        &self.settings
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn stores(&self) -> &dyn StoreFactory {
        self.collaborators.stores.as_ref()
    }

    /// New context for `instance`
    #[must_use]
    pub fn context<K: TrackedKind>(&self, instance: K) -> Context<K> {
        let namespace = instance.namespace().unwrap_or_else(|| "default".to_string());
        let stores = self.collaborators.stores.as_ref();
        Context {
            persisted: instance.clone(),
            instance,
            instance_store: K::store(stores, &namespace),
            registry: ResourceRegistry::new(stores, &namespace),
            namespace,
            flow: FlowController::new(),
            artifacts: Artifacts::default(),
            settings: Arc::clone(&self.settings),
            collaborators: self.collaborators.clone(),
            cancel: self.cancel.child_token(),
        }
    }
}
