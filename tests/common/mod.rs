//! Common test utilities for the reconcile tests
//!
//! Wires a [`Reconciler`] to the in-memory object store plus fake admin,
//! event and log collaborators, so whole reconcile invocations run without
//! a Kubernetes cluster or a cache server.

#![allow(dead_code, reason = "Each test binary uses a different subset")]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cache_operator::admin::{
    AdminClientFactory, AdminCredentials, AdminError, CacheAdmin, CacheSource, ClusterHealth,
    OperationStatus,
};
use cache_operator::config::OperatorSettings;
use cache_operator::constants::CONDITION_WELL_FORMED;
use cache_operator::controller::backoff::BackoffRegistry;
use cache_operator::controller::context::{Collaborators, ContextProvider};
use cache_operator::controller::credentials;
use cache_operator::controller::reconciler::Reconciler;
use cache_operator::controller::store::MemoryStoreFactory;
use cache_operator::crd::{
    set_condition, BackupResources, CacheCluster, CacheClusterSpec, CacheClusterStatus, SecuritySpec,
};
use cache_operator::events::RecordingEventPublisher;
use cache_operator::workload::{WorkloadError, WorkloadLogs};
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use tokio_util::sync::CancellationToken;

pub const NAMESPACE: &str = "caches";
pub const CLUSTER: &str = "example";

#[derive(Default)]
struct AdminState {
    caches: BTreeMap<String, String>,
    members: Vec<String>,
    health: String,
    backups: BTreeMap<String, OperationStatus>,
    restores: BTreeMap<String, OperationStatus>,
    shutdowns: usize,
    started: Vec<String>,
}

/// Scriptable stand-in for the cluster administration API
#[derive(Default)]
pub struct FakeAdmin {
    state: Mutex<AdminState>,
}

impl FakeAdmin {
    fn lock(&self) -> std::sync::MutexGuard<'_, AdminState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_members(&self, count: usize) {
        let mut state = self.lock();
        state.members = (0..count).map(|i| format!("{CLUSTER}-{i}")).collect();
        state.health = "HEALTHY".to_string();
    }

    pub fn add_cache(&self, name: &str, config: &str) {
        self.lock().caches.insert(name.to_string(), config.to_string());
    }

    pub fn remove_cache(&self, name: &str) {
        self.lock().caches.remove(name);
    }

    pub fn cache_names(&self) -> BTreeSet<String> {
        self.lock().caches.keys().cloned().collect()
    }

    pub fn finish_backup(&self, name: &str, status: OperationStatus) {
        self.lock().backups.insert(name.to_string(), status);
    }

    pub fn shutdowns(&self) -> usize {
        self.lock().shutdowns
    }

    /// Backups and restores submitted so far, in order
    pub fn started(&self) -> Vec<String> {
        self.lock().started.clone()
    }
}

#[async_trait]
impl CacheAdmin for FakeAdmin {
    async fn cache_names(&self) -> Result<Vec<String>, AdminError> {
        Ok(self.lock().caches.keys().cloned().collect())
    }

    async fn cache_exists(&self, name: &str) -> Result<bool, AdminError> {
        Ok(self.lock().caches.contains_key(name))
    }

    async fn create_cache(&self, name: &str, source: &CacheSource) -> Result<(), AdminError> {
        let config = match source {
            CacheSource::Template(template) => format!("template:{template}"),
            CacheSource::Definition(definition) => definition.clone(),
        };
        self.lock().caches.insert(name.to_string(), config);
        Ok(())
    }

    async fn cache_config(&self, name: &str) -> Result<String, AdminError> {
        self.lock()
            .caches
            .get(name)
            .cloned()
            .ok_or_else(|| AdminError::NotFound(format!("cache '{name}'")))
    }

    async fn health(&self) -> Result<ClusterHealth, AdminError> {
        let state = self.lock();
        Ok(ClusterHealth {
            members: state.members.clone(),
            status: state.health.clone(),
        })
    }

    async fn shutdown(&self) -> Result<(), AdminError> {
        self.lock().shutdowns += 1;
        Ok(())
    }

    async fn start_backup(
        &self,
        name: &str,
        _resources: Option<&BackupResources>,
    ) -> Result<(), AdminError> {
        let mut state = self.lock();
        state.backups.insert(name.to_string(), OperationStatus::Running);
        state.started.push(format!("backup/{name}"));
        Ok(())
    }

    async fn backup_status(&self, name: &str) -> Result<OperationStatus, AdminError> {
        self.lock()
            .backups
            .get(name)
            .copied()
            .ok_or_else(|| AdminError::NotFound(format!("backup '{name}'")))
    }

    async fn start_restore(
        &self,
        name: &str,
        _backup: &str,
        _resources: Option<&BackupResources>,
    ) -> Result<(), AdminError> {
        let mut state = self.lock();
        state.restores.insert(name.to_string(), OperationStatus::Running);
        state.started.push(format!("restore/{name}"));
        Ok(())
    }

    async fn restore_status(&self, name: &str) -> Result<OperationStatus, AdminError> {
        self.lock()
            .restores
            .get(name)
            .copied()
            .ok_or_else(|| AdminError::NotFound(format!("restore '{name}'")))
    }
}

/// Hands out the same [`FakeAdmin`] for every cluster
pub struct FakeAdminFactory(pub Arc<FakeAdmin>);

impl AdminClientFactory for FakeAdminFactory {
    fn connect(
        &self,
        _cluster: &CacheCluster,
        _credentials: &AdminCredentials,
    ) -> Result<Arc<dyn CacheAdmin>, AdminError> {
        Ok(Arc::clone(&self.0) as Arc<dyn CacheAdmin>)
    }
}

/// Job logs keyed by job name; a missing entry means retrieval fails
#[derive(Default)]
pub struct FakeLogs {
    logs: Mutex<BTreeMap<String, String>>,
}

impl FakeLogs {
    pub fn set(&self, job: &str, logs: &str) {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.to_string(), logs.to_string());
    }
}

#[async_trait]
impl WorkloadLogs for FakeLogs {
    async fn job_logs(&self, _namespace: &str, job: &str) -> Result<String, WorkloadError> {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job)
            .cloned()
            .ok_or_else(|| WorkloadError::NoPods(job.to_string()))
    }
}

/// A reconciler over in-memory collaborators
pub struct Harness {
    pub stores: Arc<MemoryStoreFactory>,
    pub admin: Arc<FakeAdmin>,
    pub events: Arc<RecordingEventPublisher>,
    pub logs: Arc<FakeLogs>,
    pub reconciler: Arc<Reconciler>,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(settings())
    }

    pub fn with_settings(settings: OperatorSettings) -> Self {
        let stores = Arc::new(MemoryStoreFactory::new());
        let admin = Arc::new(FakeAdmin::default());
        let events = Arc::new(RecordingEventPublisher::default());
        let logs = Arc::new(FakeLogs::default());
        let cancel = CancellationToken::new();
        let collaborators = Collaborators {
            stores: stores.clone(),
            events: events.clone(),
            admin: Arc::new(FakeAdminFactory(Arc::clone(&admin))),
            logs: logs.clone(),
        };
        let provider = ContextProvider::new(collaborators, Arc::new(settings), cancel.clone());
        let reconciler = Arc::new(Reconciler::new(
            provider,
            BackoffRegistry::new(Duration::from_millis(100), Duration::from_secs(5)),
        ));
        Self {
            stores,
            admin,
            events,
            logs,
            reconciler,
            cancel,
        }
    }

    /// Seed a cluster that already reported itself well formed, with its admin secret
    pub fn seed_well_formed_cluster(&self) -> CacheCluster {
        let mut cluster = cluster(3);
        let status = cluster.status.get_or_insert_with(CacheClusterStatus::default);
        set_condition(&mut status.conditions, CONDITION_WELL_FORMED, true, "ClusterFormed", None);
        self.stores.cache_clusters.insert(&cluster).expect("seed cluster");

        let mut secret = Secret {
            metadata: ObjectMeta {
                name: Some(cluster.admin_secret_name()),
                namespace: Some(NAMESPACE.to_string()),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        };
        credentials::store_in(
            &mut secret,
            &AdminCredentials {
                username: "operator".to_string(),
                password: "secret".to_string(),
            },
        );
        self.stores.secrets.insert(&secret).expect("seed admin secret");

        self.admin.set_members(3);
        self.stores.cache_clusters.object(CLUSTER).expect("seeded cluster")
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events.events().into_iter().map(|e| e.reason).collect()
    }
}

pub fn settings() -> OperatorSettings {
    OperatorSettings {
        wait_requeue: Duration::from_secs(5),
        phase_requeue: Duration::from_secs(1),
        ..OperatorSettings::default()
    }
}

pub fn cluster(replicas: i32) -> CacheCluster {
    let mut cluster = CacheCluster::new(
        CLUSTER,
        CacheClusterSpec {
            replicas,
            image: None,
            security: SecuritySpec::default(),
            container: None,
            expose_admin: false,
        },
    );
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster
}
