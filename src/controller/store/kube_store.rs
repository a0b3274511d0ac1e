//! Store implementation backed by the Kubernetes API.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, Preconditions};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{ObjectStore, StoreError, StoreFactory};
use crate::constants::OPERATOR_NAME;
use crate::crd::{Cache, CacheBackup, CacheBatch, CacheCluster, CacheRestore};
use crate::observability::metrics;

/// Namespaced store for one kind
#[derive(Clone)]
pub struct KubeStore<K> {
    api: Api<K>,
}

impl<K> Debug for KubeStore<K>
where
    K: Resource<DynamicType = ()>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("kind", &K::kind(&()))
            .finish_non_exhaustive()
    }
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    #[must_use]
    pub fn namespaced(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

fn write_params() -> PatchParams {
    PatchParams {
        field_manager: Some(OPERATOR_NAME.to_string()),
        ..PatchParams::default()
    }
}

/// Map a kube error onto the store taxonomy
fn classify<K: Resource<DynamicType = ()>>(err: kube::Error, name: &str) -> StoreError {
    let kind = K::kind(&()).to_string();
    match err {
        kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind,
                name: name.to_string(),
            }
        }
        kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict {
            kind,
            name: name.to_string(),
            message: api_err.message,
        },
        kube::Error::Api(api_err) if api_err.code == 422 => StoreError::Invalid {
            kind,
            name: name.to_string(),
            message: api_err.message,
        },
        other => StoreError::Api(other),
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, name: &str) -> Result<K, StoreError> {
        self.api.get(name).await.map_err(|e| classify::<K>(e, name))
    }

    async fn list(&self, selector: &str) -> Result<Vec<K>, StoreError> {
        let params = if selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(selector)
        };
        let list = self
            .api
            .list(&params)
            .await
            .map_err(|e| classify::<K>(e, selector))?;
        Ok(list.items)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let name = obj.meta().name.clone().unwrap_or_default();
        debug!(kind = %K::kind(&()), name = name.as_str(), "store.create");
        let params = PostParams {
            field_manager: Some(OPERATOR_NAME.to_string()),
            ..PostParams::default()
        };
        let created = self
            .api
            .create(&params, obj)
            .await
            .map_err(|e| classify::<K>(e, &name))?;
        metrics::increment_store_writes("create");
        Ok(created)
    }

    async fn patch(&self, name: &str, patch: &serde_json::Value) -> Result<K, StoreError> {
        debug!(kind = %K::kind(&()), name, "store.patch");
        let patched = self
            .api
            .patch(name, &write_params(), &Patch::Merge(patch))
            .await
            .map_err(|e| classify::<K>(e, name))?;
        metrics::increment_store_writes("patch");
        Ok(patched)
    }

    async fn patch_status(&self, name: &str, patch: &serde_json::Value) -> Result<K, StoreError> {
        debug!(kind = %K::kind(&()), name, "store.patch_status");
        let patched = self
            .api
            .patch_status(name, &write_params(), &Patch::Merge(patch))
            .await
            .map_err(|e| classify::<K>(e, name))?;
        metrics::increment_store_writes("patch_status");
        Ok(patched)
    }

    async fn delete(&self, name: &str, resource_version: Option<&str>) -> Result<(), StoreError> {
        debug!(kind = %K::kind(&()), name, "store.delete");
        let params = DeleteParams {
            preconditions: resource_version.map(|rv| Preconditions {
                resource_version: Some(rv.to_string()),
                uid: None,
            }),
            ..DeleteParams::default()
        };
        self.api
            .delete(name, &params)
            .await
            .map_err(|e| classify::<K>(e, name))?;
        metrics::increment_store_writes("delete");
        Ok(())
    }
}

/// Builds [`KubeStore`]s from a shared client
#[derive(Clone)]
pub struct KubeStoreFactory {
    client: Client,
}

impl Debug for KubeStoreFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStoreFactory").finish_non_exhaustive()
    }
}

impl KubeStoreFactory {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn store<K>(&self, namespace: &str) -> Arc<KubeStore<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Arc::new(KubeStore::namespaced(self.client.clone(), namespace))
    }
}

impl StoreFactory for KubeStoreFactory {
    fn secrets(&self, namespace: &str) -> Arc<dyn ObjectStore<Secret>> {
        self.store::<Secret>(namespace)
    }

    fn config_maps(&self, namespace: &str) -> Arc<dyn ObjectStore<ConfigMap>> {
        self.store::<ConfigMap>(namespace)
    }

    fn services(&self, namespace: &str) -> Arc<dyn ObjectStore<Service>> {
        self.store::<Service>(namespace)
    }

    fn stateful_sets(&self, namespace: &str) -> Arc<dyn ObjectStore<StatefulSet>> {
        self.store::<StatefulSet>(namespace)
    }

    fn jobs(&self, namespace: &str) -> Arc<dyn ObjectStore<Job>> {
        self.store::<Job>(namespace)
    }

    fn cache_clusters(&self, namespace: &str) -> Arc<dyn ObjectStore<CacheCluster>> {
        self.store::<CacheCluster>(namespace)
    }

    fn caches(&self, namespace: &str) -> Arc<dyn ObjectStore<Cache>> {
        self.store::<Cache>(namespace)
    }

    fn backups(&self, namespace: &str) -> Arc<dyn ObjectStore<CacheBackup>> {
        self.store::<CacheBackup>(namespace)
    }

    fn restores(&self, namespace: &str) -> Arc<dyn ObjectStore<CacheRestore>> {
        self.store::<CacheRestore>(namespace)
    }

    fn batches(&self, namespace: &str) -> Arc<dyn ObjectStore<CacheBatch>> {
        self.store::<CacheBatch>(namespace)
    }
}
