//! In-memory store with the same version semantics as the API server.
//!
//! Objects are held as JSON so patches are applied exactly like the server
//! applies a merge patch. Every write bumps `metadata.resourceVersion`; a patch
//! or delete carrying a stale version fails with [`StoreError::Conflict`].
//! Writes are recorded so callers can assert how many were issued.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use super::{ObjectStore, StoreError, StoreFactory};
use crate::controller::registry::apply_merge_patch;
use crate::crd::{Cache, CacheBackup, CacheBatch, CacheCluster, CacheRestore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteVerb {
    Create,
    Patch,
    PatchStatus,
    Delete,
}

/// One write issued against a [`MemoryStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub kind: String,
    pub verb: WriteVerb,
    pub name: String,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, Value>,
    version: u64,
    writes: Vec<WriteRecord>,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// Single-namespace in-memory store for one kind
pub struct MemoryStore<K> {
    kind: String,
    state: Mutex<State>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Debug for MemoryStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<K> Default for MemoryStore<K>
where
    K: Resource<DynamicType = ()>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()>,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            kind: K::kind(&()).to_string(),
            state: Mutex::new(State::default()),
            _kind: PhantomData,
        }
    }
}

impl<K> MemoryStore<K> {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn not_found(&self, name: &str) -> StoreError {
        StoreError::NotFound {
            kind: self.kind.clone(),
            name: name.to_string(),
        }
    }

    fn conflict(&self, name: &str, message: String) -> StoreError {
        StoreError::Conflict {
            kind: self.kind.clone(),
            name: name.to_string(),
            message,
        }
    }

    fn record(&self, state: &mut State, verb: WriteVerb, name: &str) {
        state.writes.push(WriteRecord {
            kind: self.kind.clone(),
            verb,
            name: name.to_string(),
        });
    }

    /// Every write issued since creation or the last [`clear_writes`](Self::clear_writes)
    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.lock().objects.contains_key(name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }
}

impl<K> MemoryStore<K>
where
    K: Serialize + DeserializeOwned,
{
    /// Seed an object without recording a write
    pub fn insert(&self, obj: &K) -> Result<(), StoreError> {
        let mut value = serde_json::to_value(obj)?;
        let name = object_name(&value);
        let mut state = self.lock();
        let version = state.next_version();
        stamp_metadata(&mut value, &version, &name);
        state.objects.insert(name, value);
        Ok(())
    }

    /// Current stored object, if any
    #[must_use]
    pub fn object(&self, name: &str) -> Option<K> {
        let state = self.lock();
        state
            .objects
            .get(name)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Modify an object as a concurrent external writer would, bumping its version
    pub fn mutate(&self, name: &str, f: impl FnOnce(&mut K)) -> Result<(), StoreError> {
        let mut state = self.lock();
        let Some(current) = state.objects.get(name).cloned() else {
            return Err(self.not_found(name));
        };
        let mut obj: K = serde_json::from_value(current)?;
        f(&mut obj);
        let mut value = serde_json::to_value(&obj)?;
        let version = state.next_version();
        value["metadata"]["resourceVersion"] = json!(version);
        state.objects.insert(name.to_string(), value);
        Ok(())
    }

    fn apply(
        &self,
        name: &str,
        patch: &Value,
        verb: WriteVerb,
    ) -> Result<K, StoreError> {
        let mut state = self.lock();
        let Some(mut current) = state.objects.get(name).cloned() else {
            return Err(self.not_found(name));
        };

        let mut patch = patch.clone();
        if let Some(expected) = take_resource_version(&mut patch) {
            let actual = current["metadata"]["resourceVersion"].as_str().unwrap_or("");
            if expected != actual {
                return Err(self.conflict(
                    name,
                    format!("resourceVersion {expected} is stale, current is {actual}"),
                ));
            }
        }

        // The main resource ignores status; the status sub-resource ignores everything else
        let scoped = match (verb, patch) {
            (WriteVerb::PatchStatus, Value::Object(mut map)) => map
                .remove("status")
                .map(|status| json!({ "status": status })),
            (_, Value::Object(mut map)) => {
                map.remove("status");
                Some(Value::Object(map))
            }
            (_, other) => Some(other),
        };

        self.record(&mut state, verb, name);
        if let Some(scoped) = scoped {
            let before = current.clone();
            apply_merge_patch(&mut current, &scoped);
            if current != before {
                let version = state.next_version();
                current["metadata"]["resourceVersion"] = json!(version);
                state.objects.insert(name.to_string(), current.clone());
            }
        }
        Ok(serde_json::from_value(current)?)
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<K, StoreError> {
        let value = self
            .lock()
            .objects
            .get(name)
            .cloned()
            .ok_or_else(|| self.not_found(name))?;
        Ok(serde_json::from_value(value)?)
    }

    async fn list(&self, selector: &str) -> Result<Vec<K>, StoreError> {
        let wanted = parse_selector(selector);
        let values: Vec<Value> = self
            .lock()
            .objects
            .values()
            .filter(|value| {
                wanted
                    .iter()
                    .all(|(k, v)| value["metadata"]["labels"][k.as_str()].as_str() == Some(v.as_str()))
            })
            .cloned()
            .collect();
        values
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(StoreError::from))
            .collect()
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let mut value = serde_json::to_value(obj)?;
        let name = object_name(&value);
        let mut state = self.lock();
        if state.objects.contains_key(&name) {
            return Err(StoreError::AlreadyExists {
                kind: self.kind.clone(),
                name,
            });
        }
        let version = state.next_version();
        stamp_metadata(&mut value, &version, &name);
        self.record(&mut state, WriteVerb::Create, &name);
        state.objects.insert(name, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn patch(&self, name: &str, patch: &Value) -> Result<K, StoreError> {
        self.apply(name, patch, WriteVerb::Patch)
    }

    async fn patch_status(&self, name: &str, patch: &Value) -> Result<K, StoreError> {
        self.apply(name, patch, WriteVerb::PatchStatus)
    }

    async fn delete(&self, name: &str, resource_version: Option<&str>) -> Result<(), StoreError> {
        let mut state = self.lock();
        let Some(current) = state.objects.get(name) else {
            return Err(self.not_found(name));
        };
        if let Some(expected) = resource_version {
            let actual = current["metadata"]["resourceVersion"].as_str().unwrap_or("");
            if expected != actual {
                return Err(self.conflict(
                    name,
                    format!("precondition failed: resourceVersion {expected}, current is {actual}"),
                ));
            }
        }
        state.objects.remove(name);
        self.record(&mut state, WriteVerb::Delete, name);
        Ok(())
    }
}

fn object_name(value: &Value) -> String {
    value["metadata"]["name"].as_str().unwrap_or_default().to_string()
}

fn stamp_metadata(value: &mut Value, version: &str, name: &str) {
    let metadata = &mut value["metadata"];
    metadata["resourceVersion"] = json!(version);
    if metadata["uid"].is_null() {
        metadata["uid"] = json!(format!("uid-{name}-{version}"));
    }
}

fn take_resource_version(patch: &mut Value) -> Option<String> {
    let metadata = patch.get_mut("metadata")?.as_object_mut()?;
    let version = metadata.remove("resourceVersion")?;
    if metadata.is_empty() {
        if let Some(map) = patch.as_object_mut() {
            map.remove("metadata");
        }
    }
    version.as_str().map(str::to_string)
}

fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|term| term.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// One [`MemoryStore`] per kind, shared across every namespace
#[derive(Debug, Clone)]
pub struct MemoryStoreFactory {
    pub secrets: Arc<MemoryStore<Secret>>,
    pub config_maps: Arc<MemoryStore<ConfigMap>>,
    pub services: Arc<MemoryStore<Service>>,
    pub stateful_sets: Arc<MemoryStore<StatefulSet>>,
    pub jobs: Arc<MemoryStore<Job>>,
    pub cache_clusters: Arc<MemoryStore<CacheCluster>>,
    pub caches: Arc<MemoryStore<Cache>>,
    pub backups: Arc<MemoryStore<CacheBackup>>,
    pub restores: Arc<MemoryStore<CacheRestore>>,
    pub batches: Arc<MemoryStore<CacheBatch>>,
}

impl Default for MemoryStoreFactory {
    fn default() -> Self {
        Self {
            secrets: Arc::default(),
            config_maps: Arc::default(),
            services: Arc::default(),
            stateful_sets: Arc::default(),
            jobs: Arc::default(),
            cache_clusters: Arc::default(),
            caches: Arc::default(),
            backups: Arc::default(),
            restores: Arc::default(),
            batches: Arc::default(),
        }
    }
}

impl MemoryStoreFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes across every kind
    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        let mut all = Vec::new();
        all.extend(self.secrets.writes());
        all.extend(self.config_maps.writes());
        all.extend(self.services.writes());
        all.extend(self.stateful_sets.writes());
        all.extend(self.jobs.writes());
        all.extend(self.cache_clusters.writes());
        all.extend(self.caches.writes());
        all.extend(self.backups.writes());
        all.extend(self.restores.writes());
        all.extend(self.batches.writes());
        all
    }

    pub fn clear_writes(&self) {
        self.secrets.clear_writes();
        self.config_maps.clear_writes();
        self.services.clear_writes();
        self.stateful_sets.clear_writes();
        self.jobs.clear_writes();
        self.cache_clusters.clear_writes();
        self.caches.clear_writes();
        self.backups.clear_writes();
        self.restores.clear_writes();
        self.batches.clear_writes();
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn secrets(&self, _namespace: &str) -> Arc<dyn ObjectStore<Secret>> {
        self.secrets.clone()
    }

    fn config_maps(&self, _namespace: &str) -> Arc<dyn ObjectStore<ConfigMap>> {
        self.config_maps.clone()
    }

    fn services(&self, _namespace: &str) -> Arc<dyn ObjectStore<Service>> {
        self.services.clone()
    }

    fn stateful_sets(&self, _namespace: &str) -> Arc<dyn ObjectStore<StatefulSet>> {
        self.stateful_sets.clone()
    }

    fn jobs(&self, _namespace: &str) -> Arc<dyn ObjectStore<Job>> {
        self.jobs.clone()
    }

    fn cache_clusters(&self, _namespace: &str) -> Arc<dyn ObjectStore<CacheCluster>> {
        self.cache_clusters.clone()
    }

    fn caches(&self, _namespace: &str) -> Arc<dyn ObjectStore<Cache>> {
        self.caches.clone()
    }

    fn backups(&self, _namespace: &str) -> Arc<dyn ObjectStore<CacheBackup>> {
        self.backups.clone()
    }

    fn restores(&self, _namespace: &str) -> Arc<dyn ObjectStore<CacheRestore>> {
        self.restores.clone()
    }

    fn batches(&self, _namespace: &str) -> Arc<dyn ObjectStore<CacheBatch>> {
        self.batches.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config_map(name: &str, data: &str) -> ConfigMap {
        ConfigMap {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), "x".to_string())])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), data.to_string())])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_version_and_rejects_duplicates() {
        let store = MemoryStore::<ConfigMap>::new();
        let created = store.create(&config_map("a", "1")).await.unwrap();
        assert!(created.metadata.resource_version.is_some());
        assert!(created.metadata.uid.is_some());

        let err = store.create(&config_map("a", "1")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_stale_patch_conflicts() {
        let store = MemoryStore::<ConfigMap>::new();
        store.insert(&config_map("a", "1")).unwrap();
        let current = store.get("a").await.unwrap();
        let rv = current.metadata.resource_version.clone().unwrap();

        store
            .mutate("a", |cm| {
                cm.data = Some(BTreeMap::from([("k".to_string(), "other".to_string())]));
            })
            .unwrap();

        let patch = json!({"metadata": {"resourceVersion": rv}, "data": {"k": "2"}});
        let err = store.patch("a", &patch).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.object("a").unwrap().data.unwrap()["k"], "other");
    }

    #[tokio::test]
    async fn test_noop_patch_keeps_version() {
        let store = MemoryStore::<ConfigMap>::new();
        store.insert(&config_map("a", "1")).unwrap();
        let before = store.get("a").await.unwrap().metadata.resource_version;
        store.patch("a", &json!({"data": {"k": "1"}})).await.unwrap();
        let after = store.get("a").await.unwrap().metadata.resource_version;
        assert_eq!(before, after);
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_list_filters_on_labels() {
        let store = MemoryStore::<ConfigMap>::new();
        store.insert(&config_map("a", "1")).unwrap();
        let mut other = config_map("b", "1");
        other.metadata.labels = None;
        store.insert(&other).unwrap();

        assert_eq!(store.list("app=x").await.unwrap().len(), 1);
        assert_eq!(store.list("").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_with_stale_precondition() {
        let store = MemoryStore::<ConfigMap>::new();
        store.insert(&config_map("a", "1")).unwrap();
        let err = store.delete("a", Some("999")).await.unwrap_err();
        assert!(err.is_conflict());
        store.delete("a", None).await.unwrap();
        assert!(store.get("a").await.unwrap_err().is_not_found());
    }
}
