//! Tracked resources: a desired and a last-observed snapshot per object.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::ResourceExt;
use tracing::debug;

use super::kinds::TrackedKind;
use crate::controller::store::{ObjectStore, StoreError};

/// One managed object as seen during a single reconcile
#[derive(Debug, Clone)]
pub struct Tracked<K> {
    pub(super) persisted: Option<K>,
    pub(super) desired: Option<K>,
    pub(super) user_created: bool,
}

impl<K> Default for Tracked<K> {
    fn default() -> Self {
        Self {
            persisted: None,
            desired: None,
            user_created: false,
        }
    }
}

impl<K: TrackedKind> Tracked<K> {
    /// Start from an object that already exists in the store
    #[must_use]
    pub fn loaded(obj: K) -> Self {
        Self {
            persisted: Some(obj),
            desired: None,
            user_created: true,
        }
    }

    /// The desired object if one was defined, otherwise a copy of the persisted one
    #[must_use]
    pub fn definition(&self) -> Option<K> {
        self.desired.clone().or_else(|| self.persisted.clone())
    }

    #[must_use]
    pub fn persisted(&self) -> Option<&K> {
        self.persisted.as_ref()
    }

    #[must_use]
    pub fn desired(&self) -> Option<&K> {
        self.desired.as_ref()
    }

    /// Whether the object pre-existed rather than being created by this operator
    #[must_use]
    pub fn user_created(&self) -> bool {
        self.user_created
    }

    /// Mutable access to the desired object, seeding it from the persisted one
    pub fn desired_mut(&mut self) -> Option<&mut K> {
        if self.desired.is_none() {
            self.desired = self.persisted.clone();
        }
        self.desired.as_mut()
    }

    /// Desired differs from persisted in operator-owned content or status
    #[must_use]
    pub fn is_updated(&self) -> bool {
        match (&self.persisted, &self.desired) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(persisted), Some(desired)) => {
                persisted.content() != desired.content()
                    || desired
                        .status()
                        .is_some_and(|status| persisted.status().as_ref() != Some(&status))
            }
        }
    }
}

/// Every tracked object of one kind, backed by that kind's store
pub struct TrackedSet<K: TrackedKind> {
    pub(super) store: Arc<dyn ObjectStore<K>>,
    pub(super) entries: BTreeMap<String, Tracked<K>>,
    /// Pending deletions with the resource version they were observed at
    pub(super) deletions: BTreeMap<String, Option<String>>,
}

impl<K: TrackedKind> std::fmt::Debug for TrackedSet<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedSet")
            .field("kind", &K::kind(&()))
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .field("deletions", &self.deletions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<K: TrackedKind> TrackedSet<K> {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore<K>>) -> Self {
        Self {
            store,
            entries: BTreeMap::new(),
            deletions: BTreeMap::new(),
        }
    }

    /// Current definition of `name`, `None` if absent or scheduled for deletion
    #[must_use]
    pub fn get(&self, name: &str) -> Option<K> {
        if self.deletions.contains_key(name) {
            return None;
        }
        self.entries.get(name).and_then(Tracked::definition)
    }

    #[must_use]
    pub fn tracked(&self, name: &str) -> Option<&Tracked<K>> {
        self.entries.get(name)
    }

    /// Names of every tracked object
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Upsert the desired state of an object
    pub fn define(&mut self, obj: K) {
        let name = obj.name_any();
        self.deletions.remove(&name);
        self.entries.entry(name).or_default().desired = Some(obj);
    }

    /// Fetch an object from the store into `persisted`.
    ///
    /// Absence is reported as [`StoreError::NotFound`]; a desired object defined
    /// earlier in the cycle is kept.
    pub async fn load(&mut self, name: &str) -> Result<K, StoreError> {
        let obj = self.store.get(name).await.inspect_err(|e| {
            if e.is_not_found() {
                debug!(kind = %K::kind(&()), name, "registry.load: not found");
            }
        })?;
        let entry = self.entries.entry(name.to_string()).or_default();
        entry.persisted = Some(obj.clone());
        entry.user_created = true;
        Ok(obj)
    }

    /// Like [`load`](Self::load), with absence as `Ok(None)`
    pub async fn load_optional(&mut self, name: &str) -> Result<Option<K>, StoreError> {
        match self.load(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Load every object matching a label selector
    pub async fn list(&mut self, selector: &str) -> Result<Vec<K>, StoreError> {
        let objects = self.store.list(selector).await?;
        for obj in &objects {
            let entry = self.entries.entry(obj.name_any()).or_default();
            entry.persisted = Some(obj.clone());
            entry.user_created = true;
        }
        Ok(objects)
    }

    /// Schedule a deletion, preconditioned on the version last observed
    pub fn delete(&mut self, name: &str) {
        let version = self
            .entries
            .remove(name)
            .and_then(|entry| entry.persisted)
            .and_then(|obj| obj.resource_version());
        self.deletions.insert(name.to_string(), version);
    }

    /// Any write would be issued by persisting this set
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.deletions.is_empty() || self.entries.values().any(Tracked::is_updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::store::MemoryStore;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn config_map(name: &str, value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_definition_prefers_desired() {
        let store = Arc::new(MemoryStore::<ConfigMap>::new());
        store.insert(&config_map("a", "old")).unwrap();
        let mut set = TrackedSet::new(store);

        set.load("a").await.unwrap();
        let tracked = set.tracked("a").unwrap();
        assert!(tracked.user_created());
        assert!(!tracked.is_updated());
        assert_eq!(set.get("a").unwrap().data.unwrap()["k"], "old");

        set.define(config_map("a", "new"));
        assert!(set.tracked("a").unwrap().is_updated());
        assert_eq!(set.get("a").unwrap().data.unwrap()["k"], "new");
        assert!(set.is_dirty());
    }

    #[tokio::test]
    async fn test_load_missing_is_typed_not_found() {
        let mut set = TrackedSet::new(Arc::new(MemoryStore::<ConfigMap>::new()));
        let err = set.load("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(set.get("missing").is_none());
    }

    #[test]
    fn test_absent_without_either_snapshot() {
        let tracked = Tracked::<ConfigMap>::default();
        assert!(tracked.definition().is_none());
        assert!(!tracked.is_updated());
    }

    #[tokio::test]
    async fn test_delete_hides_object() {
        let store = Arc::new(MemoryStore::<ConfigMap>::new());
        store.insert(&config_map("a", "v")).unwrap();
        let mut set = TrackedSet::new(store);
        set.load("a").await.unwrap();
        set.delete("a");
        assert!(set.get("a").is_none());
        assert!(set.is_dirty());
    }
}
