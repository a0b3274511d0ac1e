//! # Diff-and-Persist
//!
//! Converges one desired object with the store:
//!
//! 1. Absent remotely: create it from the desired object.
//! 2. Present: diff the operator-owned content and patch it if it differs.
//! 3. Independently diff the status sub-tree and issue a separate status patch.
//!
//! Every patch carries the resource version it was computed against, so a
//! concurrent writer surfaces as a conflict. Conflicts are returned to the
//! caller, never retried here. An object vanishing between read and write is
//! not an error. An empty diff never produces a write.

use kube::ResourceExt;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use super::diff::merge_patch;
use super::kinds::TrackedKind;
use super::tracked::TrackedSet;
use crate::controller::store::{ObjectStore, StoreError};
use crate::observability::metrics;

#[derive(Debug, Error)]
#[error("persisting {kind} '{name}' failed: {source}")]
pub struct PersistError {
    pub kind: String,
    pub name: String,
    #[source]
    pub source: StoreError,
}

impl PersistError {
    fn new<K: TrackedKind>(name: &str, source: StoreError) -> Self {
        if source.is_conflict() {
            info!(kind = %K::kind(&()), name, "persist: conflicting write, will retry");
            metrics::increment_conflicts(&K::kind(&()));
        }
        Self {
            kind: K::kind(&()).to_string(),
            name: name.to_string(),
            source,
        }
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.source.is_conflict()
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

/// What persisting one object did
#[derive(Debug)]
pub enum PersistOutcome<K> {
    Created(K),
    Patched { object: K, content: bool, status: bool },
    Unchanged,
    /// The object disappeared while being written
    Vanished,
}

/// Write counters for one persist pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PersistReport {
    pub created: usize,
    pub patched: usize,
    pub status_patched: usize,
    pub deleted: usize,
}

impl PersistReport {
    #[must_use]
    pub fn writes(&self) -> usize {
        self.created + self.patched + self.status_patched + self.deleted
    }

    pub fn merge(&mut self, other: PersistReport) {
        self.created += other.created;
        self.patched += other.patched;
        self.status_patched += other.status_patched;
        self.deleted += other.deleted;
    }

    pub(crate) fn record<K>(&mut self, outcome: &PersistOutcome<K>) {
        match outcome {
            PersistOutcome::Created(_) => self.created += 1,
            PersistOutcome::Patched {
                content, status, ..
            } => {
                self.patched += usize::from(*content);
                self.status_patched += usize::from(*status);
            }
            PersistOutcome::Unchanged | PersistOutcome::Vanished => {}
        }
    }
}

fn with_version<K: TrackedKind>(mut patch: Value, current: &K) -> Value {
    if let Some(version) = current.meta().resource_version.as_deref() {
        patch["metadata"]["resourceVersion"] = json!(version);
    }
    patch
}

/// Converge `desired` with the store, starting from the last observed `persisted` snapshot
pub async fn persist_object<K: TrackedKind>(
    store: &dyn ObjectStore<K>,
    persisted: Option<&K>,
    desired: &K,
) -> Result<PersistOutcome<K>, PersistError> {
    let name = desired.name_any();

    let mut current = match persisted {
        Some(obj) => obj.clone(),
        None => match store.get(&name).await {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => {
                return match store.create(desired).await {
                    Ok(created) => {
                        debug!(kind = %K::kind(&()), name = name.as_str(), "persist: created");
                        Ok(PersistOutcome::Created(created))
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(kind = %K::kind(&()), name = name.as_str(), "persist: owner vanished during create");
                        Ok(PersistOutcome::Vanished)
                    }
                    Err(e) => Err(PersistError::new::<K>(&name, e)),
                };
            }
            Err(e) => return Err(PersistError::new::<K>(&name, e)),
        },
    };

    let mut content_patched = false;
    if let Some(patch) = merge_patch(&current.content(), &desired.content()) {
        match store.patch(&name, &with_version(patch, &current)).await {
            Ok(obj) => {
                current = obj;
                content_patched = true;
            }
            Err(e) if e.is_not_found() => {
                debug!(kind = %K::kind(&()), name = name.as_str(), "persist: vanished during patch");
                return Ok(PersistOutcome::Vanished);
            }
            Err(e) => return Err(PersistError::new::<K>(&name, e)),
        }
    }

    let mut status_patched = false;
    if let Some(desired_status) = desired.status() {
        let current_status = current.status().unwrap_or(Value::Null);
        if let Some(patch) = merge_patch(&current_status, &desired_status) {
            let body = with_version(json!({ "status": patch }), &current);
            match store.patch_status(&name, &body).await {
                Ok(obj) => {
                    current = obj;
                    status_patched = true;
                }
                Err(e) if e.is_not_found() => {
                    debug!(kind = %K::kind(&()), name = name.as_str(), "persist: vanished during status patch");
                    return Ok(PersistOutcome::Vanished);
                }
                Err(e) => return Err(PersistError::new::<K>(&name, e)),
            }
        }
    }

    if content_patched || status_patched {
        debug!(
            kind = %K::kind(&()),
            name = name.as_str(),
            content = content_patched,
            status = status_patched,
            "persist: patched"
        );
        Ok(PersistOutcome::Patched {
            object: current,
            content: content_patched,
            status: status_patched,
        })
    } else {
        Ok(PersistOutcome::Unchanged)
    }
}

impl<K: TrackedKind> TrackedSet<K> {
    /// Persist every defined object and apply pending deletions.
    ///
    /// Entries are only updated after a successful write, so a failed pass
    /// leaves the set as it was for that object.
    pub async fn persist(&mut self) -> Result<PersistReport, PersistError> {
        let mut report = PersistReport::default();

        for (name, entry) in &mut self.entries {
            let Some(desired) = entry.desired.as_ref() else {
                continue;
            };
            let outcome = persist_object(self.store.as_ref(), entry.persisted.as_ref(), desired).await?;
            report.record(&outcome);
            match outcome {
                PersistOutcome::Created(obj) | PersistOutcome::Patched { object: obj, .. } => {
                    entry.persisted = Some(obj);
                    entry.desired = None;
                }
                PersistOutcome::Unchanged => entry.desired = None,
                PersistOutcome::Vanished => {
                    debug!(kind = %K::kind(&()), name = name.as_str(), "persist: dropping vanished entry");
                    entry.persisted = None;
                    entry.desired = None;
                }
            }
        }

        let deletions = std::mem::take(&mut self.deletions);
        for (name, version) in deletions {
            match self.store.delete(&name, version.as_deref()).await {
                Ok(()) => report.deleted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    self.deletions.insert(name.clone(), version);
                    return Err(PersistError::new::<K>(&name, e));
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::store::{MemoryStore, WriteVerb};
    use crate::crd::{CacheBatch, CacheBatchSpec, JobPhase, JobStatus};
    use std::sync::Arc;

    fn batch(config: &str) -> CacheBatch {
        let mut batch = CacheBatch::new(
            "b",
            CacheBatchSpec {
                cluster: "c".into(),
                config_map: None,
                config: Some(config.into()),
            },
        );
        batch.status = Some(JobStatus::default());
        batch
    }

    #[tokio::test]
    async fn test_absent_object_is_created() {
        let store = MemoryStore::<CacheBatch>::new();
        let outcome = persist_object(&store, None, &batch("x")).await.unwrap();
        assert!(matches!(outcome, PersistOutcome::Created(_)));
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_status_only_change_issues_status_patch_only() {
        let store = MemoryStore::<CacheBatch>::new();
        store.insert(&batch("x")).unwrap();
        let persisted = store.get("b").await.unwrap();

        let mut desired = persisted.clone();
        desired.status = Some(JobStatus {
            phase: JobPhase::Validating,
            ..JobStatus::default()
        });

        let outcome = persist_object(&store, Some(&persisted), &desired)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            PersistOutcome::Patched {
                content: false,
                status: true,
                ..
            }
        ));
        let verbs: Vec<_> = store.writes().into_iter().map(|w| w.verb).collect();
        assert_eq!(verbs, vec![WriteVerb::PatchStatus]);
    }

    #[tokio::test]
    async fn test_spec_only_change_issues_content_patch_only() {
        let store = MemoryStore::<CacheBatch>::new();
        store.insert(&batch("x")).unwrap();
        let persisted = store.get("b").await.unwrap();

        let mut desired = persisted.clone();
        desired.spec.config = Some("y".into());

        persist_object(&store, Some(&persisted), &desired)
            .await
            .unwrap();
        let verbs: Vec<_> = store.writes().into_iter().map(|w| w.verb).collect();
        assert_eq!(verbs, vec![WriteVerb::Patch]);
    }

    #[tokio::test]
    async fn test_unchanged_object_issues_no_write() {
        let store = MemoryStore::<CacheBatch>::new();
        store.insert(&batch("x")).unwrap();
        let persisted = store.get("b").await.unwrap();
        let outcome = persist_object(&store, Some(&persisted), &persisted.clone())
            .await
            .unwrap();
        assert!(matches!(outcome, PersistOutcome::Unchanged));
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_stale_version_is_retryable_conflict() {
        let store = Arc::new(MemoryStore::<CacheBatch>::new());
        store.insert(&batch("x")).unwrap();
        let mut set = TrackedSet::new(store.clone());
        set.load("b").await.unwrap();

        store
            .mutate("b", |b| b.spec.config = Some("external".into()))
            .unwrap();

        set.define(batch("mine"));
        let err = set.persist().await.unwrap_err();
        assert!(err.is_conflict());
        assert!(err.is_retryable());

        // The registry still holds the desired object for the next attempt
        assert!(set.tracked("b").unwrap().is_updated());
        assert_eq!(set.get("b").unwrap().spec.config.as_deref(), Some("mine"));
        assert_eq!(
            store.object("b").unwrap().spec.config.as_deref(),
            Some("external")
        );
    }

    #[tokio::test]
    async fn test_vanished_object_is_not_an_error() {
        let store = Arc::new(MemoryStore::<CacheBatch>::new());
        store.insert(&batch("x")).unwrap();
        let mut set = TrackedSet::new(store.clone());
        set.load("b").await.unwrap();
        store.delete("b", None).await.unwrap();

        set.define(batch("y"));
        let report = set.persist().await.unwrap();
        assert_eq!(report.writes(), 0);
    }

    #[tokio::test]
    async fn test_second_persist_is_a_no_op() {
        let store = Arc::new(MemoryStore::<CacheBatch>::new());
        let mut set = TrackedSet::new(store.clone());
        set.define(batch("x"));
        assert_eq!(set.persist().await.unwrap().created, 1);
        assert_eq!(set.persist().await.unwrap().writes(), 0);
    }
}
