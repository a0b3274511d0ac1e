//! # Resource Registry
//!
//! Per-kind tracking of desired vs persisted objects for one reconcile, and
//! the engine that writes the difference back to the store.
//!
//! - `kinds`: which fields of each kind the operator owns
//! - `diff`: JSON merge patch generation over those projections
//! - `tracked`: [`Tracked`] and [`TrackedSet`] bookkeeping
//! - `persist`: the Diff-and-Persist engine

mod diff;
mod kinds;
mod persist;
mod tracked;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};

use crate::controller::store::StoreFactory;
use crate::crd::{Cache, CacheCluster};

pub use diff::{apply_merge_patch, merge_patch};
pub use kinds::TrackedKind;
pub use persist::{persist_object, PersistError, PersistOutcome, PersistReport};
pub use tracked::{Tracked, TrackedSet};

/// Tracked objects of every kind a pipeline may touch
#[derive(Debug)]
pub struct ResourceRegistry {
    pub secrets: TrackedSet<Secret>,
    pub config_maps: TrackedSet<ConfigMap>,
    pub services: TrackedSet<Service>,
    pub stateful_sets: TrackedSet<StatefulSet>,
    pub jobs: TrackedSet<Job>,
    pub caches: TrackedSet<Cache>,
    pub cache_clusters: TrackedSet<CacheCluster>,
}

impl ResourceRegistry {
    #[must_use]
    pub fn new(factory: &dyn StoreFactory, namespace: &str) -> Self {
        Self {
            secrets: TrackedSet::new(factory.secrets(namespace)),
            config_maps: TrackedSet::new(factory.config_maps(namespace)),
            services: TrackedSet::new(factory.services(namespace)),
            stateful_sets: TrackedSet::new(factory.stateful_sets(namespace)),
            jobs: TrackedSet::new(factory.jobs(namespace)),
            caches: TrackedSet::new(factory.caches(namespace)),
            cache_clusters: TrackedSet::new(factory.cache_clusters(namespace)),
        }
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.secrets.is_dirty()
            || self.config_maps.is_dirty()
            || self.services.is_dirty()
            || self.stateful_sets.is_dirty()
            || self.jobs.is_dirty()
            || self.caches.is_dirty()
            || self.cache_clusters.is_dirty()
    }

    /// Persist every kind, dependencies first
    pub async fn persist(&mut self) -> Result<PersistReport, PersistError> {
        let mut report = PersistReport::default();
        report.merge(self.secrets.persist().await?);
        report.merge(self.config_maps.persist().await?);
        report.merge(self.services.persist().await?);
        report.merge(self.stateful_sets.persist().await?);
        report.merge(self.jobs.persist().await?);
        report.merge(self.caches.persist().await?);
        report.merge(self.cache_clusters.persist().await?);
        Ok(report)
    }
}
