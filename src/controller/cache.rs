//! Outer reconcile entry point for `Cache`.

use std::sync::{Arc, LazyLock};

use kube_runtime::controller::Action;

use super::pipeline::cache::{pipeline, CacheHandler};
use super::pipeline::{Pipeline, PipelineError};
use super::reconciler::{ReconcileError, Reconciler};
use crate::crd::Cache;

static PIPELINE: LazyLock<Result<Pipeline<Cache, CacheHandler>, PipelineError>> =
    LazyLock::new(pipeline);

/// Reconcile one `Cache`
///
/// # Errors
///
/// See [`ReconcileError`].
pub async fn reconcile_cache(cache: Arc<Cache>, reconciler: Arc<Reconciler>) -> Result<Action, ReconcileError> {
    let pipeline = PIPELINE.as_ref().map_err(|e| ReconcileError::Composition(e.clone()))?;
    reconciler.reconcile(pipeline, cache.as_ref()).await
}
