//! Outer reconcile entry point for `CacheCluster`.

use std::sync::Arc;

use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::info;

use super::pipeline::cluster::pipeline;
use super::reconciler::{object_key, ReconcileError, Reconciler};
use crate::crd::CacheCluster;

/// Reconcile one `CacheCluster`.
///
/// The pipeline is assembled per invocation because its optional handlers
/// depend on the cluster's current spec.
///
/// # Errors
///
/// See [`ReconcileError`]; the error policy decides the retry delay.
pub async fn reconcile_cluster(
    cluster: Arc<CacheCluster>,
    reconciler: Arc<Reconciler>,
) -> Result<Action, ReconcileError> {
    let key = object_key(cluster.as_ref());
    let Some(latest) = reconciler.load(cluster.as_ref()).await? else {
        info!(resource = key.as_str(), "cluster deleted, owned resources are garbage collected");
        reconciler.backoff().reset(&key);
        return Ok(Action::await_change());
    };

    let pipeline = pipeline(&latest, reconciler.provider().settings())?;
    info!(
        resource.name = %latest.name_any(),
        handlers = ?pipeline.names(),
        "reconciling cluster"
    );
    let outcome = reconciler.run(&pipeline, latest).await;
    reconciler.action::<CacheCluster>(&key, outcome)
}
