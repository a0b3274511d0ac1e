//! # Error Policy
//!
//! Error handling and backoff for the controller watch loops.
//!
//! Failed reconciles back off per object (`namespace/name`) so one broken
//! resource never slows down the others. The backoff is reset by the
//! reconciler as soon as the object reconciles cleanly.

use std::sync::Arc;

use kube::{Resource, ResourceExt};
use kube_runtime::controller::{self, Action};
use kube_runtime::watcher;
use tracing::{debug, error, warn};

use crate::controller::reconciler::{object_key, ReconcileError, Reconciler};
use crate::observability::metrics;

/// Requeue delay for a failed reconcile of `obj`
pub fn backoff_on_error<K>(obj: Arc<K>, error: &ReconcileError, reconciler: Arc<Reconciler>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let kind = K::kind(&());
    let key = object_key(obj.as_ref());

    if let ReconcileError::Composition(e) = error {
        // A malformed pipeline will not fix itself; come back rarely.
        error!(resource = key.as_str(), kind = %kind, error = %e, "pipeline composition rejected");
        metrics::increment_requeues(&kind, "invalid-pipeline");
        return Action::requeue(reconciler.provider().settings().error_requeue);
    }

    let (delay, errors) = reconciler.backoff().next_delay(&key);
    warn!(
        resource.name = %obj.name_any(),
        resource.namespace = obj.namespace().as_deref().unwrap_or("default"),
        kind = %kind,
        error = %error,
        error_count = errors,
        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        "reconcile failed, backing off"
    );
    metrics::increment_requeues(&kind, "error-backoff");
    Action::requeue(delay)
}

/// How the watch loop should treat an error surfaced by a controller stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorClass {
    /// Already handled by [`backoff_on_error`]
    Reconcile,
    /// A queued object disappeared before it was reconciled
    NotFound,
    /// Watch stream failure; kube-runtime re-lists on its own
    Watch,
    Other,
}

/// Classify and log a controller stream error
pub fn handle_stream_error(
    kind: &str,
    error: &controller::Error<ReconcileError, watcher::Error>,
) -> StreamErrorClass {
    match error {
        controller::Error::ReconcilerFailed(e, obj) => {
            debug!(kind, object = %obj, error = %e, "controller.stream.reconcile_failed");
            StreamErrorClass::Reconcile
        }
        controller::Error::ObjectNotFound(obj) => {
            debug!(kind, object = %obj, "controller.stream.object_not_found");
            StreamErrorClass::NotFound
        }
        controller::Error::QueueError(e) => {
            warn!(kind, error = %e, "controller.stream.watch_error");
            StreamErrorClass::Watch
        }
        other => {
            error!(kind, error = %other, "controller.stream.error");
            StreamErrorClass::Other
        }
    }
}
