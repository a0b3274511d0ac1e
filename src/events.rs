//! Kubernetes Event recording.
//!
//! Events are fire-and-forget: failures are logged and never propagate, so a
//! failed event can never break a reconcile.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event about `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    #[must_use]
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Discards every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// One event captured by [`RecordingEventPublisher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub note: Option<String>,
}

/// Keeps every published event in memory
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedEvent {
                warning: type_ == EventType::Warning,
                reason: reason.to_string(),
                note,
            });
    }
}

/// Event reason strings, shown under REASON in `kubectl get events`
pub mod reasons {
    pub const CLUSTER_WELL_FORMED: &str = "ClusterWellFormed";
    pub const CLUSTER_NOT_WELL_FORMED: &str = "ClusterNotWellFormed";
    pub const GRACEFUL_SHUTDOWN: &str = "GracefulShutdown";
    pub const MISSING_TRUSTSTORE: &str = "MissingTruststore";
    pub const CACHE_CREATED: &str = "CacheCreated";
    pub const CACHE_CREATION_FAILED: &str = "CacheCreationFailed";
    pub const PHASE_CHANGED: &str = "PhaseChanged";
    pub const JOB_FAILED: &str = "JobFailed";
    pub const HANDLER_PANIC: &str = "HandlerPanic";
}

/// Event action strings
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const PROVISION: &str = "Provision";
    pub const SHUTDOWN: &str = "Shutdown";
}
