//! # Reconciler
//!
//! Shared state handed to every kube-runtime controller, and the glue between
//! a pipeline run and the scheduler's [`Action`].
//!
//! Each invocation reloads the target object, builds a fresh
//! [`Context`](super::context::Context) from the provider, executes the
//! pipeline (which closes the context) and maps the flow outcome:
//!
//! - an error becomes `Err`, so the error policy applies backoff
//! - a retry without error becomes `Action::requeue` after the requested delay
//! - anything else waits for the next change

use std::fmt;
use std::time::Instant;

use kube::ResourceExt;
use kube_runtime::controller::Action;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use super::backoff::BackoffRegistry;
use super::context::ContextProvider;
use super::pipeline::{Pipeline, PipelineError, PipelineOutcome, Step};
use super::registry::TrackedKind;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{0:#}")]
    Pipeline(anyhow::Error),

    #[error("invalid pipeline: {0}")]
    Composition(#[from] PipelineError),

    #[error("loading {kind} '{name}': {source}")]
    Load {
        kind: String,
        name: String,
        #[source]
        source: crate::controller::store::StoreError,
    },
}

pub struct Reconciler {
    provider: ContextProvider,
    backoff: BackoffRegistry,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("provider", &self.provider)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// `namespace/name`, the key backoff state is tracked under
#[must_use]
pub fn object_key<K: ResourceExt>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.namespace().unwrap_or_else(|| "default".to_string()),
        obj.name_any()
    )
}

impl Reconciler {
    #[must_use]
    pub fn new(provider: ContextProvider, backoff: BackoffRegistry) -> Self {
        Self { provider, backoff }
    }

    #[must_use]
    pub fn provider(&self) -> &ContextProvider {
        &self.provider
    }

    #[must_use]
    pub fn backoff(&self) -> &BackoffRegistry {
        &self.backoff
    }

    /// Latest stored version of `obj`, `None` once it has been deleted
    ///
    /// # Errors
    ///
    /// Any store failure other than not-found.
    pub async fn load<K: TrackedKind>(&self, obj: &K) -> Result<Option<K>, ReconcileError> {
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        let name = obj.name_any();
        let store = K::store(self.provider.stores(), &namespace);
        match store.get(&name).await {
            Ok(latest) => Ok(Some(latest)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(source) => Err(ReconcileError::Load {
                kind: K::kind(&()).to_string(),
                name,
                source,
            }),
        }
    }

    /// Run `pipeline` against a fresh context for `instance`
    pub async fn run<K, H>(&self, pipeline: &Pipeline<K, H>, instance: K) -> PipelineOutcome
    where
        K: TrackedKind,
        H: Step<K>,
    {
        let kind = K::kind(&()).to_string();
        let span = info_span!(
            "controller.reconcile",
            kind = kind.as_str(),
            resource.name = %instance.name_any(),
            resource.namespace = instance.namespace().as_deref().unwrap_or("default"),
            resource.version = instance.resource_version().as_deref().unwrap_or("unknown"),
        );

        async {
            metrics::increment_reconciliations(&kind);
            let started = Instant::now();
            let mut ctx = self.provider.context(instance);
            let outcome = pipeline.execute(&mut ctx).await;
            metrics::observe_reconciliation_duration(&kind, started.elapsed().as_secs_f64());

            debug!(
                handlers = ?outcome.executed,
                writes = outcome.report.writes(),
                retry = outcome.retry,
                "pipeline finished"
            );
            outcome
        }
        .instrument(span)
        .await
    }

    /// Translate a pipeline outcome into the scheduler's next action
    ///
    /// # Errors
    ///
    /// [`ReconcileError::Pipeline`] when any handler recorded an error.
    pub fn action<K: TrackedKind>(&self, key: &str, outcome: PipelineOutcome) -> Result<Action, ReconcileError> {
        let kind = K::kind(&());
        if let Some(err) = outcome.err {
            metrics::increment_reconciliation_errors(&kind);
            warn!(resource = key, kind = %kind, retry = outcome.retry, error = %format!("{err:#}"), "reconcile failed");
            return Err(ReconcileError::Pipeline(err));
        }

        self.backoff.reset(key);
        if outcome.retry {
            let delay = outcome
                .requeue_after
                .unwrap_or(self.provider.settings().wait_requeue);
            metrics::increment_requeues(&kind, "waiting");
            debug!(resource = key, delay_secs = delay.as_secs(), "requeueing");
            return Ok(Action::requeue(delay));
        }
        Ok(Action::await_change())
    }

    /// Reload `obj`, run `pipeline` and decide what happens next
    ///
    /// # Errors
    ///
    /// See [`ReconcileError`].
    pub async fn reconcile<K, H>(&self, pipeline: &Pipeline<K, H>, obj: &K) -> Result<Action, ReconcileError>
    where
        K: TrackedKind,
        H: Step<K>,
    {
        let key = object_key(obj);
        let Some(instance) = self.load(obj).await? else {
            info!(resource = key.as_str(), kind = %K::kind(&()), "object deleted, nothing to reconcile");
            self.backoff.reset(&key);
            return Ok(Action::await_change());
        };
        let outcome = self.run(pipeline, instance).await;
        self.action::<K>(&key, outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::controller::pipeline::PipelineOutcome;
    use crate::crd::{CacheBackup, CacheBackupSpec};

    fn reconciler() -> Reconciler {
        let stores = Arc::new(crate::controller::store::MemoryStoreFactory::new());
        let collaborators = crate::controller::context::Collaborators {
            stores,
            events: Arc::new(crate::events::NoopEventPublisher),
            admin: Arc::new(crate::admin::HttpAdminFactory::new(11223, false)),
            logs: Arc::new(NoLogs),
        };
        let provider = ContextProvider::new(
            collaborators,
            Arc::new(crate::config::OperatorSettings::default()),
            tokio_util::sync::CancellationToken::new(),
        );
        Reconciler::new(
            provider,
            BackoffRegistry::new(Duration::from_millis(100), Duration::from_secs(10)),
        )
    }

    struct NoLogs;

    #[async_trait::async_trait]
    impl crate::workload::WorkloadLogs for NoLogs {
        async fn job_logs(&self, _namespace: &str, _job: &str) -> Result<String, crate::workload::WorkloadError> {
            Ok(String::new())
        }
    }

    #[test]
    fn test_object_key() {
        let mut backup = CacheBackup::new(
            "nightly",
            CacheBackupSpec {
                cluster: "example".into(),
                resources: None,
            },
        );
        assert_eq!(object_key(&backup), "default/nightly");
        backup.metadata.namespace = Some("caches".into());
        assert_eq!(object_key(&backup), "caches/nightly");
    }

    #[test]
    fn test_error_outcome_is_an_error() {
        let reconciler = reconciler();
        let outcome = PipelineOutcome {
            retry: true,
            err: Some(anyhow::anyhow!("boom")),
            ..PipelineOutcome::default()
        };
        let err = reconciler.action::<CacheBackup>("caches/nightly", outcome).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_retry_without_error_requeues_after_requested_delay() {
        let reconciler = reconciler();
        let outcome = PipelineOutcome {
            retry: true,
            requeue_after: Some(Duration::from_secs(7)),
            ..PipelineOutcome::default()
        };
        let action = reconciler.action::<CacheBackup>("caches/nightly", outcome).unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(7)));
    }

    #[test]
    fn test_retry_without_delay_uses_wait_requeue() {
        let reconciler = reconciler();
        let outcome = PipelineOutcome {
            retry: true,
            ..PipelineOutcome::default()
        };
        let action = reconciler.action::<CacheBackup>("caches/nightly", outcome).unwrap();
        let wait = reconciler.provider().settings().wait_requeue;
        assert_eq!(action, Action::requeue(wait));
    }

    #[test]
    fn test_clean_outcome_awaits_change() {
        let reconciler = reconciler();
        let action = reconciler
            .action::<CacheBackup>("caches/nightly", PipelineOutcome::default())
            .unwrap();
        assert_eq!(action, Action::await_change());
    }
}
