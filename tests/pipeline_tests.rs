//! Pipeline composition and executor semantics with purpose-built handlers.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cache_operator::controller::context::Context;
use cache_operator::controller::pipeline::{
    PipelineBuilder, PipelineError, ResourceKind, Stage, Step,
};
use cache_operator::controller::registry::PersistError;
use cache_operator::controller::store::MemoryStore;
use cache_operator::crd::{CacheBackup, CacheBackupSpec};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;

use common::{Harness, CLUSTER, NAMESPACE};

enum TestStep {
    /// Define a ConfigMap named after the handler
    Mark(&'static str),
    Panic,
    Stop,
    Wait(&'static str, Duration),
    WaitLater(Duration),
    SoftError,
    /// Load `shared`, change it, and let another writer change it first
    RacingWrite(Arc<MemoryStore<ConfigMap>>),
    Collect(&'static str),
}

fn config_map(name: &str, value: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([("value".to_string(), value.to_string())])),
        ..ConfigMap::default()
    }
}

#[async_trait]
impl Step<CacheBackup> for TestStep {
    fn name(&self) -> &'static str {
        match self {
            Self::Mark(name) | Self::Wait(name, _) | Self::Collect(name) => *name,
            Self::Panic => "panic",
            Self::Stop => "stop",
            Self::WaitLater(_) => "wait-later",
            Self::SoftError => "soft-error",
            Self::RacingWrite(_) => "racing-write",
        }
    }

    fn stage(&self) -> Stage {
        match self {
            Self::Collect(_) => Stage::Collect,
            _ => Stage::Manage,
        }
    }

    fn touches(&self) -> &'static [ResourceKind] {
        &[ResourceKind::ConfigMap]
    }

    async fn run(&self, ctx: &mut Context<CacheBackup>) {
        match self {
            Self::Mark(name) | Self::Collect(name) => {
                ctx.registry.config_maps.define(config_map(name, "set"));
            }
            Self::Panic => panic!("kaboom"),
            Self::Stop => ctx.flow.stop_processing(),
            Self::Wait(_, delay) => ctx.flow.requeue(*delay),
            Self::WaitLater(delay) => ctx.flow.requeue_later(*delay),
            Self::SoftError => ctx.flow.error(anyhow::anyhow!("degraded")),
            Self::RacingWrite(store) => {
                let mut shared = ctx
                    .registry
                    .config_maps
                    .load("shared")
                    .await
                    .expect("shared config map");
                shared.data = Some(BTreeMap::from([("value".to_string(), "ours".to_string())]));
                ctx.registry.config_maps.define(shared);
                store
                    .mutate("shared", |cm| {
                        cm.data = Some(BTreeMap::from([(
                            "value".to_string(),
                            "theirs".to_string(),
                        )]));
                    })
                    .expect("concurrent write");
            }
        }
    }
}

fn instance(harness: &Harness) -> CacheBackup {
    let mut backup = CacheBackup::new(
        "nightly",
        CacheBackupSpec {
            cluster: CLUSTER.to_string(),
            resources: None,
        },
    );
    backup.metadata.namespace = Some(NAMESPACE.to_string());
    harness.stores.backups.insert(&backup).unwrap();
    harness.stores.backups.object("nightly").unwrap()
}

#[test]
fn test_builder_rejects_duplicates() {
    let err = PipelineBuilder::<CacheBackup, TestStep>::new()
        .with(TestStep::Mark("a"))
        .with(TestStep::Mark("a"))
        .build()
        .unwrap_err();
    assert_eq!(err, PipelineError::Duplicate("a"));
}

#[test]
fn test_builder_rejects_stage_regression() {
    let err = PipelineBuilder::<CacheBackup, TestStep>::new()
        .with(TestStep::Mark("manage"))
        .with(TestStep::Collect("collect"))
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        PipelineError::OutOfOrder {
            handler: "collect",
            stage: Stage::Collect,
            previous: Stage::Manage,
        }
    );
}

#[test]
fn test_builder_conditional_inclusion() {
    let pipeline = PipelineBuilder::<CacheBackup, TestStep>::new()
        .with(TestStep::Collect("collect"))
        .with_if(false, TestStep::Mark("skipped"))
        .with_if(true, TestStep::Mark("kept"))
        .build()
        .unwrap();
    assert_eq!(pipeline.names(), vec!["collect", "kept"]);
    assert!(pipeline.touches().contains(&ResourceKind::ConfigMap));

    let empty = PipelineBuilder::<CacheBackup, TestStep>::new()
        .with_if(false, TestStep::Mark("skipped"))
        .build()
        .unwrap_err();
    assert_eq!(empty, PipelineError::Empty);
}

#[tokio::test]
async fn test_handlers_run_in_order_and_persist() {
    let harness = Harness::new();
    let pipeline = PipelineBuilder::<CacheBackup, TestStep>::new()
        .with(TestStep::Collect("first"))
        .with(TestStep::Mark("second"))
        .build()
        .unwrap();

    let outcome = harness.reconciler.run(&pipeline, instance(&harness)).await;

    assert_eq!(outcome.executed, vec!["first", "second"]);
    assert!(!outcome.retry);
    assert!(outcome.err.is_none());
    assert_eq!(outcome.report.created, 2);
    assert_eq!(harness.stores.config_maps.names(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_panic_is_contained_and_retried() {
    let harness = Harness::new();
    let pipeline = PipelineBuilder::<CacheBackup, TestStep>::new()
        .with(TestStep::Mark("before"))
        .with(TestStep::Panic)
        .with(TestStep::Mark("after"))
        .build()
        .unwrap();

    let outcome = harness.reconciler.run(&pipeline, instance(&harness)).await;

    assert_eq!(outcome.executed, vec!["before", "panic"]);
    assert!(outcome.retry);
    let message = format!("{:#}", outcome.err.expect("panic recorded"));
    assert!(message.contains("handler 'panic' panicked: kaboom"), "{message}");
    // Work done before the panic is still persisted
    assert!(harness.stores.config_maps.contains("before"));
    assert!(!harness.stores.config_maps.contains("after"));
}

#[tokio::test]
async fn test_stop_skips_remaining_handlers_without_retry() {
    let harness = Harness::new();
    let pipeline = PipelineBuilder::<CacheBackup, TestStep>::new()
        .with(TestStep::Stop)
        .with(TestStep::Mark("after"))
        .build()
        .unwrap();

    let outcome = harness.reconciler.run(&pipeline, instance(&harness)).await;

    assert_eq!(outcome.executed, vec!["stop"]);
    assert!(!outcome.retry);
    assert!(outcome.err.is_none());
}

#[tokio::test]
async fn test_requeue_later_continues_and_shortest_delay_wins() {
    let harness = Harness::new();
    let pipeline = PipelineBuilder::<CacheBackup, TestStep>::new()
        .with(TestStep::WaitLater(Duration::from_secs(30)))
        .with(TestStep::Mark("middle"))
        .with(TestStep::Wait("wait", Duration::from_secs(5)))
        .with(TestStep::Mark("after"))
        .build()
        .unwrap();

    let outcome = harness.reconciler.run(&pipeline, instance(&harness)).await;

    assert_eq!(outcome.executed, vec!["wait-later", "middle", "wait"]);
    assert!(outcome.retry);
    assert!(outcome.err.is_none());
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(5)));
}

#[tokio::test]
async fn test_soft_error_keeps_processing() {
    let harness = Harness::new();
    let pipeline = PipelineBuilder::<CacheBackup, TestStep>::new()
        .with(TestStep::SoftError)
        .with(TestStep::Mark("after"))
        .build()
        .unwrap();

    let outcome = harness.reconciler.run(&pipeline, instance(&harness)).await;

    assert_eq!(outcome.executed, vec!["soft-error", "after"]);
    assert!(!outcome.retry);
    assert_eq!(outcome.err.expect("error recorded").to_string(), "degraded");
    assert!(harness.stores.config_maps.contains("after"));
}

#[tokio::test]
async fn test_cancelled_invocation_retries_without_running_handlers() {
    let harness = Harness::new();
    let pipeline = PipelineBuilder::<CacheBackup, TestStep>::new()
        .with(TestStep::Mark("first"))
        .build()
        .unwrap();

    harness.cancel.cancel();
    let outcome = harness.reconciler.run(&pipeline, instance(&harness)).await;

    assert!(outcome.executed.is_empty());
    assert!(outcome.retry);
    let message = outcome.err.expect("cancellation recorded").to_string();
    assert!(message.contains("cancelled"), "{message}");
    assert!(harness.stores.config_maps.names().is_empty());
}

#[tokio::test]
async fn test_concurrent_write_surfaces_as_conflict() {
    let harness = Harness::new();
    harness
        .stores
        .config_maps
        .insert(&config_map("shared", "initial"))
        .unwrap();
    let pipeline = PipelineBuilder::<CacheBackup, TestStep>::new()
        .with(TestStep::RacingWrite(Arc::clone(&harness.stores.config_maps)))
        .build()
        .unwrap();

    let outcome = harness.reconciler.run(&pipeline, instance(&harness)).await;

    assert!(outcome.retry);
    let err = outcome.err.expect("conflict recorded");
    let persist = err.downcast_ref::<PersistError>().expect("persist error");
    assert!(persist.is_conflict());
    assert!(persist.is_retryable());

    // The other writer's change is kept
    let stored = harness.stores.config_maps.object("shared").unwrap();
    assert_eq!(stored.data.unwrap()["value"], "theirs");
}
