//! Cache reconciles against a fake administration endpoint.

mod common;

use std::sync::Arc;
use std::time::Duration;

use cache_operator::constants::CONDITION_READY;
use cache_operator::controller::cache::reconcile_cache;
use cache_operator::crd::{Cache, CacheSpec, Condition};
use kube_runtime::controller::Action;

use common::{Harness, CLUSTER, NAMESPACE};

fn cache(cluster: &str, template_name: Option<&str>, template: Option<&str>) -> Cache {
    let mut cache = Cache::new(
        "orders",
        CacheSpec {
            cluster_name: cluster.to_string(),
            name: None,
            template_name: template_name.map(str::to_string),
            template: template.map(str::to_string),
        },
    );
    cache.metadata.namespace = Some(NAMESPACE.to_string());
    cache
}

async fn reconcile(harness: &Harness) -> Action {
    let current = harness.stores.caches.object("orders").expect("cache exists");
    reconcile_cache(Arc::new(current), Arc::clone(&harness.reconciler))
        .await
        .expect("reconcile succeeds")
}

fn ready_condition(harness: &Harness) -> Condition {
    harness
        .stores
        .caches
        .object("orders")
        .and_then(|c| c.status)
        .and_then(|s| s.conditions.into_iter().find(|c| c.r#type == CONDITION_READY))
        .expect("ready condition")
}

#[tokio::test]
async fn test_cache_is_created_on_the_cluster() {
    let harness = Harness::new();
    harness.seed_well_formed_cluster();
    harness
        .stores
        .caches
        .insert(&cache(CLUSTER, Some("org.infinispan.DIST_SYNC"), None))
        .unwrap();

    let action = reconcile(&harness).await;

    assert_eq!(action, Action::await_change());
    assert!(harness.admin.cache_names().contains("orders"));
    let condition = ready_condition(&harness);
    assert!(condition.is_true());
    assert_eq!(condition.reason.as_deref(), Some("CacheReady"));
    let status = harness.stores.caches.object("orders").unwrap().status.unwrap();
    assert_eq!(status.service_name.as_deref(), Some(CLUSTER));
    assert_eq!(harness.reasons(), vec!["CacheCreated"]);
}

#[tokio::test]
async fn test_existing_cache_is_not_recreated() {
    let harness = Harness::new();
    harness.seed_well_formed_cluster();
    harness.admin.add_cache("orders", "{\"distributed-cache\":{}}");
    harness
        .stores
        .caches
        .insert(&cache(CLUSTER, None, Some("{\"distributed-cache\":{\"mode\":\"SYNC\"}}")))
        .unwrap();

    reconcile(&harness).await;
    harness.stores.clear_writes();
    reconcile(&harness).await;

    assert!(harness.reasons().is_empty());
    assert!(harness.stores.writes().is_empty());
    assert!(ready_condition(&harness).is_true());
}

#[tokio::test]
async fn test_missing_cluster_requeues() {
    let harness = Harness::new();
    harness
        .stores
        .caches
        .insert(&cache("absent", Some("dist"), None))
        .unwrap();

    let action = reconcile(&harness).await;

    assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    let condition = ready_condition(&harness);
    assert!(!condition.is_true());
    assert_eq!(condition.reason.as_deref(), Some("ClusterNotFound"));
    assert!(harness.admin.cache_names().is_empty());
}

#[tokio::test]
async fn test_cluster_not_well_formed_requeues() {
    let harness = Harness::new();
    harness.stores.cache_clusters.insert(&common::cluster(3)).unwrap();
    harness
        .stores
        .caches
        .insert(&cache(CLUSTER, Some("dist"), None))
        .unwrap();

    let action = reconcile(&harness).await;

    assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    assert_eq!(
        ready_condition(&harness).reason.as_deref(),
        Some("ClusterNotWellFormed")
    );
}

#[tokio::test]
async fn test_invalid_spec_stops_without_retry() {
    let harness = Harness::new();
    harness.seed_well_formed_cluster();
    harness.stores.caches.insert(&cache(CLUSTER, None, None)).unwrap();

    let action = reconcile(&harness).await;

    assert_eq!(action, Action::await_change());
    let condition = ready_condition(&harness);
    assert_eq!(condition.reason.as_deref(), Some("InvalidSpec"));
    assert!(harness.admin.cache_names().is_empty());
}

#[tokio::test]
async fn test_deleted_cache_awaits_change() {
    let harness = Harness::new();
    let action = reconcile_cache(
        Arc::new(cache(CLUSTER, Some("dist"), None)),
        Arc::clone(&harness.reconciler),
    )
    .await
    .unwrap();
    assert_eq!(action, Action::await_change());
}
