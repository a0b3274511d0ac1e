//! Mirroring of cluster-side caches into `Cache` resources.

mod common;

use std::sync::Arc;
use std::time::Duration;

use cache_operator::config::OperatorSettings;
use cache_operator::constants::LABEL_ORIGIN;
use cache_operator::controller::cluster::reconcile_cluster;
use cache_operator::crd::{Cache, CacheSpec};
use k8s_openapi::api::apps::v1::StatefulSetStatus;
use kube_runtime::controller::Action;

use common::{cluster, settings, Harness, CLUSTER, NAMESPACE};

const SYNC_INTERVAL: Duration = Duration::from_secs(30);

fn syncing_harness() -> Harness {
    Harness::with_settings(OperatorSettings {
        cache_sync_enabled: true,
        cache_sync_interval: SYNC_INTERVAL,
        ..settings()
    })
}

async fn reconcile(harness: &Harness) -> Action {
    let current = harness.stores.cache_clusters.object(CLUSTER).expect("cluster exists");
    reconcile_cluster(Arc::new(current), Arc::clone(&harness.reconciler))
        .await
        .expect("reconcile succeeds")
}

/// Provision a 3-member cluster and reconcile until it is well formed
async fn form_cluster(harness: &Harness) -> Action {
    harness.stores.cache_clusters.insert(&cluster(3)).unwrap();
    reconcile(harness).await;
    harness
        .stores
        .stateful_sets
        .mutate(CLUSTER, |sts| {
            sts.status = Some(StatefulSetStatus {
                replicas: 3,
                ready_replicas: Some(3),
                ..StatefulSetStatus::default()
            });
        })
        .unwrap();
    harness.admin.set_members(3);
    let action = reconcile(harness).await;
    assert!(harness
        .stores
        .cache_clusters
        .object(CLUSTER)
        .unwrap()
        .is_well_formed());
    action
}

fn origin(cache: &Cache) -> Option<&str> {
    cache
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LABEL_ORIGIN))
        .map(String::as_str)
}

fn cache_writes(harness: &Harness) -> usize {
    harness
        .stores
        .writes()
        .iter()
        .filter(|w| w.kind == "Cache")
        .count()
}

#[tokio::test]
async fn test_mirror_follows_cluster_caches() {
    let harness = syncing_harness();
    harness.admin.add_cache("orders", "{\"distributed-cache\":{}}");

    let action = form_cluster(&harness).await;
    assert_eq!(action, Action::requeue(SYNC_INTERVAL));

    let mirror = harness.stores.caches.object("example-orders").expect("mirror created");
    assert_eq!(mirror.spec.cluster_name, CLUSTER);
    assert_eq!(mirror.spec.name.as_deref(), Some("orders"));
    assert_eq!(mirror.spec.template.as_deref(), Some("{\"distributed-cache\":{}}"));
    assert_eq!(mirror.spec.template_name, None);
    assert_eq!(origin(&mirror), Some("cluster"));
    assert_eq!(
        mirror.metadata.owner_references.unwrap()[0].kind,
        "CacheCluster"
    );

    // Nothing changed on the cluster
    harness.stores.clear_writes();
    let action = reconcile(&harness).await;
    assert_eq!(action, Action::requeue(SYNC_INTERVAL));
    assert_eq!(cache_writes(&harness), 0);

    harness.admin.add_cache("orders", "{\"replicated-cache\":{}}");
    reconcile(&harness).await;
    let mirror = harness.stores.caches.object("example-orders").unwrap();
    assert_eq!(mirror.spec.template.as_deref(), Some("{\"replicated-cache\":{}}"));

    harness.admin.remove_cache("orders");
    reconcile(&harness).await;
    assert!(harness.stores.caches.names().is_empty());
}

#[tokio::test]
async fn test_internal_caches_are_not_mirrored() {
    let harness = syncing_harness();
    harness.admin.add_cache("___protobuf_metadata", "{}");
    harness.admin.add_cache("___script_cache", "{}");
    harness.admin.add_cache("sessions", "{}");

    form_cluster(&harness).await;

    assert_eq!(harness.stores.caches.names(), vec!["example-sessions"]);
}

#[tokio::test]
async fn test_user_resource_keeps_its_name() {
    let harness = syncing_harness();
    let mut declared = Cache::new(
        "example-orders",
        CacheSpec {
            cluster_name: CLUSTER.to_string(),
            name: Some("inventory".to_string()),
            template_name: Some("tpl".to_string()),
            template: None,
        },
    );
    declared.metadata.namespace = Some(NAMESPACE.to_string());
    harness.stores.caches.insert(&declared).unwrap();
    harness.admin.add_cache("inventory", "{}");
    harness.admin.add_cache("orders", "{\"distributed-cache\":{}}");

    form_cluster(&harness).await;
    reconcile(&harness).await;

    assert_eq!(harness.stores.caches.names(), vec!["example-orders"]);
    let stored = harness.stores.caches.object("example-orders").unwrap();
    assert_eq!(stored.spec, declared.spec);
    assert_eq!(origin(&stored), None);
    assert_eq!(cache_writes(&harness), 0);
}

#[tokio::test]
async fn test_sync_disabled_awaits_change() {
    let harness = Harness::new();
    harness.admin.add_cache("orders", "{}");

    let action = form_cluster(&harness).await;

    assert_eq!(action, Action::await_change());
    assert!(harness.stores.caches.names().is_empty());
}
