//! CacheCluster reconciles against the in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use cache_operator::constants::{CONDITION_READY, CONDITION_WELL_FORMED};
use cache_operator::controller::cluster::reconcile_cluster;
use cache_operator::controller::store::WriteVerb;
use cache_operator::crd::{condition_is_true, CacheCluster};
use k8s_openapi::api::apps::v1::StatefulSetStatus;
use kube_runtime::controller::Action;

use common::{cluster, Harness, CLUSTER};

fn seed(harness: &Harness, replicas: i32) -> Arc<CacheCluster> {
    harness
        .stores
        .cache_clusters
        .insert(&cluster(replicas))
        .expect("seed cluster");
    Arc::new(harness.stores.cache_clusters.object(CLUSTER).expect("seeded cluster"))
}

fn mark_pods_ready(harness: &Harness, ready: i32) {
    harness
        .stores
        .stateful_sets
        .mutate(CLUSTER, |sts| {
            sts.status = Some(StatefulSetStatus {
                replicas: ready,
                ready_replicas: Some(ready),
                ..StatefulSetStatus::default()
            });
        })
        .expect("statefulset exists");
}

#[tokio::test]
async fn test_first_reconcile_provisions_owned_objects() {
    let harness = Harness::new();
    let cluster = seed(&harness, 3);

    let action = reconcile_cluster(cluster, Arc::clone(&harness.reconciler))
        .await
        .expect("reconcile succeeds");

    // Pods are not ready yet
    assert_eq!(action, Action::requeue(Duration::from_secs(5)));

    let stores = &harness.stores;
    assert!(stores.secrets.contains("example-generated-operator-secret"));
    assert!(stores.secrets.contains("example-generated-secret"));
    assert!(stores.config_maps.contains("example-configuration"));
    assert_eq!(
        stores.services.names(),
        vec!["example", "example-admin", "example-ping"]
    );
    assert!(stores.stateful_sets.contains(CLUSTER));

    let sts = stores.stateful_sets.object(CLUSTER).expect("statefulset");
    let spec = sts.spec.expect("spec");
    assert_eq!(spec.replicas, Some(3));
    assert_eq!(spec.service_name.as_deref(), Some("example-ping"));
    let owner = &sts.metadata.owner_references.expect("owner")[0];
    assert_eq!(owner.kind, "CacheCluster");
    assert_eq!(owner.name, CLUSTER);

    // The cluster itself is only ever written through its status
    let cluster_writes: Vec<_> = stores
        .writes()
        .into_iter()
        .filter(|w| w.kind == "CacheCluster")
        .collect();
    assert_eq!(cluster_writes.len(), 1);
    assert_eq!(cluster_writes[0].verb, WriteVerb::PatchStatus);

    let status = stores
        .cache_clusters
        .object(CLUSTER)
        .and_then(|c| c.status)
        .expect("status written");
    assert!(status.configuration_hash.is_some());
    assert!(!condition_is_true(&status.conditions, CONDITION_READY));
    assert!(!condition_is_true(&status.conditions, CONDITION_WELL_FORMED));
}

#[tokio::test]
async fn test_second_reconcile_is_idempotent() {
    let harness = Harness::new();
    let cluster = seed(&harness, 3);

    reconcile_cluster(Arc::clone(&cluster), Arc::clone(&harness.reconciler))
        .await
        .expect("first reconcile");
    let password = harness
        .stores
        .secrets
        .object("example-generated-operator-secret")
        .and_then(|s| s.data)
        .expect("credentials")["password"]
        .clone();
    harness.stores.clear_writes();

    reconcile_cluster(cluster, Arc::clone(&harness.reconciler))
        .await
        .expect("second reconcile");

    assert!(harness.stores.writes().is_empty());
    let again = harness
        .stores
        .secrets
        .object("example-generated-operator-secret")
        .and_then(|s| s.data)
        .expect("credentials")["password"]
        .clone();
    assert_eq!(password, again);
}

#[tokio::test]
async fn test_cluster_becomes_well_formed() {
    let harness = Harness::new();
    let cluster = seed(&harness, 3);

    reconcile_cluster(Arc::clone(&cluster), Arc::clone(&harness.reconciler))
        .await
        .expect("first reconcile");

    mark_pods_ready(&harness, 3);
    harness.admin.set_members(3);

    let action = reconcile_cluster(cluster, Arc::clone(&harness.reconciler))
        .await
        .expect("second reconcile");
    assert_eq!(action, Action::await_change());

    let stored = harness.stores.cache_clusters.object(CLUSTER).expect("cluster");
    assert!(stored.is_well_formed());
    let status = stored.status.expect("status");
    assert_eq!(status.pod_status.map(|p| p.ready), Some(3));
    assert!(harness.reasons().contains(&"ClusterWellFormed".to_string()));
}

#[tokio::test]
async fn test_member_mismatch_keeps_waiting() {
    let harness = Harness::new();
    let cluster = seed(&harness, 3);

    reconcile_cluster(Arc::clone(&cluster), Arc::clone(&harness.reconciler))
        .await
        .expect("first reconcile");
    mark_pods_ready(&harness, 3);
    harness.admin.set_members(2);

    let action = reconcile_cluster(cluster, Arc::clone(&harness.reconciler))
        .await
        .expect("second reconcile");
    assert_eq!(action, Action::requeue(Duration::from_secs(5)));

    let stored = harness.stores.cache_clusters.object(CLUSTER).expect("cluster");
    assert!(!stored.is_well_formed());
    let condition = stored
        .status
        .expect("status")
        .conditions
        .into_iter()
        .find(|c| c.r#type == CONDITION_WELL_FORMED)
        .expect("well formed condition");
    assert_eq!(condition.reason.as_deref(), Some("MembersMismatch"));
}

#[tokio::test]
async fn test_scale_to_zero_shuts_down_gracefully() {
    let harness = Harness::new();
    let cluster = seed(&harness, 3);

    reconcile_cluster(Arc::clone(&cluster), Arc::clone(&harness.reconciler))
        .await
        .expect("first reconcile");
    harness
        .stores
        .cache_clusters
        .mutate(CLUSTER, |c| c.spec.replicas = 0)
        .expect("scale down");

    reconcile_cluster(cluster, Arc::clone(&harness.reconciler))
        .await
        .expect("scale-down reconcile");

    assert_eq!(harness.admin.shutdowns(), 1);
    let stored = harness.stores.cache_clusters.object(CLUSTER).expect("cluster");
    assert!(stored.is_gracefully_shut_down());
    assert_eq!(stored.status.expect("status").replicas_wanted_at_restart, Some(3));
    let sts = harness.stores.stateful_sets.object(CLUSTER).expect("statefulset");
    assert_eq!(sts.spec.and_then(|s| s.replicas), Some(0));
}

#[tokio::test]
async fn test_deleted_cluster_awaits_change() {
    let harness = Harness::new();
    let cluster = Arc::new(cluster(3));

    let action = reconcile_cluster(cluster, Arc::clone(&harness.reconciler))
        .await
        .expect("reconcile");
    assert_eq!(action, Action::await_change());
    assert!(harness.stores.writes().is_empty());
}

#[tokio::test]
async fn test_restart_restores_previous_size_before_scaling() {
    let harness = Harness::new();
    let cluster = seed(&harness, 3);
    let sts_replicas = |harness: &Harness| {
        harness
            .stores
            .stateful_sets
            .object(CLUSTER)
            .and_then(|s| s.spec)
            .and_then(|s| s.replicas)
    };

    reconcile_cluster(Arc::clone(&cluster), Arc::clone(&harness.reconciler))
        .await
        .expect("first reconcile");
    harness
        .stores
        .cache_clusters
        .mutate(CLUSTER, |c| c.spec.replicas = 0)
        .expect("scale down");
    reconcile_cluster(Arc::clone(&cluster), Arc::clone(&harness.reconciler))
        .await
        .expect("shutdown reconcile");
    assert_eq!(sts_replicas(&harness), Some(0));

    // Restart asking for more members than were running at shutdown
    harness
        .stores
        .cache_clusters
        .mutate(CLUSTER, |c| c.spec.replicas = 5)
        .expect("scale up");
    reconcile_cluster(Arc::clone(&cluster), Arc::clone(&harness.reconciler))
        .await
        .expect("restart reconcile");
    assert_eq!(sts_replicas(&harness), Some(3));
    let stored = harness.stores.cache_clusters.object(CLUSTER).expect("cluster");
    assert!(!stored.is_gracefully_shut_down());
    assert_eq!(stored.status.expect("status").replicas_wanted_at_restart, Some(3));

    mark_pods_ready(&harness, 3);
    harness.admin.set_members(3);
    let action = reconcile_cluster(Arc::clone(&cluster), Arc::clone(&harness.reconciler))
        .await
        .expect("restored reconcile");
    assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    let stored = harness.stores.cache_clusters.object(CLUSTER).expect("cluster");
    assert!(stored.is_well_formed());
    assert_eq!(stored.status.expect("status").replicas_wanted_at_restart, None);
    assert_eq!(sts_replicas(&harness), Some(3));

    reconcile_cluster(cluster, Arc::clone(&harness.reconciler))
        .await
        .expect("resize reconcile");
    assert_eq!(sts_replicas(&harness), Some(5));
}
