//! # Watch Loop
//!
//! One kube-runtime `Controller` per custom resource kind, run concurrently.
//!
//! kube-runtime serializes reconciles per object and bounds them with
//! `concurrency`. A controller whose stream ends before shutdown is restarted
//! after `WATCH_RESTART_DELAY_AFTER_END_SECS`.

use std::future::Future;
use std::time::Duration;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::Api;
use kube::Client;
use kube_runtime::controller::{self, Action, Config as ControllerSettings};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::error_policy::{backoff_on_error, handle_stream_error, StreamErrorClass};
use super::initialization::InitializationResult;
use crate::controller::cache::reconcile_cache;
use crate::controller::cluster::reconcile_cluster;
use crate::controller::jobs::{reconcile_backup, reconcile_batch, reconcile_restore};
use crate::controller::reconciler::ReconcileError;
use crate::crd::{Cache, CacheBackup, CacheBatch, CacheCluster, CacheRestore};

type ControllerEvent<K> =
    Result<(ObjectRef<K>, Action), controller::Error<ReconcileError, watcher::Error>>;

/// Drain a controller stream, logging each result
///
/// Unclassified errors pause the stream for `error_pause` so a persistent
/// failure does not spin.
async fn drain<K, S>(kind: &'static str, error_pause: Duration, stream: S)
where
    K: kube::Resource<DynamicType = ()>,
    S: Stream<Item = ControllerEvent<K>>,
{
    stream
        .for_each(move |event| async move {
            match event {
                Ok((obj, action)) => debug!(kind, object = %obj, action = ?action, "watch.event.reconciled"),
                Err(e) => {
                    if handle_stream_error(kind, &e) == StreamErrorClass::Other {
                        tokio::time::sleep(error_pause).await;
                    }
                }
            }
        })
        .await;
}

/// Run `start` until shutdown, restarting it whenever its stream ends early
async fn supervise<F, Fut>(kind: &'static str, shutdown: CancellationToken, restart_delay: Duration, start: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        info!(kind, "Starting controller watch loop...");
        start()
            .instrument(info_span!("controller.watch", kind, operation = "watch_loop"))
            .await;

        if shutdown.is_cancelled() {
            info!(kind, "Shutdown requested, exiting watch loop");
            return;
        }
        warn!(
            kind,
            "Controller watch stream ended, restarting in {} seconds...",
            restart_delay.as_secs()
        );
        tokio::time::sleep(restart_delay).await;
    }
}

/// An API handle limited to `namespace`, or cluster-wide when unset
fn scoped<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn any_semantic() -> watcher::Config {
    watcher::Config::default().any_semantic()
}

/// Run every controller until shutdown
///
/// # Errors
///
/// Currently always succeeds; failures inside a controller are logged and the
/// controller is restarted.
pub async fn run_watch_loops(init: InitializationResult) -> Result<(), anyhow::Error> {
    let InitializationResult {
        client,
        reconciler,
        server_handle,
        controller_config,
        shutdown,
        ..
    } = init;

    let settings = ControllerSettings::default().concurrency(controller_config.max_concurrent_reconciliations);
    let restart_delay = controller_config.watch_restart_delay_after_end_duration();
    let error_pause = controller_config.watch_restart_delay_duration();
    let namespace = controller_config.watch_namespace.clone();
    match &namespace {
        Some(ns) => info!(namespace = %ns, "Watching a single namespace"),
        None => info!("Watching all namespaces"),
    }

    let clusters = {
        let (client, reconciler, shutdown, settings, namespace) = (
            client.clone(),
            reconciler.clone(),
            shutdown.clone(),
            settings.clone(),
            namespace.clone(),
        );
        supervise("CacheCluster", shutdown.clone(), restart_delay, move || {
            let stream = cluster_controller(&client, namespace.as_deref(), settings.clone(), shutdown.clone())
                .run(reconcile_cluster, backoff_on_error::<CacheCluster>, reconciler.clone());
            drain("CacheCluster", error_pause, stream)
        })
    };

    let caches = {
        let (client, reconciler, shutdown, settings, namespace) = (
            client.clone(),
            reconciler.clone(),
            shutdown.clone(),
            settings.clone(),
            namespace.clone(),
        );
        supervise("Cache", shutdown.clone(), restart_delay, move || {
            let stream = Controller::new(scoped::<Cache>(&client, namespace.as_deref()), any_semantic())
                .with_config(settings.clone())
                .graceful_shutdown_on(cancelled(shutdown.clone()))
                .run(reconcile_cache, backoff_on_error::<Cache>, reconciler.clone());
            drain("Cache", error_pause, stream)
        })
    };

    let backups = {
        let (client, reconciler, shutdown, settings, namespace) = (
            client.clone(),
            reconciler.clone(),
            shutdown.clone(),
            settings.clone(),
            namespace.clone(),
        );
        supervise("CacheBackup", shutdown.clone(), restart_delay, move || {
            let stream = Controller::new(scoped::<CacheBackup>(&client, namespace.as_deref()), any_semantic())
                .with_config(settings.clone())
                .graceful_shutdown_on(cancelled(shutdown.clone()))
                .run(reconcile_backup, backoff_on_error::<CacheBackup>, reconciler.clone());
            drain("CacheBackup", error_pause, stream)
        })
    };

    let restores = {
        let (client, reconciler, shutdown, settings, namespace) = (
            client.clone(),
            reconciler.clone(),
            shutdown.clone(),
            settings.clone(),
            namespace.clone(),
        );
        supervise("CacheRestore", shutdown.clone(), restart_delay, move || {
            let stream = Controller::new(scoped::<CacheRestore>(&client, namespace.as_deref()), any_semantic())
                .with_config(settings.clone())
                .graceful_shutdown_on(cancelled(shutdown.clone()))
                .run(reconcile_restore, backoff_on_error::<CacheRestore>, reconciler.clone());
            drain("CacheRestore", error_pause, stream)
        })
    };

    let batches = {
        let (client, reconciler, shutdown, settings, namespace) = (
            client.clone(),
            reconciler.clone(),
            shutdown.clone(),
            settings.clone(),
            namespace.clone(),
        );
        supervise("CacheBatch", shutdown.clone(), restart_delay, move || {
            let stream = Controller::new(scoped::<CacheBatch>(&client, namespace.as_deref()), any_semantic())
                .owns(scoped::<Job>(&client, namespace.as_deref()), watcher::Config::default())
                .owns(scoped::<ConfigMap>(&client, namespace.as_deref()), watcher::Config::default())
                .with_config(settings.clone())
                .graceful_shutdown_on(cancelled(shutdown.clone()))
                .run(reconcile_batch, backoff_on_error::<CacheBatch>, reconciler.clone());
            drain("CacheBatch", error_pause, stream)
        })
    };

    tokio::join!(clusters, caches, backups, restores, batches);

    shutdown.cancel();
    if let Err(e) = server_handle.await {
        warn!("HTTP server task ended abnormally: {}", e);
    }
    info!("Operator stopped gracefully");
    Ok(())
}

fn cancelled(token: CancellationToken) -> impl Future<Output = ()> + Send + Sync + 'static {
    async move { token.cancelled().await }
}

/// The `CacheCluster` controller, also woken by changes to the objects it owns
fn cluster_controller(
    client: &Client,
    namespace: Option<&str>,
    settings: ControllerSettings,
    shutdown: CancellationToken,
) -> Controller<CacheCluster> {
    let owned = watcher::Config::default();
    Controller::new(scoped::<CacheCluster>(client, namespace), any_semantic())
        .owns(scoped::<StatefulSet>(client, namespace), owned.clone())
        .owns(scoped::<Service>(client, namespace), owned.clone())
        .owns(scoped::<ConfigMap>(client, namespace), owned.clone())
        .owns(scoped::<Secret>(client, namespace), owned)
        .with_config(settings)
        .graceful_shutdown_on(cancelled(shutdown))
}
