//! # Initialization
//!
//! Operator start-up: rustls setup, tracing, metrics, HTTP server, Kubernetes
//! client, collaborators and the shutdown token.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::admin::HttpAdminFactory;
use crate::config::{ControllerConfig, ServerConfig};
use crate::constants::OPERATOR_NAME;
use crate::controller::backoff::BackoffRegistry;
use crate::controller::context::{Collaborators, ContextProvider};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::controller::store::KubeStoreFactory;
use crate::crd::CacheCluster;
use crate::events::KubeEventPublisher;
use crate::observability;
use crate::workload::KubeWorkloadLogs;

/// Everything the watch loops need
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    pub server_handle: JoinHandle<()>,
    pub controller_config: ControllerConfig,
    /// Cancelled on SIGINT/SIGTERM
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Initialize the operator runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Collaborators and reconciler setup
/// - Shutdown signal handling
///
/// # Errors
///
/// Fails when any of the above cannot be set up.
///
/// # Panics
///
/// Panics if a rustls crypto provider was already installed by someone else.
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before anything opens a TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .unwrap_or_else(|_| panic!("Failed to install rustls crypto provider"));

    let controller_config = ControllerConfig::from_env();
    let server_config = ServerConfig::from_env();

    observability::init_tracing(&controller_config.log_format)?;

    info!("Starting Cache Operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    if controller_config.enable_metrics {
        observability::metrics::register_metrics()?;
    } else {
        info!("Metrics collection disabled");
    }

    let shutdown = CancellationToken::new();
    let server_state = Arc::new(ServerState::default());

    let server_handle = {
        let state = Arc::clone(&server_state);
        let token = shutdown.clone();
        let port = server_config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state, token).await {
                error!("HTTP server error: {}", e);
            }
        })
    };
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    spawn_signal_handler(shutdown.clone(), Arc::clone(&server_state));

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let collaborators = Collaborators {
        stores: Arc::new(KubeStoreFactory::new(client.clone())),
        events: Arc::new(KubeEventPublisher::new(client.clone(), OPERATOR_NAME)),
        admin: Arc::new(HttpAdminFactory::new(
            controller_config.admin_port,
            controller_config.admin_tls,
        )),
        logs: Arc::new(KubeWorkloadLogs::new(client.clone())),
    };
    let provider = ContextProvider::new(collaborators, controller_config.snapshot(), shutdown.clone());
    let backoff = BackoffRegistry::new(
        Duration::from_millis(controller_config.backoff_start_ms),
        Duration::from_millis(controller_config.backoff_max_ms),
    );
    let reconciler = Arc::new(Reconciler::new(provider, backoff));

    log_startup_summary(&client).await;

    info!("Operator initialized, starting watch loops...");

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
        server_handle,
        controller_config,
        shutdown,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &JoinHandle<()>,
    server_config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = server_config.startup_timeout();
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(server_config.poll_interval()).await;
    }
}

/// Cancel `shutdown` on SIGINT or SIGTERM and stop reporting ready
fn spawn_signal_handler(shutdown: CancellationToken, server_state: Arc<ServerState>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        server_state.set_ready(false);
        shutdown.cancel();
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Unable to listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Log the clusters that already exist, per namespace
///
/// Also tells operators early when the CRDs are not installed.
async fn log_startup_summary(client: &Client) {
    let clusters: Api<CacheCluster> = Api::all(client.clone());
    let list = match clusters.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            warn!("CacheCluster CRD is not queryable yet: {}", e);
            return;
        }
    };

    let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for cluster in &list.items {
        by_namespace
            .entry(cluster.namespace().unwrap_or_else(|| "default".to_string()))
            .or_default()
            .push(cluster.name_any());
    }

    info!("Cache Operator - Startup Resource Summary");
    info!("Total CacheClusters: {}", list.items.len());
    for (namespace, mut names) in by_namespace {
        names.sort();
        info!("  {}: {}", namespace, names.join(", "));
    }
}
