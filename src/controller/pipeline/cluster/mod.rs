//! # CacheCluster handlers
//!
//! The handler set behind the `CacheCluster` reconciler, grouped by stage:
//!
//! - `collect`: admin and user credentials, client truststore
//! - `configure`: rendered server configuration
//! - `provision`: services, graceful shutdown, the StatefulSet
//! - `manage`: pod status, well-formedness, cache mirroring (`sync`)

mod collect;
mod configure;
mod manage;
mod provision;
mod sync;

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

use super::{Pipeline, PipelineBuilder, PipelineError, ResourceKind, Stage, Step};
use crate::config::OperatorSettings;
use crate::controller::context::Context;
use crate::crd::CacheCluster;

pub use configure::render_server_config;
pub use sync::sanitize_name;

/// Every handler the cluster pipeline can include
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterHandler {
    CollectAdminCredentials,
    CollectUserCredentials,
    CollectTruststore,
    ConfigureServer,
    ProvisionServices,
    GracefulShutdown,
    ProvisionStatefulSet,
    UpdatePodStatus,
    CheckWellFormed,
    SyncCaches,
}

#[async_trait]
impl Step<CacheCluster> for ClusterHandler {
    fn name(&self) -> &'static str {
        match self {
            Self::CollectAdminCredentials => "collect-admin-credentials",
            Self::CollectUserCredentials => "collect-user-credentials",
            Self::CollectTruststore => "collect-truststore",
            Self::ConfigureServer => "configure-server",
            Self::ProvisionServices => "provision-services",
            Self::GracefulShutdown => "graceful-shutdown",
            Self::ProvisionStatefulSet => "provision-statefulset",
            Self::UpdatePodStatus => "update-pod-status",
            Self::CheckWellFormed => "check-well-formed",
            Self::SyncCaches => "sync-caches",
        }
    }

    fn stage(&self) -> Stage {
        match self {
            Self::CollectAdminCredentials | Self::CollectUserCredentials | Self::CollectTruststore => {
                Stage::Collect
            }
            Self::ConfigureServer => Stage::Configure,
            Self::ProvisionServices | Self::GracefulShutdown | Self::ProvisionStatefulSet => {
                Stage::Provision
            }
            Self::UpdatePodStatus | Self::CheckWellFormed | Self::SyncCaches => Stage::Manage,
        }
    }

    fn touches(&self) -> &'static [ResourceKind] {
        use ResourceKind::{AdminApi, Cache, ConfigMap, Instance, Secret, Service, StatefulSet};
        match self {
            Self::CollectAdminCredentials | Self::CollectUserCredentials | Self::CollectTruststore => {
                &[Secret]
            }
            Self::ConfigureServer => &[ConfigMap, Instance],
            Self::ProvisionServices => &[Service],
            Self::GracefulShutdown => &[StatefulSet, AdminApi, Instance],
            Self::ProvisionStatefulSet => &[StatefulSet, Instance],
            Self::UpdatePodStatus => &[StatefulSet, Instance],
            Self::CheckWellFormed => &[AdminApi, Instance],
            Self::SyncCaches => &[AdminApi, Cache],
        }
    }

    async fn run(&self, ctx: &mut Context<CacheCluster>) {
        match self {
            Self::CollectAdminCredentials => collect::admin_credentials(ctx).await,
            Self::CollectUserCredentials => collect::user_credentials(ctx).await,
            Self::CollectTruststore => collect::truststore(ctx).await,
            Self::ConfigureServer => configure::server_config(ctx).await,
            Self::ProvisionServices => provision::services(ctx).await,
            Self::GracefulShutdown => provision::graceful_shutdown(ctx).await,
            Self::ProvisionStatefulSet => provision::stateful_set(ctx).await,
            Self::UpdatePodStatus => manage::pod_status(ctx).await,
            Self::CheckWellFormed => manage::well_formed(ctx).await,
            Self::SyncCaches => sync::caches(ctx).await,
        }
    }
}

/// Assemble the pipeline for `cluster` under `settings`
///
/// # Errors
///
/// Only if the handler list is malformed, which is a programming error.
pub fn pipeline(
    cluster: &CacheCluster,
    settings: &OperatorSettings,
) -> Result<Pipeline<CacheCluster, ClusterHandler>, PipelineError> {
    PipelineBuilder::new()
        .with(ClusterHandler::CollectAdminCredentials)
        .with_if(
            cluster.spec.security.endpoint_authentication,
            ClusterHandler::CollectUserCredentials,
        )
        .with_if(cluster.client_cert_enabled(), ClusterHandler::CollectTruststore)
        .with(ClusterHandler::ConfigureServer)
        .with(ClusterHandler::ProvisionServices)
        .with_if(cluster.spec.replicas == 0, ClusterHandler::GracefulShutdown)
        .with(ClusterHandler::ProvisionStatefulSet)
        .with(ClusterHandler::UpdatePodStatus)
        .with(ClusterHandler::CheckWellFormed)
        .with_if(settings.cache_sync_enabled, ClusterHandler::SyncCaches)
        .build()
}

/// Metadata for an object owned by `cluster`, keeping labels set by others
pub(crate) fn owned_meta(cluster: &CacheCluster, name: &str, base: ObjectMeta) -> ObjectMeta {
    let mut meta = base;
    meta.name = Some(name.to_string());
    meta.namespace = cluster.namespace();
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .extend(cluster.labels());
    meta.owner_references = cluster.controller_owner_ref(&()).map(|owner| vec![owner]);
    meta
}

/// Abort the pipeline with `err`, to be retried
pub(crate) fn retry_on<E>(ctx: &mut Context<CacheCluster>, what: String, err: E)
where
    E: std::error::Error + Send + Sync + 'static,
{
    ctx.flow.retry_processing(anyhow::Error::new(err).context(what));
}
