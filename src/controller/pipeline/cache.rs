//! # Cache handlers
//!
//! A `Cache` resolves its cluster, waits for it to be well formed and makes
//! sure the cache exists on the cluster.

use async_trait::async_trait;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::{Pipeline, PipelineBuilder, PipelineError, ResourceKind, Stage, Step};
use crate::admin::CacheSource;
use crate::constants::CONDITION_READY;
use crate::controller::context::Context;
use crate::controller::credentials;
use crate::crd::{set_condition, Cache, CacheStatus};
use crate::events::{actions, reasons};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHandler {
    ResolveCluster,
    CollectAdminCredentials,
    EnsureCache,
}

#[async_trait]
impl Step<Cache> for CacheHandler {
    fn name(&self) -> &'static str {
        match self {
            Self::ResolveCluster => "resolve-cluster",
            Self::CollectAdminCredentials => "collect-admin-credentials",
            Self::EnsureCache => "ensure-cache",
        }
    }

    fn stage(&self) -> Stage {
        match self {
            Self::ResolveCluster | Self::CollectAdminCredentials => Stage::Collect,
            Self::EnsureCache => Stage::Manage,
        }
    }

    fn touches(&self) -> &'static [ResourceKind] {
        match self {
            Self::ResolveCluster => &[ResourceKind::CacheCluster, ResourceKind::Instance],
            Self::CollectAdminCredentials => &[ResourceKind::Secret],
            Self::EnsureCache => &[ResourceKind::AdminApi, ResourceKind::Instance],
        }
    }

    async fn run(&self, ctx: &mut Context<Cache>) {
        match self {
            Self::ResolveCluster => resolve_cluster(ctx).await,
            Self::CollectAdminCredentials => admin_credentials(ctx).await,
            Self::EnsureCache => ensure_cache(ctx).await,
        }
    }
}

/// The fixed handler list for `Cache`
///
/// # Errors
///
/// Only if the handler list is malformed.
pub fn pipeline() -> Result<Pipeline<Cache, CacheHandler>, PipelineError> {
    PipelineBuilder::new()
        .with(CacheHandler::ResolveCluster)
        .with(CacheHandler::CollectAdminCredentials)
        .with(CacheHandler::EnsureCache)
        .build()
}

fn set_ready(ctx: &mut Context<Cache>, ready: bool, reason: &str, message: Option<String>) {
    let status = ctx.instance_mut().status.get_or_insert_with(CacheStatus::default);
    set_condition(&mut status.conditions, CONDITION_READY, ready, reason, message);
}

/// Not ready yet; try again after the wait interval
fn wait(ctx: &mut Context<Cache>, reason: &str, message: String) {
    debug!(cache = %ctx.instance().name_any(), reason, "{message}");
    set_ready(ctx, false, reason, Some(message));
    let wait = ctx.settings().wait_requeue;
    ctx.flow.requeue(wait);
}

async fn resolve_cluster(ctx: &mut Context<Cache>) {
    let cluster_name = ctx.instance().spec.cluster_name.clone();
    match ctx.registry.cache_clusters.load_optional(&cluster_name).await {
        Ok(Some(cluster)) if cluster.is_well_formed() => ctx.artifacts.cluster = Some(cluster),
        Ok(Some(_)) => wait(
            ctx,
            "ClusterNotWellFormed",
            format!("cluster '{cluster_name}' is not well formed"),
        ),
        Ok(None) => wait(
            ctx,
            "ClusterNotFound",
            format!("cluster '{cluster_name}' not found"),
        ),
        Err(e) => ctx.flow.retry_processing(
            anyhow::Error::new(e).context(format!("loading cluster '{cluster_name}'")),
        ),
    }
}

async fn admin_credentials(ctx: &mut Context<Cache>) {
    let Some(secret) = ctx.artifacts.cluster.as_ref().map(|c| c.admin_secret_name()) else {
        return;
    };
    match credentials::load(&mut ctx.registry.secrets, &secret).await {
        Ok(Some(found)) => ctx.artifacts.admin_credentials = Some(found),
        Ok(None) => wait(
            ctx,
            "MissingCredentials",
            format!("admin secret '{secret}' has no credentials"),
        ),
        Err(e) => ctx.flow.retry_processing(
            anyhow::Error::new(e).context(format!("loading admin secret '{secret}'")),
        ),
    }
}

fn cache_source(cache: &Cache) -> Result<CacheSource, &'static str> {
    match (&cache.spec.template_name, &cache.spec.template) {
        (Some(name), None) => Ok(CacheSource::Template(name.clone())),
        (None, Some(definition)) => Ok(CacheSource::Definition(definition.clone())),
        (None, None) => Err("one of 'spec.templateName' or 'spec.template' must be configured"),
        (Some(_), Some(_)) => Err("at most one of 'spec.templateName' or 'spec.template' may be configured"),
    }
}

async fn ensure_cache(ctx: &mut Context<Cache>) {
    let Some(cluster) = ctx.artifacts.cluster.clone() else {
        return;
    };
    let cache = ctx.instance().clone();
    let cache_name = cache.cache_name();

    let source = match cache_source(&cache) {
        Ok(source) => source,
        Err(reason) => {
            warn!(cache = %cache.name_any(), "{reason}");
            set_ready(ctx, false, "InvalidSpec", Some(reason.to_string()));
            ctx.flow.stop_processing();
            return;
        }
    };

    let admin = match ctx.admin(&cluster) {
        Ok(admin) => admin,
        Err(e) => {
            ctx.flow.retry_processing(anyhow::Error::new(e).context("connecting to administration endpoint"));
            return;
        }
    };
    let exists = match admin.cache_exists(&cache_name).await {
        Ok(exists) => exists,
        Err(e) => {
            ctx.flow.retry_processing(
                anyhow::Error::new(e).context(format!("checking cache '{cache_name}'")),
            );
            return;
        }
    };

    if !exists {
        if let Err(e) = admin.create_cache(&cache_name, &source).await {
            let message = format!("failed to create cache '{cache_name}': {e}");
            ctx.publish_event(
                EventType::Warning,
                reasons::CACHE_CREATION_FAILED,
                actions::PROVISION,
                Some(message.clone()),
            )
            .await;
            set_ready(ctx, false, "CreationFailed", Some(message));
            ctx.flow.retry_processing(anyhow::Error::new(e));
            return;
        }
        info!(cache = %cache_name, cluster = %cluster.name_any(), "cache created");
        ctx.publish_event(
            EventType::Normal,
            reasons::CACHE_CREATED,
            actions::PROVISION,
            Some(format!("Cache '{cache_name}' created on cluster '{}'", cluster.name_any())),
        )
        .await;
    }

    set_ready(ctx, true, "CacheReady", None);
    ctx.instance_mut()
        .status
        .get_or_insert_with(CacheStatus::default)
        .service_name = Some(cluster.name_any());
}
