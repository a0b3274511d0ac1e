//! Collect stage: credentials and the client truststore.

use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, warn};

use super::owned_meta;
use crate::constants::{ADMIN_USERNAME, DEVELOPER_USERNAME, TRUSTSTORE_KEY};
use crate::controller::context::Context;
use crate::controller::credentials;
use crate::crd::CacheCluster;
use crate::events::{actions, reasons};

pub(super) async fn admin_credentials(ctx: &mut Context<CacheCluster>) {
    let cluster = ctx.instance().clone();
    let name = cluster.admin_secret_name();
    let result = credentials::ensure(&mut ctx.registry.secrets, &name, ADMIN_USERNAME, |base| {
        owned_meta(&cluster, &name, base)
    })
    .await;
    match result {
        Ok(found) => ctx.artifacts.admin_credentials = Some(found),
        Err(e) => ctx
            .flow
            .retry_processing(anyhow::Error::new(e).context(format!("loading admin secret '{name}'"))),
    }
}

pub(super) async fn user_credentials(ctx: &mut Context<CacheCluster>) {
    let cluster = ctx.instance().clone();
    let name = cluster.user_secret_name();
    let result = credentials::ensure(&mut ctx.registry.secrets, &name, DEVELOPER_USERNAME, |base| {
        owned_meta(&cluster, &name, base)
    })
    .await;
    match result {
        Ok(found) => ctx.artifacts.user_credentials = Some(found),
        Err(e) => ctx
            .flow
            .retry_processing(anyhow::Error::new(e).context(format!("loading user secret '{name}'"))),
    }
}

pub(super) async fn truststore(ctx: &mut Context<CacheCluster>) {
    let Some(name) = ctx.instance().truststore_secret_name().map(str::to_string) else {
        missing_truststore(ctx, "client certificates are enabled but no truststore secret is set".into())
            .await;
        return;
    };

    match ctx.registry.secrets.load_optional(&name).await {
        Ok(Some(secret)) => {
            let has_key = secret.data.as_ref().is_some_and(|d| d.contains_key(TRUSTSTORE_KEY));
            if has_key {
                debug!(cluster = %ctx.instance().name_any(), secret = %name, "truststore found");
                ctx.artifacts.truststore_secret = Some(name);
            } else {
                missing_truststore(ctx, format!("secret '{name}' has no '{TRUSTSTORE_KEY}' entry")).await;
            }
        }
        Ok(None) => missing_truststore(ctx, format!("truststore secret '{name}' not found")).await,
        Err(e) => ctx.flow.retry_processing(
            anyhow::Error::new(e).context(format!("loading truststore secret '{name}'")),
        ),
    }
}

async fn missing_truststore(ctx: &mut Context<CacheCluster>, note: String) {
    warn!(cluster = %ctx.instance().name_any(), "{note}");
    ctx.publish_event(
        EventType::Warning,
        reasons::MISSING_TRUSTSTORE,
        actions::PROVISION,
        Some(note),
    )
    .await;
    let wait = ctx.settings().wait_requeue;
    ctx.flow.requeue(wait);
}
