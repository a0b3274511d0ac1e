//! Manage stage: pod readiness and cluster well-formedness.

use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info};

use super::retry_on;
use crate::constants::{CONDITION_READY, CONDITION_WELL_FORMED};
use crate::controller::context::Context;
use crate::crd::{condition_is_true, set_condition, CacheCluster, CacheClusterStatus, PodStatus};
use crate::events::{actions, reasons};

pub(super) async fn pod_status(ctx: &mut Context<CacheCluster>) {
    let name = ctx.instance().name_any();
    if ctx.registry.stateful_sets.tracked(&name).and_then(|t| t.persisted()).is_none() {
        if let Err(e) = ctx.registry.stateful_sets.load_optional(&name).await {
            return retry_on(ctx, format!("loading statefulset '{name}'"), e);
        }
    }
    let observed = ctx
        .registry
        .stateful_sets
        .tracked(&name)
        .and_then(|t| t.persisted())
        .and_then(|sts| sts.status.clone());

    let wanted = ctx.instance().effective_replicas();
    let (ready, total) = observed
        .map(|s| (s.ready_replicas.unwrap_or(0), s.replicas))
        .unwrap_or((0, 0));
    let pods = PodStatus {
        ready,
        starting: (total - ready).max(0),
    };
    debug!(cluster = %name, ready, total, wanted, "pod status");

    let generation = ctx.instance().metadata.generation;
    let status = ctx
        .instance_mut()
        .status
        .get_or_insert_with(CacheClusterStatus::default);
    status.pod_status = Some(pods);
    status.observed_generation = generation;
    if wanted == 0 {
        set_condition(&mut status.conditions, CONDITION_READY, false, "ShutDown", None);
    } else if ready >= wanted {
        set_condition(&mut status.conditions, CONDITION_READY, true, "AllPodsReady", None);
    } else {
        set_condition(
            &mut status.conditions,
            CONDITION_READY,
            false,
            "PodsNotReady",
            Some(format!("{ready}/{wanted} pods ready")),
        );
    }
}

/// Record the WellFormed condition, publishing an event when it flips
async fn set_well_formed(
    ctx: &mut Context<CacheCluster>,
    well_formed: bool,
    reason: &str,
    message: Option<String>,
) {
    let was = ctx.instance().is_well_formed();
    let status = ctx
        .instance_mut()
        .status
        .get_or_insert_with(CacheClusterStatus::default);
    set_condition(
        &mut status.conditions,
        CONDITION_WELL_FORMED,
        well_formed,
        reason,
        message.clone(),
    );
    if was == well_formed {
        return;
    }

    info!(cluster = %ctx.instance().name_any(), well_formed, reason, "well-formed condition changed");
    let (type_, event_reason) = if well_formed {
        (EventType::Normal, reasons::CLUSTER_WELL_FORMED)
    } else {
        (EventType::Warning, reasons::CLUSTER_NOT_WELL_FORMED)
    };
    ctx.publish_event(
        type_,
        event_reason,
        actions::RECONCILE,
        message.or_else(|| Some(reason.to_string())),
    )
    .await;
}

/// Release the pre-shutdown replica count once the restarted cluster formed,
/// coming back to scale to `spec.replicas` when that differs
fn finish_restart(ctx: &mut Context<CacheCluster>, restored: i32, wait: std::time::Duration) {
    let target = ctx.instance().spec.replicas;
    let status = ctx
        .instance_mut()
        .status
        .get_or_insert_with(CacheClusterStatus::default);
    if status.replicas_wanted_at_restart.take().is_none() {
        return;
    }
    info!(restored, target, "cluster restored after graceful shutdown");
    if restored != target {
        ctx.flow.requeue_later(wait);
    }
}

pub(super) async fn well_formed(ctx: &mut Context<CacheCluster>) {
    let cluster = ctx.instance().clone();
    let wanted = cluster.effective_replicas();
    let wait = ctx.settings().wait_requeue;

    if wanted == 0 {
        set_well_formed(ctx, false, "ShutDown", None).await;
        return;
    }

    let ready = cluster
        .status
        .as_ref()
        .and_then(|s| s.pod_status.as_ref())
        .map_or(0, |p| p.ready);
    let all_ready = cluster
        .status
        .as_ref()
        .is_some_and(|s| condition_is_true(&s.conditions, CONDITION_READY));
    if !all_ready {
        set_well_formed(
            ctx,
            false,
            "PodsNotReady",
            Some(format!("{ready}/{wanted} pods ready")),
        )
        .await;
        ctx.flow.requeue(wait);
        return;
    }

    let health = match ctx.admin(&cluster) {
        Ok(admin) => admin.health().await,
        Err(e) => Err(e),
    };
    match health {
        Ok(health) => {
            let members = i32::try_from(health.members.len()).unwrap_or(i32::MAX);
            if health.is_healthy() && members == wanted {
                set_well_formed(ctx, true, "ClusterFormed", None).await;
                finish_restart(ctx, wanted, wait);
            } else {
                set_well_formed(
                    ctx,
                    false,
                    "MembersMismatch",
                    Some(format!(
                        "{members}/{wanted} members joined, health {}",
                        health.status
                    )),
                )
                .await;
                ctx.flow.requeue(wait);
            }
        }
        Err(e) => {
            set_well_formed(ctx, false, "AdminUnavailable", Some(e.to_string())).await;
            ctx.flow.requeue(wait);
        }
    }
}
