//! # Phase State Machine
//!
//! Drives job-style resources (`CacheBackup`, `CacheRestore`, `CacheBatch`)
//! through `"" → Validating → Initializing → Initialized → Running →
//! Succeeded | Failed`.
//!
//! Each invocation performs at most one phase action. Transitions only move
//! forward, terminal phases are sinks, and the target cluster's UID pinned
//! during initialization must still match when the job executes. Waiting on a
//! dependency requeues without changing the phase.

use async_trait::async_trait;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::context::Context;
use super::pipeline::{ResourceKind, Stage, Step};
use super::registry::TrackedKind;
use crate::crd::{CacheBackup, CacheBatch, CacheCluster, CacheRestore, JobPhase, JobStatus};
use crate::events::{actions, reasons};
use crate::observability::metrics;

/// A resource with a [`JobStatus`] and a target cluster
pub trait PhasedResource: TrackedKind {
    fn job_status(&self) -> Option<&JobStatus>;

    fn job_status_mut(&mut self) -> &mut JobStatus;

    /// Name of the `CacheCluster` this resource targets
    fn cluster_name(&self) -> &str;

    #[must_use]
    fn phase(&self) -> JobPhase {
        self.job_status().map(|s| s.phase).unwrap_or_default()
    }
}

macro_rules! phased_resource {
    ($kind:ty) => {
        impl PhasedResource for $kind {
            fn job_status(&self) -> Option<&JobStatus> {
                self.status.as_ref()
            }

            fn job_status_mut(&mut self) -> &mut JobStatus {
                self.status.get_or_insert_with(JobStatus::default)
            }

            fn cluster_name(&self) -> &str {
                &self.spec.cluster
            }
        }
    };
}

phased_resource!(CacheBackup);
phased_resource!(CacheRestore);
phased_resource!(CacheBatch);

/// Work performed for a given phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseAction {
    /// Unset: enter Validating
    Begin,
    Validate,
    Initialize,
    Execute,
    Poll,
}

/// The action for `phase`, `None` for terminal phases
#[must_use]
pub fn action_for(phase: JobPhase) -> Option<PhaseAction> {
    match phase {
        JobPhase::Unset => Some(PhaseAction::Begin),
        JobPhase::Validating => Some(PhaseAction::Validate),
        JobPhase::Initializing => Some(PhaseAction::Initialize),
        JobPhase::Initialized => Some(PhaseAction::Execute),
        JobPhase::Running => Some(PhaseAction::Poll),
        JobPhase::Succeeded | JobPhase::Failed => None,
    }
}

/// Outcome of preparing a job's inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// A dependency is not there yet; stay in `Initializing`
    Wait,
    /// The inputs can never become valid
    Invalid(String),
}

/// Progress of a running job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Running,
    Succeeded,
    Failed(String),
}

/// Kind-specific behaviour plugged into the phase machine
#[async_trait]
pub trait PhaseDriver<K: PhasedResource>: Send + Sync {
    /// Handler name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Collaborators the driver uses besides the instance and its cluster
    fn touches(&self) -> &'static [ResourceKind];

    /// Static checks on the spec; the error becomes the failure reason
    ///
    /// # Errors
    ///
    /// A human-readable reason the spec is unusable.
    fn validate(&self, instance: &K) -> Result<(), String>;

    /// Resolve and provision inputs
    ///
    /// # Errors
    ///
    /// Transient failures; the invocation is retried.
    async fn initialize(
        &self,
        ctx: &mut Context<K>,
        cluster: &CacheCluster,
    ) -> anyhow::Result<Readiness>;

    /// Submit the work
    ///
    /// # Errors
    ///
    /// Transient failures; the invocation is retried.
    async fn execute(&self, ctx: &mut Context<K>, cluster: &CacheCluster) -> anyhow::Result<()>;

    /// Check on submitted work
    ///
    /// # Errors
    ///
    /// Transient failures; the invocation is retried.
    async fn poll(&self, ctx: &mut Context<K>, cluster: &CacheCluster) -> anyhow::Result<Progress>;
}

/// Move the instance to `next`, ignoring transitions that would go backwards
pub async fn transition<K: PhasedResource>(ctx: &mut Context<K>, next: JobPhase, reason: Option<String>) {
    let current = ctx.instance().phase();
    if current == next {
        return;
    }
    if !current.can_transition_to(next) {
        warn!(
            resource.name = %ctx.instance().name_any(),
            from = %current,
            to = %next,
            "rejected backward phase transition"
        );
        return;
    }

    let status = ctx.instance_mut().job_status_mut();
    status.phase = next;
    status.reason.clone_from(&reason);

    let kind = K::kind(&()).to_string();
    info!(resource.name = %ctx.instance().name_any(), kind = %kind, from = %current, phase = %next, "phase changed");
    metrics::increment_phase_transitions(&kind, next.as_str());

    let (type_, event_reason) = if next == JobPhase::Failed {
        (EventType::Warning, reasons::JOB_FAILED)
    } else {
        (EventType::Normal, reasons::PHASE_CHANGED)
    };
    let note = match &reason {
        Some(reason) => format!("{current} -> {next}: {reason}"),
        None => format!("{current} -> {next}"),
    };
    ctx.publish_event(type_, event_reason, actions::RECONCILE, Some(note)).await;

    if !next.is_terminal() {
        let delay = ctx.settings().phase_requeue;
        ctx.flow.requeue(delay);
    }
}

/// Load the target cluster; `Ok(None)` when it does not exist
async fn target_cluster<K: PhasedResource>(ctx: &mut Context<K>) -> anyhow::Result<Option<CacheCluster>> {
    let name = ctx.instance().cluster_name().to_string();
    ctx.registry
        .cache_clusters
        .load_optional(&name)
        .await
        .map_err(|e| anyhow::Error::new(e).context(format!("loading cluster '{name}'")))
}

/// Run one phase action for `ctx`'s instance
pub async fn drive<K, D>(driver: &D, ctx: &mut Context<K>)
where
    K: PhasedResource,
    D: PhaseDriver<K> + ?Sized,
{
    let phase = ctx.instance().phase();
    let Some(action) = action_for(phase) else {
        debug!(resource.name = %ctx.instance().name_any(), phase = %phase, "terminal phase, nothing to do");
        return;
    };
    let wait = ctx.settings().wait_requeue;

    match action {
        PhaseAction::Begin => transition(ctx, JobPhase::Validating, None).await,

        PhaseAction::Validate => match driver.validate(ctx.instance()) {
            Ok(()) => transition(ctx, JobPhase::Initializing, None).await,
            Err(reason) => transition(ctx, JobPhase::Failed, Some(reason)).await,
        },

        PhaseAction::Initialize => {
            let cluster = match target_cluster(ctx).await {
                Ok(Some(cluster)) if cluster.is_well_formed() => cluster,
                Ok(_) => {
                    debug!(
                        resource.name = %ctx.instance().name_any(),
                        cluster = ctx.instance().cluster_name(),
                        "waiting for cluster to be well formed"
                    );
                    ctx.flow.requeue(wait);
                    return;
                }
                Err(e) => return ctx.flow.retry_processing(e),
            };
            match driver.initialize(ctx, &cluster).await {
                Ok(Readiness::Ready) => {
                    ctx.instance_mut().job_status_mut().cluster_uid = cluster.uid();
                    transition(ctx, JobPhase::Initialized, None).await;
                }
                Ok(Readiness::Wait) => ctx.flow.requeue(wait),
                Ok(Readiness::Invalid(reason)) => {
                    transition(ctx, JobPhase::Failed, Some(reason)).await;
                }
                Err(e) => ctx.flow.retry_processing(e),
            }
        }

        PhaseAction::Execute => {
            let Some(cluster) = pinned_cluster(ctx).await else {
                return;
            };
            match driver.execute(ctx, &cluster).await {
                Ok(()) => transition(ctx, JobPhase::Running, None).await,
                Err(e) => ctx.flow.retry_processing(e),
            }
        }

        PhaseAction::Poll => {
            let Some(cluster) = pinned_cluster(ctx).await else {
                return;
            };
            match driver.poll(ctx, &cluster).await {
                Ok(Progress::Running) => ctx.flow.requeue(wait),
                Ok(Progress::Succeeded) => transition(ctx, JobPhase::Succeeded, None).await,
                Ok(Progress::Failed(reason)) => {
                    transition(ctx, JobPhase::Failed, Some(reason)).await;
                }
                Err(e) => ctx.flow.retry_processing(e),
            }
        }
    }
}

/// The target cluster, provided it is still the one pinned during initialization.
///
/// A vanished or replaced cluster fails the instance, as does a missing pin.
async fn pinned_cluster<K: PhasedResource>(ctx: &mut Context<K>) -> Option<CacheCluster> {
    let cluster_name = ctx.instance().cluster_name().to_string();
    let cluster = match target_cluster(ctx).await {
        Ok(Some(cluster)) => cluster,
        Ok(None) => {
            transition(
                ctx,
                JobPhase::Failed,
                Some(format!("cluster '{cluster_name}' no longer exists")),
            )
            .await;
            return None;
        }
        Err(e) => {
            ctx.flow.retry_processing(e);
            return None;
        }
    };

    let pinned = ctx.instance().job_status().and_then(|s| s.cluster_uid.clone());
    let reason = match pinned {
        None => {
            warn!(
                resource.name = %ctx.instance().name_any(),
                cluster = %cluster_name,
                "no cluster identity recorded past initialization"
            );
            format!("cluster '{cluster_name}' identity was not recorded during initialization")
        }
        Some(uid) if Some(&uid) != cluster.uid().as_ref() => {
            format!("cluster '{cluster_name}' was replaced since the job was initialized")
        }
        Some(_) => return Some(cluster),
    };
    transition(ctx, JobPhase::Failed, Some(reason)).await;
    None
}

/// Adapts a [`PhaseDriver`] to a pipeline [`Step`]
#[derive(Debug, Clone, Copy)]
pub struct PhaseStep<D>(pub D);

#[async_trait]
impl<K, D> Step<K> for PhaseStep<D>
where
    K: PhasedResource,
    D: PhaseDriver<K>,
{
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn stage(&self) -> Stage {
        Stage::Manage
    }

    fn touches(&self) -> &'static [ResourceKind] {
        self.0.touches()
    }

    async fn run(&self, ctx: &mut Context<K>) {
        drive(&self.0, ctx).await;
    }
}
