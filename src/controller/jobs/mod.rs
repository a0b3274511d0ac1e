//! # Job Drivers
//!
//! [`PhaseDriver`](super::phase::PhaseDriver) implementations for the
//! job-style resources, and the pipelines that run them.
//!
//! - `backup`: `CacheBackup`, a server-side backup through the admin API
//! - `restore`: `CacheRestore`, restoring a completed backup
//! - `batch`: `CacheBatch`, CLI commands run as a one-shot Job

mod backup;
mod batch;
mod restore;

use std::sync::{Arc, LazyLock};

use anyhow::Context as _;
use kube_runtime::controller::Action;
use tracing::debug;

use super::context::Context;
use super::credentials;
use super::phase::{PhaseDriver, PhaseStep, PhasedResource};
use super::pipeline::{Pipeline, PipelineBuilder, PipelineError};
use super::reconciler::{object_key, ReconcileError, Reconciler};
use crate::admin::CacheAdmin;
use crate::crd::{CacheBackup, CacheBatch, CacheCluster, CacheRestore};

pub use backup::BackupDriver;
pub use batch::{batch_job, BatchDriver};
pub use restore::RestoreDriver;

/// Admin client for `cluster`, loading the generated admin credentials first
///
/// # Errors
///
/// Fails when the admin secret is unreadable or incomplete, or the client cannot be built.
pub(crate) async fn cluster_admin<K: PhasedResource>(
    ctx: &mut Context<K>,
    cluster: &CacheCluster,
) -> anyhow::Result<Arc<dyn CacheAdmin>> {
    if ctx.artifacts.admin_credentials.is_none() {
        let secret = cluster.admin_secret_name();
        let found = credentials::load(&mut ctx.registry.secrets, &secret)
            .await
            .with_context(|| format!("loading admin secret '{secret}'"))?
            .with_context(|| format!("admin secret '{secret}' has no credentials"))?;
        ctx.artifacts.admin_credentials = Some(found);
    }
    ctx.admin(cluster)
        .context("connecting to administration endpoint")
}

/// A single-step pipeline driving `driver`
///
/// # Errors
///
/// Never for a valid driver.
pub fn pipeline<K, D>(driver: D) -> Result<Pipeline<K, PhaseStep<D>>, PipelineError>
where
    K: PhasedResource,
    D: PhaseDriver<K>,
{
    PipelineBuilder::new().with(PhaseStep(driver)).build()
}

type JobPipeline<K, D> = LazyLock<Result<Pipeline<K, PhaseStep<D>>, PipelineError>>;

static BACKUP_PIPELINE: JobPipeline<CacheBackup, BackupDriver> = LazyLock::new(|| pipeline(BackupDriver));
static RESTORE_PIPELINE: JobPipeline<CacheRestore, RestoreDriver> = LazyLock::new(|| pipeline(RestoreDriver));
static BATCH_PIPELINE: JobPipeline<CacheBatch, BatchDriver> = LazyLock::new(|| pipeline(BatchDriver));

async fn reconcile_job<K, D>(
    pipeline: &Result<Pipeline<K, PhaseStep<D>>, PipelineError>,
    obj: &K,
    reconciler: &Reconciler,
) -> Result<Action, ReconcileError>
where
    K: PhasedResource,
    D: PhaseDriver<K>,
{
    let pipeline = pipeline.as_ref().map_err(|e| ReconcileError::Composition(e.clone()))?;
    if obj.phase().is_terminal() {
        debug!(resource = %object_key(obj), phase = %obj.phase(), "job finished, nothing to do");
        return Ok(Action::await_change());
    }
    reconciler.reconcile(pipeline, obj).await
}

/// Reconcile one `CacheBackup`
///
/// # Errors
///
/// See [`ReconcileError`].
pub async fn reconcile_backup(
    backup: Arc<CacheBackup>,
    reconciler: Arc<Reconciler>,
) -> Result<Action, ReconcileError> {
    reconcile_job(&BACKUP_PIPELINE, backup.as_ref(), &reconciler).await
}

/// Reconcile one `CacheRestore`
///
/// # Errors
///
/// See [`ReconcileError`].
pub async fn reconcile_restore(
    restore: Arc<CacheRestore>,
    reconciler: Arc<Reconciler>,
) -> Result<Action, ReconcileError> {
    reconcile_job(&RESTORE_PIPELINE, restore.as_ref(), &reconciler).await
}

/// Reconcile one `CacheBatch`
///
/// # Errors
///
/// See [`ReconcileError`].
pub async fn reconcile_batch(
    batch: Arc<CacheBatch>,
    reconciler: Arc<Reconciler>,
) -> Result<Action, ReconcileError> {
    reconcile_job(&BATCH_PIPELINE, batch.as_ref(), &reconciler).await
}
