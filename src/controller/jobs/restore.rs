//! Restores of a completed `CacheBackup` into a cluster.

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info};

use super::cluster_admin;
use crate::admin::{AdminError, OperationStatus};
use crate::controller::context::Context;
use crate::controller::phase::{PhaseDriver, PhasedResource, Progress, Readiness};
use crate::controller::pipeline::ResourceKind;
use crate::controller::registry::TrackedSet;
use crate::controller::registry::TrackedKind;
use crate::crd::{CacheBackup, CacheCluster, CacheRestore, JobPhase};

#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreDriver;

#[async_trait]
impl PhaseDriver<CacheRestore> for RestoreDriver {
    fn name(&self) -> &'static str {
        "restore"
    }

    fn touches(&self) -> &'static [ResourceKind] {
        &[ResourceKind::CacheCluster, ResourceKind::Secret, ResourceKind::AdminApi]
    }

    fn validate(&self, instance: &CacheRestore) -> Result<(), String> {
        if instance.spec.backup.trim().is_empty() {
            return Err("'spec.backup' must be configured".to_string());
        }
        Ok(())
    }

    /// Waits for the referenced backup to complete
    async fn initialize(
        &self,
        ctx: &mut Context<CacheRestore>,
        _cluster: &CacheCluster,
    ) -> anyhow::Result<Readiness> {
        let backup_name = ctx.instance().spec.backup.clone();
        let mut backups: TrackedSet<CacheBackup> =
            TrackedSet::new(CacheBackup::store(ctx.stores(), ctx.namespace()));
        let Some(backup) = backups.load_optional(&backup_name).await? else {
            debug!(restore = %ctx.instance().name_any(), backup = %backup_name, "backup not found yet");
            return Ok(Readiness::Wait);
        };
        Ok(match backup.phase() {
            JobPhase::Succeeded => Readiness::Ready,
            JobPhase::Failed => Readiness::Invalid(format!("backup '{backup_name}' failed")),
            _ => Readiness::Wait,
        })
    }

    async fn execute(&self, ctx: &mut Context<CacheRestore>, cluster: &CacheCluster) -> anyhow::Result<()> {
        let admin = cluster_admin(ctx, cluster).await?;
        let restore = ctx.instance().clone();
        let name = restore.name_any();
        match admin.restore_status(&name).await {
            Err(AdminError::NotFound(_)) => {
                admin
                    .start_restore(&name, &restore.spec.backup, restore.spec.resources.as_ref())
                    .await?;
                info!(restore = %name, backup = %restore.spec.backup, "restore started");
            }
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn poll(&self, ctx: &mut Context<CacheRestore>, cluster: &CacheCluster) -> anyhow::Result<Progress> {
        let admin = cluster_admin(ctx, cluster).await?;
        let name = ctx.instance().name_any();
        Ok(match admin.restore_status(&name).await {
            Ok(OperationStatus::Running) => Progress::Running,
            Ok(OperationStatus::Succeeded) => Progress::Succeeded,
            Ok(OperationStatus::Failed) => {
                Progress::Failed(format!("restore '{name}' failed on cluster '{}'", cluster.name_any()))
            }
            Err(AdminError::NotFound(_)) => Progress::Failed(format!(
                "restore '{name}' is no longer known to cluster '{}'",
                cluster.name_any()
            )),
            Err(e) => return Err(e.into()),
        })
    }
}
