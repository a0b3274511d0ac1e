//! Backups taken by the cluster itself through the admin API.

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

use super::cluster_admin;
use crate::admin::{AdminError, OperationStatus};
use crate::controller::context::Context;
use crate::controller::phase::{PhaseDriver, Progress, Readiness};
use crate::controller::pipeline::ResourceKind;
use crate::crd::{CacheBackup, CacheCluster};

#[derive(Debug, Clone, Copy, Default)]
pub struct BackupDriver;

#[async_trait]
impl PhaseDriver<CacheBackup> for BackupDriver {
    fn name(&self) -> &'static str {
        "backup"
    }

    fn touches(&self) -> &'static [ResourceKind] {
        &[ResourceKind::CacheCluster, ResourceKind::Secret, ResourceKind::AdminApi]
    }

    fn validate(&self, instance: &CacheBackup) -> Result<(), String> {
        let Some(resources) = &instance.spec.resources else {
            return Ok(());
        };
        if resources
            .caches
            .iter()
            .chain(&resources.templates)
            .any(|name| name.trim().is_empty())
        {
            return Err("'spec.resources' must not contain empty names".to_string());
        }
        Ok(())
    }

    async fn initialize(
        &self,
        _ctx: &mut Context<CacheBackup>,
        _cluster: &CacheCluster,
    ) -> anyhow::Result<Readiness> {
        Ok(Readiness::Ready)
    }

    async fn execute(&self, ctx: &mut Context<CacheBackup>, cluster: &CacheCluster) -> anyhow::Result<()> {
        let admin = cluster_admin(ctx, cluster).await?;
        let backup = ctx.instance().clone();
        let name = backup.name_any();
        match admin.backup_status(&name).await {
            Err(AdminError::NotFound(_)) => {
                admin.start_backup(&name, backup.spec.resources.as_ref()).await?;
                info!(backup = %name, cluster = %cluster.name_any(), "backup started");
            }
            // Submitted by an earlier invocation whose status write was lost
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn poll(&self, ctx: &mut Context<CacheBackup>, cluster: &CacheCluster) -> anyhow::Result<Progress> {
        let admin = cluster_admin(ctx, cluster).await?;
        let name = ctx.instance().name_any();
        Ok(match admin.backup_status(&name).await {
            Ok(OperationStatus::Running) => Progress::Running,
            Ok(OperationStatus::Succeeded) => Progress::Succeeded,
            Ok(OperationStatus::Failed) => {
                Progress::Failed(format!("backup '{name}' failed on cluster '{}'", cluster.name_any()))
            }
            Err(AdminError::NotFound(_)) => Progress::Failed(format!(
                "backup '{name}' is no longer known to cluster '{}'",
                cluster.name_any()
            )),
            Err(e) => return Err(e.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BackupResources, CacheBackupSpec};

    #[test]
    fn test_validate_rejects_empty_names() {
        let mut backup = CacheBackup::new(
            "nightly",
            CacheBackupSpec {
                cluster: "example".into(),
                resources: None,
            },
        );
        assert!(BackupDriver.validate(&backup).is_ok());

        backup.spec.resources = Some(BackupResources {
            caches: vec!["orders".into(), " ".into()],
            templates: vec![],
        });
        assert!(BackupDriver.validate(&backup).is_err());
    }
}
