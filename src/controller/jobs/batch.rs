//! Batch CLI commands executed as a one-shot Kubernetes Job.
//!
//! The commands come either from a user ConfigMap or from inline
//! `spec.config`, which is materialized into a ConfigMap owned by the batch.
//! A failed Job's pod logs become the failure reason.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    SecretKeySelector, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::config::OperatorSettings;
use crate::constants::{
    BATCH_MOUNT_PATH, BATCH_SCRIPT_KEY, CLIENT_PORT, LABEL_APP_NAME, LABEL_CLUSTER,
    LABEL_MANAGED_BY, OPERATOR_NAME,
};
use crate::controller::context::Context;
use crate::controller::credentials::{PASSWORD_KEY, USERNAME_KEY};
use crate::controller::phase::{PhaseDriver, Progress, Readiness};
use crate::controller::pipeline::ResourceKind;
use crate::crd::{CacheBatch, CacheCluster};

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchDriver;

fn batch_meta(batch: &CacheBatch, name: &str, base: ObjectMeta) -> ObjectMeta {
    let mut meta = base;
    meta.name = Some(name.to_string());
    meta.namespace = batch.namespace();
    meta.labels.get_or_insert_with(BTreeMap::new).extend([
        (LABEL_APP_NAME.to_string(), "cache-batch".to_string()),
        (LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
        (LABEL_CLUSTER.to_string(), batch.spec.cluster.clone()),
    ]);
    meta.owner_references = batch.controller_owner_ref(&()).map(|owner| vec![owner]);
    meta
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                ..SecretKeySelector::default()
            }),
            ..EnvVarSource::default()
        }),
        ..EnvVar::default()
    }
}

/// The Job running `batch` against `cluster`
#[must_use]
pub fn batch_job(batch: &CacheBatch, cluster: &CacheCluster, settings: &OperatorSettings) -> Job {
    let namespace = batch.namespace().unwrap_or_else(|| "default".to_string());
    let endpoint = format!("{}.{namespace}.svc:{CLIENT_PORT}", cluster.name_any());
    let script = format!(
        "cli --connect \"http://${{USERNAME}}:${{PASSWORD}}@{endpoint}\" --file {BATCH_MOUNT_PATH}/{BATCH_SCRIPT_KEY}"
    );
    let admin_secret = cluster.admin_secret_name();
    let meta = batch_meta(batch, &batch.job_name(), ObjectMeta::default());

    Job {
        metadata: meta.clone(),
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: meta.labels,
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: "batch".to_string(),
                        image: Some(settings.cli_image.clone()),
                        command: Some(vec!["sh".to_string(), "-c".to_string()]),
                        args: Some(vec![script]),
                        env: Some(vec![
                            secret_env("USERNAME", &admin_secret, USERNAME_KEY),
                            secret_env("PASSWORD", &admin_secret, PASSWORD_KEY),
                        ]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "batch-volume".to_string(),
                            mount_path: BATCH_MOUNT_PATH.to_string(),
                            ..VolumeMount::default()
                        }]),
                        ..Container::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: "batch-volume".to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: batch.config_map_name(),
                            ..ConfigMapVolumeSource::default()
                        }),
                        ..Volume::default()
                    }]),
                    ..PodSpec::default()
                }),
            },
            ..JobSpec::default()
        }),
        ..Job::default()
    }
}

#[async_trait]
impl PhaseDriver<CacheBatch> for BatchDriver {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn touches(&self) -> &'static [ResourceKind] {
        &[
            ResourceKind::CacheCluster,
            ResourceKind::ConfigMap,
            ResourceKind::Job,
            ResourceKind::WorkloadLogs,
        ]
    }

    fn validate(&self, instance: &CacheBatch) -> Result<(), String> {
        match (&instance.spec.config_map, &instance.spec.config) {
            (None, None) => {
                Err("one of 'spec.configMap' or 'spec.config' must be configured".to_string())
            }
            (Some(_), Some(_)) => {
                Err("at most one of 'spec.configMap' or 'spec.config' may be configured".to_string())
            }
            _ => Ok(()),
        }
    }

    async fn initialize(
        &self,
        ctx: &mut Context<CacheBatch>,
        _cluster: &CacheCluster,
    ) -> anyhow::Result<Readiness> {
        let batch = ctx.instance().clone();
        let name = batch.config_map_name();
        let existing = ctx.registry.config_maps.load_optional(&name).await?;

        if let Some(config) = &batch.spec.config {
            let base = existing.map(|cm| cm.metadata).unwrap_or_default();
            ctx.registry.config_maps.define(ConfigMap {
                metadata: batch_meta(&batch, &name, base),
                data: Some(BTreeMap::from([(BATCH_SCRIPT_KEY.to_string(), config.clone())])),
                ..ConfigMap::default()
            });
            return Ok(Readiness::Ready);
        }

        Ok(match existing {
            None => {
                debug!(batch = %batch.name_any(), config_map = %name, "waiting for batch config map");
                Readiness::Wait
            }
            Some(cm) if cm.data.as_ref().is_some_and(|d| d.contains_key(BATCH_SCRIPT_KEY)) => {
                Readiness::Ready
            }
            Some(_) => Readiness::Invalid(format!(
                "ConfigMap '{name}' has no '{BATCH_SCRIPT_KEY}' entry"
            )),
        })
    }

    async fn execute(&self, ctx: &mut Context<CacheBatch>, cluster: &CacheCluster) -> anyhow::Result<()> {
        let batch = ctx.instance().clone();
        let job_name = batch.job_name();
        if ctx.registry.jobs.load_optional(&job_name).await?.is_some() {
            debug!(batch = %batch.name_any(), job = %job_name, "batch job already submitted");
            return Ok(());
        }
        let job = batch_job(&batch, cluster, ctx.settings());
        ctx.registry.jobs.define(job);
        info!(batch = %batch.name_any(), job = %job_name, "batch job submitted");
        Ok(())
    }

    async fn poll(&self, ctx: &mut Context<CacheBatch>, _cluster: &CacheCluster) -> anyhow::Result<Progress> {
        let job_name = ctx.instance().job_name();
        let Some(job) = ctx.registry.jobs.load_optional(&job_name).await? else {
            return Ok(Progress::Failed(format!("batch job '{job_name}' no longer exists")));
        };
        let status = job.status.unwrap_or_default();
        if status.succeeded.unwrap_or(0) > 0 {
            return Ok(Progress::Succeeded);
        }
        let failed_condition = status
            .conditions
            .iter()
            .flatten()
            .any(|c| c.type_ == "Failed" && c.status == "True");
        if status.failed.unwrap_or(0) == 0 && !failed_condition {
            return Ok(Progress::Running);
        }

        let reason = match ctx.workload_logs().job_logs(ctx.namespace(), &job_name).await {
            Ok(logs) if logs.trim().is_empty() => format!("batch job '{job_name}' failed without output"),
            Ok(logs) => logs.trim().to_string(),
            Err(e) => {
                warn!(job = %job_name, error = %e, "unable to retrieve batch logs");
                format!("unable to retrieve logs for batch job '{job_name}': {e}")
            }
        };
        Ok(Progress::Failed(reason))
    }
}
