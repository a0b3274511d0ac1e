//! # Workload Logs
//!
//! Retrieval of textual logs from a one-shot job's pods, used to explain why a
//! batch job failed.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams};
use kube::{Client, ResourceExt};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("no pods found for job '{0}'")]
    NoPods(String),

    #[error("failed to read logs of job '{job}': {source}")]
    Api {
        job: String,
        #[source]
        source: kube::Error,
    },
}

#[async_trait]
pub trait WorkloadLogs: Send + Sync {
    /// Logs of the most recent pod run by `job` in `namespace`
    async fn job_logs(&self, namespace: &str, job: &str) -> Result<String, WorkloadError>;
}

/// Reads pod logs through the Kubernetes API
#[derive(Clone)]
pub struct KubeWorkloadLogs {
    client: Client,
    tail_lines: i64,
}

impl std::fmt::Debug for KubeWorkloadLogs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeWorkloadLogs")
            .field("tail_lines", &self.tail_lines)
            .finish_non_exhaustive()
    }
}

impl KubeWorkloadLogs {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            tail_lines: 50,
        }
    }
}

#[async_trait]
impl WorkloadLogs for KubeWorkloadLogs {
    async fn job_logs(&self, namespace: &str, job: &str) -> Result<String, WorkloadError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let api_err = |source| WorkloadError::Api {
            job: job.to_string(),
            source,
        };

        let mut list = pods
            .list(&ListParams::default().labels(&format!("job-name={job}")))
            .await
            .map_err(api_err)?
            .items;
        list.sort_by_key(|pod| pod.creation_timestamp());
        let Some(pod) = list.last() else {
            return Err(WorkloadError::NoPods(job.to_string()));
        };

        debug!(pod = %pod.name_any(), job, "workload.job_logs");
        let params = LogParams {
            tail_lines: Some(self.tail_lines),
            ..LogParams::default()
        };
        pods.logs(&pod.name_any(), &params).await.map_err(api_err)
    }
}
