//! REST client for the cache server's administration endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{
    AdminClientFactory, AdminCredentials, AdminError, CacheAdmin, CacheSource, ClusterHealth,
    OperationStatus,
};
use crate::constants::{BACKUP_ROOT_PATH, DEFAULT_ADMIN_TIMEOUT_SECS};
use crate::crd::{BackupResources, CacheCluster};

#[derive(Debug, Deserialize)]
struct HealthResponse {
    cluster_health: ClusterHealthBody,
}

#[derive(Debug, Deserialize)]
struct ClusterHealthBody {
    health_status: String,
    #[serde(default)]
    node_names: Vec<String>,
}

/// Client bound to one cluster's admin service
#[derive(Debug, Clone)]
pub struct HttpAdmin {
    http_client: Client,
    base_url: String,
    credentials: AdminCredentials,
}

impl HttpAdmin {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(base_url: String, credentials: AdminCredentials) -> Result<Self, AdminError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_ADMIN_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http_client,
            base_url,
            credentials,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!(
            "{}/rest/v2/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        debug!(method = method.as_str(), url = url.as_str(), "admin.request");
        self.http_client
            .request(method, url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
    }

    /// Map non-success responses onto [`AdminError`]
    async fn check(response: Response, what: &str) -> Result<Response, AdminError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AdminError::Unauthorized),
            StatusCode::NOT_FOUND => Err(AdminError::NotFound(what.to_string())),
            _ => Err(AdminError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Backups report completion with 200, restores with 201; 202 means still running
    async fn operation_status(
        &self,
        path: &str,
        done: StatusCode,
    ) -> Result<OperationStatus, AdminError> {
        let response = self.request(Method::HEAD, path).send().await?;
        match response.status() {
            StatusCode::ACCEPTED => Ok(OperationStatus::Running),
            status if status == done => Ok(OperationStatus::Succeeded),
            StatusCode::NOT_FOUND => Err(AdminError::NotFound(path.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AdminError::Unauthorized),
            _ => Ok(OperationStatus::Failed),
        }
    }
}

fn resources_body(resources: Option<&BackupResources>) -> serde_json::Value {
    match resources {
        Some(r) => json!({ "resources": { "caches": r.caches, "templates": r.templates } }),
        None => json!({}),
    }
}

fn definition_content_type(definition: &str) -> &'static str {
    match definition.trim_start().chars().next() {
        Some('{') => "application/json",
        Some('<') => "application/xml",
        _ => "application/yaml",
    }
}

#[async_trait]
impl CacheAdmin for HttpAdmin {
    async fn cache_names(&self) -> Result<Vec<String>, AdminError> {
        let response = self.request(Method::GET, "caches").send().await?;
        let response = Self::check(response, "caches").await?;
        response
            .json::<Vec<String>>()
            .await
            .map_err(|e| AdminError::InvalidResponse(e.to_string()))
    }

    async fn cache_exists(&self, name: &str) -> Result<bool, AdminError> {
        let response = self
            .request(Method::HEAD, &format!("caches/{name}"))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            _ => Self::check(response, name).await.map(|_| true),
        }
    }

    async fn create_cache(&self, name: &str, source: &CacheSource) -> Result<(), AdminError> {
        let path = format!("caches/{name}");
        let request = match source {
            CacheSource::Template(template) => self
                .request(Method::POST, &path)
                .query(&[("template", template.as_str())]),
            CacheSource::Definition(definition) => self
                .request(Method::POST, &path)
                .header("Content-Type", definition_content_type(definition))
                .body(definition.clone()),
        };
        let response = request.send().await?;
        Self::check(response, name).await?;
        Ok(())
    }

    async fn cache_config(&self, name: &str) -> Result<String, AdminError> {
        let response = self
            .request(Method::GET, &format!("caches/{name}"))
            .query(&[("action", "config")])
            .header("Accept", "application/json")
            .send()
            .await?;
        let response = Self::check(response, name).await?;
        Ok(response.text().await?)
    }

    async fn health(&self) -> Result<ClusterHealth, AdminError> {
        let response = self
            .request(Method::GET, "cache-managers/default/health")
            .send()
            .await?;
        let response = Self::check(response, "cache manager").await?;
        let body: HealthResponse = response
            .json()
            .await
            .map_err(|e| AdminError::InvalidResponse(e.to_string()))?;
        Ok(ClusterHealth {
            members: body.cluster_health.node_names,
            status: body.cluster_health.health_status,
        })
    }

    async fn shutdown(&self) -> Result<(), AdminError> {
        let response = self
            .request(Method::POST, "container")
            .query(&[("action", "shutdown")])
            .send()
            .await?;
        Self::check(response, "container").await?;
        Ok(())
    }

    async fn start_backup(
        &self,
        name: &str,
        resources: Option<&BackupResources>,
    ) -> Result<(), AdminError> {
        let response = self
            .request(Method::POST, &format!("container/backups/{name}"))
            .json(&resources_body(resources))
            .send()
            .await?;
        Self::check(response, name).await?;
        Ok(())
    }

    async fn backup_status(&self, name: &str) -> Result<OperationStatus, AdminError> {
        self.operation_status(&format!("container/backups/{name}"), StatusCode::OK)
            .await
    }

    async fn start_restore(
        &self,
        name: &str,
        backup: &str,
        resources: Option<&BackupResources>,
    ) -> Result<(), AdminError> {
        let mut body = resources_body(resources);
        body["location"] = json!(format!("{BACKUP_ROOT_PATH}/{backup}/{backup}.zip"));
        let response = self
            .request(Method::POST, &format!("container/restores/{name}"))
            .json(&body)
            .send()
            .await?;
        Self::check(response, name).await?;
        Ok(())
    }

    async fn restore_status(&self, name: &str) -> Result<OperationStatus, AdminError> {
        self.operation_status(&format!("container/restores/{name}"), StatusCode::CREATED)
            .await
    }
}

/// Connects to `<cluster>-admin.<namespace>.svc:<port>`
#[derive(Debug, Clone)]
pub struct HttpAdminFactory {
    port: i32,
    tls: bool,
}

impl HttpAdminFactory {
    #[must_use]
    pub fn new(port: i32, tls: bool) -> Self {
        Self { port, tls }
    }

    #[must_use]
    pub fn base_url(&self, cluster: &CacheCluster) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!(
            "{scheme}://{}.{}.svc:{}",
            cluster.admin_service_name(),
            cluster.namespace().unwrap_or_else(|| "default".to_string()),
            self.port
        )
    }
}

impl AdminClientFactory for HttpAdminFactory {
    fn connect(
        &self,
        cluster: &CacheCluster,
        credentials: &AdminCredentials,
    ) -> Result<Arc<dyn CacheAdmin>, AdminError> {
        Ok(Arc::new(HttpAdmin::new(
            self.base_url(cluster),
            credentials.clone(),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CacheClusterSpec, SecuritySpec};

    #[test]
    fn test_base_url_targets_admin_service() {
        let mut cluster = CacheCluster::new(
            "example",
            CacheClusterSpec {
                replicas: 1,
                image: None,
                security: SecuritySpec::default(),
                container: None,
                expose_admin: false,
            },
        );
        cluster.metadata.namespace = Some("caches".into());
        assert_eq!(
            HttpAdminFactory::new(11223, false).base_url(&cluster),
            "http://example-admin.caches.svc:11223"
        );
        assert!(HttpAdminFactory::new(11223, true)
            .base_url(&cluster)
            .starts_with("https://"));
    }

    #[test]
    fn test_definition_content_type() {
        assert_eq!(definition_content_type(" {\"a\":1}"), "application/json");
        assert_eq!(definition_content_type("<cache/>"), "application/xml");
        assert_eq!(definition_content_type("distributedCache: {}"), "application/yaml");
    }

    #[test]
    fn test_resources_body() {
        assert_eq!(resources_body(None), json!({}));
        let resources = BackupResources {
            caches: vec!["a".into()],
            templates: vec![],
        };
        assert_eq!(
            resources_body(Some(&resources)),
            json!({"resources": {"caches": ["a"], "templates": []}})
        );
    }
}
