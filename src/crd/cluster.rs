//! # CacheCluster
//!
//! The primary resource: a distributed cache cluster.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

use super::status::{condition_is_true, Condition};
use crate::constants::{
    CONDITION_GRACEFUL_SHUTDOWN, CONDITION_WELL_FORMED, LABEL_APP_INSTANCE, LABEL_APP_NAME,
    LABEL_CLUSTER, LABEL_MANAGED_BY, OPERATOR_NAME,
};

/// CacheCluster Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: cache.octopilot.io/v1
/// kind: CacheCluster
/// metadata:
///   name: example
/// spec:
///   replicas: 3
///   security:
///     endpointEncryption:
///       clientCert: Validate
///       clientCertSecretName: example-truststore
/// ```
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "CacheCluster",
    group = "cache.octopilot.io",
    version = "v1",
    namespaced,
    status = "CacheClusterStatus",
    shortname = "cc",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"WellFormed", "type":"string", "jsonPath":".status.conditions[?(@.type==\"WellFormed\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CacheClusterSpec {
    /// Number of cache server pods. Zero triggers a graceful shutdown.
    pub replicas: i32,
    /// Server image, defaults to the operator's configured image
    #[serde(default)]
    pub image: Option<String>,
    /// Endpoint security
    #[serde(default)]
    pub security: SecuritySpec,
    /// Container resources
    #[serde(default)]
    pub container: Option<ContainerSpec>,
    /// Expose the administration endpoint through its own service
    #[serde(default)]
    pub expose_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySpec {
    /// Require credentials on the client endpoint
    #[serde(default = "default_true")]
    pub endpoint_authentication: bool,
    /// TLS settings for the client endpoint
    #[serde(default)]
    pub endpoint_encryption: Option<EndpointEncryption>,
}

impl Default for SecuritySpec {
    fn default() -> Self {
        Self {
            endpoint_authentication: true,
            endpoint_encryption: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointEncryption {
    /// Client certificate handling
    #[serde(default)]
    pub client_cert: ClientCertType,
    /// Secret holding the user-provided truststore
    #[serde(default)]
    pub client_cert_secret_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ClientCertType {
    #[default]
    None,
    /// Certificates are validated against the truststore
    Validate,
    /// Certificates are validated and mapped to identities
    Authenticate,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub extra_jvm_opts: Option<String>,
}

/// Status of the CacheCluster resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheClusterStatus {
    /// Conditions: WellFormed, Ready, GracefulShutdown
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Pod readiness summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_status: Option<PodStatus>,
    /// Replica count to restore after a graceful shutdown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas_wanted_at_restart: Option<i32>,
    /// Hash of the rendered server configuration currently deployed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_hash: Option<String>,
    /// Observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    pub ready: i32,
    pub starting: i32,
}

fn default_true() -> bool {
    true
}

impl CacheCluster {
    /// Whether the cluster reported structural stability on its last reconcile
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| condition_is_true(&s.conditions, CONDITION_WELL_FORMED))
    }

    /// Replicas the cluster should run now.
    ///
    /// A cluster restarting after a graceful shutdown first comes back with
    /// the members it had when it was stopped, then scales to `spec.replicas`.
    #[must_use]
    pub fn effective_replicas(&self) -> i32 {
        if self.spec.replicas == 0 {
            return 0;
        }
        self.status
            .as_ref()
            .and_then(|s| s.replicas_wanted_at_restart)
            .unwrap_or(self.spec.replicas)
    }

    #[must_use]
    pub fn is_gracefully_shut_down(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| condition_is_true(&s.conditions, CONDITION_GRACEFUL_SHUTDOWN))
    }

    /// Client certificate authentication/validation is requested
    #[must_use]
    pub fn client_cert_enabled(&self) -> bool {
        self.spec
            .security
            .endpoint_encryption
            .as_ref()
            .is_some_and(|e| e.client_cert != ClientCertType::None)
    }

    #[must_use]
    pub fn truststore_secret_name(&self) -> Option<&str> {
        self.spec
            .security
            .endpoint_encryption
            .as_ref()
            .and_then(|e| e.client_cert_secret_name.as_deref())
    }

    #[must_use]
    pub fn admin_secret_name(&self) -> String {
        format!("{}-generated-operator-secret", self.name_any())
    }

    #[must_use]
    pub fn user_secret_name(&self) -> String {
        format!("{}-generated-secret", self.name_any())
    }

    #[must_use]
    pub fn config_map_name(&self) -> String {
        format!("{}-configuration", self.name_any())
    }

    #[must_use]
    pub fn ping_service_name(&self) -> String {
        format!("{}-ping", self.name_any())
    }

    #[must_use]
    pub fn admin_service_name(&self) -> String {
        format!("{}-admin", self.name_any())
    }

    #[must_use]
    pub fn image_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.spec.image.as_deref().unwrap_or(default)
    }

    /// Labels attached to every object owned by this cluster
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_APP_NAME.to_string(), "cache-cluster".to_string()),
            (LABEL_APP_INSTANCE.to_string(), self.name_any()),
            (LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
            (LABEL_CLUSTER.to_string(), self.name_any()),
        ])
    }

    /// Selector matching the cluster's pods
    #[must_use]
    pub fn pod_selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_APP_NAME.to_string(), "cache-cluster".to_string()),
            (LABEL_CLUSTER.to_string(), self.name_any()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_defaults_to_authenticated_plaintext() {
        let spec: CacheClusterSpec =
            serde_json::from_value(serde_json::json!({ "replicas": 2 })).unwrap();
        assert!(spec.security.endpoint_authentication);
        assert!(spec.security.endpoint_encryption.is_none());
    }

    #[test]
    fn test_client_cert_enabled_requires_non_none_mode() {
        let mut cluster = CacheCluster::new("c", serde_json::from_value(serde_json::json!({
            "replicas": 1,
            "security": { "endpointEncryption": { "clientCert": "None" } }
        })).unwrap());
        assert!(!cluster.client_cert_enabled());

        cluster.spec.security.endpoint_encryption = Some(EndpointEncryption {
            client_cert: ClientCertType::Authenticate,
            client_cert_secret_name: Some("trust".into()),
        });
        assert!(cluster.client_cert_enabled());
        assert_eq!(cluster.truststore_secret_name(), Some("trust"));
    }

    #[test]
    fn test_derived_names() {
        let cluster = CacheCluster::new(
            "example",
            CacheClusterSpec {
                replicas: 1,
                image: None,
                security: SecuritySpec::default(),
                container: None,
                expose_admin: false,
            },
        );
        assert_eq!(cluster.admin_secret_name(), "example-generated-operator-secret");
        assert_eq!(cluster.config_map_name(), "example-configuration");
        assert_eq!(cluster.ping_service_name(), "example-ping");
        assert_eq!(cluster.image_or("img"), "img");
        assert!(!cluster.is_well_formed());
    }
}
