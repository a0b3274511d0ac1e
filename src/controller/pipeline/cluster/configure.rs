//! Configure stage: the server configuration file.
//!
//! The rendered YAML is stored in a ConfigMap mounted by every server pod.
//! Its SHA-256 goes into the pod template so a changed configuration rolls
//! the StatefulSet.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::owned_meta;
use crate::config::OperatorSettings;
use crate::constants::{
    CLIENT_PORT, PING_PORT, SERVER_CONFIG_KEY, TRUSTSTORE_KEY, TRUSTSTORE_MOUNT_PATH,
};
use crate::controller::context::Context;
use crate::crd::{CacheCluster, ClientCertType};

/// Render the server configuration for `cluster`
///
/// # Errors
///
/// Fails only if the document cannot be serialized.
pub fn render_server_config(
    cluster: &CacheCluster,
    settings: &OperatorSettings,
) -> Result<String, serde_yaml::Error> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let security = &cluster.spec.security;

    let mut endpoint = json!({
        "socketBinding": "default",
        "securityRealm": "default",
        "connectors": { "rest": {}, "hotrod": {} },
    });
    if !security.endpoint_authentication {
        endpoint["connectors"]["rest"]["authentication"] = json!({ "mechanisms": [] });
    }

    let mut realm = json!({
        "name": "default",
        "propertiesRealm": { "groupsAttribute": "Roles" },
    });
    if let Some(encryption) = security.endpoint_encryption.as_ref() {
        if encryption.client_cert != ClientCertType::None {
            realm["serverIdentities"] = json!({
                "ssl": {
                    "clientAuth": "REQUIRED",
                    "truststore": { "path": format!("{TRUSTSTORE_MOUNT_PATH}/{TRUSTSTORE_KEY}") },
                }
            });
            if encryption.client_cert == ClientCertType::Authenticate {
                realm["truststoreRealm"] = json!({});
            }
        }
    }

    let document = json!({
        "infinispan": {
            "cacheContainer": {
                "name": "default",
                "transport": {
                    "cluster": name,
                    "stack": "kubernetes",
                    "properties": {
                        "jgroups.dns.query": format!(
                            "{}.{namespace}.svc.cluster.local",
                            cluster.ping_service_name()
                        ),
                        "jgroups.bind.port": PING_PORT,
                    },
                },
            },
            "server": {
                "socketBindings": {
                    "defaultInterface": "public",
                    "socketBinding": [
                        { "name": "default", "port": CLIENT_PORT },
                        { "name": "admin", "port": settings.admin_port },
                    ],
                },
                "security": { "securityRealms": [realm] },
                "endpoints": [
                    endpoint,
                    {
                        "socketBinding": "admin",
                        "securityRealm": "default",
                        "connectors": { "rest": {} },
                    },
                ],
            },
        }
    });
    serde_yaml::to_string(&document)
}

/// Hex SHA-256 of `content`
#[must_use]
pub(crate) fn config_hash(content: &str) -> String {
    Sha256::digest(content.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub(super) async fn server_config(ctx: &mut Context<CacheCluster>) {
    let cluster = ctx.instance().clone();
    let rendered = match render_server_config(&cluster, ctx.settings()) {
        Ok(rendered) => rendered,
        Err(e) => {
            ctx.flow
                .retry_processing(anyhow::Error::new(e).context("rendering server configuration"));
            return;
        }
    };
    let hash = config_hash(&rendered);
    let name = cluster.config_map_name();
    debug!(cluster = %cluster.name_any(), hash = %hash, "server configuration rendered");

    let base = match ctx.registry.config_maps.load_optional(&name).await {
        Ok(existing) => existing.map(|cm| cm.metadata).unwrap_or_default(),
        Err(e) => {
            ctx.flow.retry_processing(
                anyhow::Error::new(e).context(format!("loading config map '{name}'")),
            );
            return;
        }
    };
    ctx.registry.config_maps.define(ConfigMap {
        metadata: owned_meta(&cluster, &name, base),
        data: Some(BTreeMap::from([(SERVER_CONFIG_KEY.to_string(), rendered.clone())])),
        ..ConfigMap::default()
    });

    ctx.instance_mut()
        .status
        .get_or_insert_with(Default::default)
        .configuration_hash = Some(hash.clone());
    ctx.artifacts.server_config = Some(rendered);
    ctx.artifacts.config_hash = Some(hash);
}
