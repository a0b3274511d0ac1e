//! Per-kind projections used for drift detection.
//!
//! Each tracked kind declares which parts of its representation the operator
//! owns. Only those fields take part in the diff, so server-populated defaults
//! (cluster IPs, default modes, pod template defaults) never show up as drift.

use std::fmt::Debug;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Container, PodSpec, Secret, Service, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::controller::store::{ObjectStore, StoreFactory};
use crate::crd::{Cache, CacheBackup, CacheBatch, CacheCluster, CacheRestore};

/// An object kind the registry can track and persist
pub trait TrackedKind:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Operator-owned content, excluding the status sub-tree
    fn content(&self) -> Value;

    /// Operator-owned status, `None` when the operator does not manage this kind's status
    fn status(&self) -> Option<Value> {
        None
    }

    /// Store for this kind in `namespace`
    fn store(factory: &dyn StoreFactory, namespace: &str) -> Arc<dyn ObjectStore<Self>>;
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn insert_non_empty(map: &mut Map<String, Value>, key: &str, value: Value) {
    let empty = match &value {
        Value::Null => true,
        Value::Object(inner) => inner.is_empty(),
        Value::Array(inner) => inner.is_empty(),
        _ => false,
    };
    if !empty {
        map.insert(key.to_string(), value);
    }
}

fn metadata_content(meta: &ObjectMeta) -> Value {
    let mut map = Map::new();
    insert_non_empty(&mut map, "labels", to_json(&meta.labels));
    insert_non_empty(&mut map, "annotations", to_json(&meta.annotations));
    insert_non_empty(&mut map, "ownerReferences", to_json(&meta.owner_references));
    Value::Object(map)
}

fn container_content(container: &Container) -> Value {
    let mut map = Map::new();
    map.insert("name".into(), json!(container.name));
    insert_non_empty(&mut map, "image", to_json(&container.image));
    insert_non_empty(&mut map, "command", to_json(&container.command));
    insert_non_empty(&mut map, "args", to_json(&container.args));
    insert_non_empty(&mut map, "env", to_json(&container.env));
    insert_non_empty(&mut map, "ports", to_json(&container.ports));
    insert_non_empty(&mut map, "volumeMounts", to_json(&container.volume_mounts));
    insert_non_empty(&mut map, "resources", to_json(&container.resources));
    insert_non_empty(&mut map, "readinessProbe", to_json(&container.readiness_probe));
    insert_non_empty(&mut map, "livenessProbe", to_json(&container.liveness_probe));
    Value::Object(map)
}

fn volume_content(volume: &Volume) -> Value {
    let mut map = Map::new();
    map.insert("name".into(), json!(volume.name));
    if let Some(config_map) = &volume.config_map {
        map.insert("configMap".into(), json!({ "name": config_map.name }));
    }
    if let Some(secret) = &volume.secret {
        map.insert("secret".into(), json!({ "secretName": secret.secret_name }));
    }
    if volume.empty_dir.is_some() {
        map.insert("emptyDir".into(), json!({}));
    }
    Value::Object(map)
}

fn pod_spec_content(spec: &PodSpec) -> Value {
    let mut map = Map::new();
    map.insert(
        "containers".into(),
        Value::Array(spec.containers.iter().map(container_content).collect()),
    );
    if let Some(volumes) = &spec.volumes {
        insert_non_empty(
            &mut map,
            "volumes",
            Value::Array(volumes.iter().map(volume_content).collect()),
        );
    }
    insert_non_empty(&mut map, "restartPolicy", to_json(&spec.restart_policy));
    Value::Object(map)
}

impl TrackedKind for Secret {
    fn content(&self) -> Value {
        json!({
            "metadata": metadata_content(&self.metadata),
            "type": self.type_,
            "data": self.data,
        })
    }

    fn store(factory: &dyn StoreFactory, namespace: &str) -> Arc<dyn ObjectStore<Self>> {
        factory.secrets(namespace)
    }
}

impl TrackedKind for ConfigMap {
    fn content(&self) -> Value {
        json!({
            "metadata": metadata_content(&self.metadata),
            "data": self.data,
            "binaryData": self.binary_data,
        })
    }

    fn store(factory: &dyn StoreFactory, namespace: &str) -> Arc<dyn ObjectStore<Self>> {
        factory.config_maps(namespace)
    }
}

impl TrackedKind for Service {
    fn content(&self) -> Value {
        let mut spec = Map::new();
        if let Some(s) = &self.spec {
            insert_non_empty(&mut spec, "type", to_json(&s.type_));
            insert_non_empty(&mut spec, "selector", to_json(&s.selector));
            insert_non_empty(&mut spec, "ports", to_json(&s.ports));
            insert_non_empty(
                &mut spec,
                "publishNotReadyAddresses",
                to_json(&s.publish_not_ready_addresses),
            );
            // Allocated cluster IPs are server state; only headless is declared
            if s.cluster_ip.as_deref() == Some("None") {
                spec.insert("clusterIP".into(), json!("None"));
            }
        }
        json!({
            "metadata": metadata_content(&self.metadata),
            "spec": spec,
        })
    }

    fn store(factory: &dyn StoreFactory, namespace: &str) -> Arc<dyn ObjectStore<Self>> {
        factory.services(namespace)
    }
}

impl TrackedKind for StatefulSet {
    fn content(&self) -> Value {
        let mut spec = Map::new();
        if let Some(s) = &self.spec {
            insert_non_empty(&mut spec, "replicas", to_json(&s.replicas));
            insert_non_empty(&mut spec, "serviceName", to_json(&s.service_name));
            spec.insert("selector".into(), to_json(&s.selector));
            let mut template = Map::new();
            if let Some(meta) = &s.template.metadata {
                template.insert("metadata".into(), metadata_content(meta));
            }
            if let Some(pod) = &s.template.spec {
                template.insert("spec".into(), pod_spec_content(pod));
            }
            spec.insert("template".into(), Value::Object(template));
        }
        json!({
            "metadata": metadata_content(&self.metadata),
            "spec": spec,
        })
    }

    fn store(factory: &dyn StoreFactory, namespace: &str) -> Arc<dyn ObjectStore<Self>> {
        factory.stateful_sets(namespace)
    }
}

impl TrackedKind for Job {
    /// A Job's pod template is immutable once created, so only metadata is reconciled
    fn content(&self) -> Value {
        json!({ "metadata": metadata_content(&self.metadata) })
    }

    fn store(factory: &dyn StoreFactory, namespace: &str) -> Arc<dyn ObjectStore<Self>> {
        factory.jobs(namespace)
    }
}

/// Custom resources: the spec is user-owned content, the status is operator-owned
macro_rules! custom_resource_kind {
    ($kind:ty, $store:ident) => {
        impl TrackedKind for $kind {
            fn content(&self) -> Value {
                json!({
                    "metadata": metadata_content(&self.metadata),
                    "spec": to_json(&self.spec),
                })
            }

            fn status(&self) -> Option<Value> {
                self.status.as_ref().map(to_json)
            }

            fn store(factory: &dyn StoreFactory, namespace: &str) -> Arc<dyn ObjectStore<Self>> {
                factory.$store(namespace)
            }
        }
    };
}

custom_resource_kind!(CacheCluster, cache_clusters);
custom_resource_kind!(Cache, caches);
custom_resource_kind!(CacheBackup, backups);
custom_resource_kind!(CacheRestore, restores);
custom_resource_kind!(CacheBatch, batches);

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use std::collections::BTreeMap;

    fn service(cluster_ip: Option<&str>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("svc".into()),
                labels: Some(BTreeMap::from([("a".to_string(), "b".to_string())])),
                resource_version: Some("42".into()),
                uid: Some("uid".into()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: cluster_ip.map(str::to_string),
                ports: Some(vec![ServicePort {
                    port: 11222,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_server_metadata_is_not_content() {
        let mut other = service(None);
        other.metadata.resource_version = Some("43".into());
        other.metadata.uid = Some("other".into());
        assert_eq!(service(None).content(), other.content());
    }

    #[test]
    fn test_allocated_cluster_ip_is_ignored() {
        assert_eq!(service(None).content(), service(Some("10.0.0.1")).content());
        assert_ne!(service(None).content(), service(Some("None")).content());
    }

    #[test]
    fn test_empty_labels_equal_missing_labels() {
        let mut empty = service(None);
        empty.metadata.labels = Some(BTreeMap::new());
        let mut missing = service(None);
        missing.metadata.labels = None;
        assert_eq!(empty.content(), missing.content());
    }

    #[test]
    fn test_native_kinds_have_no_owned_status() {
        assert!(service(None).status().is_none());
    }
}
