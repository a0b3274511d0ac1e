//! Provision stage: services, graceful shutdown and the server StatefulSet.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, HTTPGetAction, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SecretVolumeSource, Service, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info};

use super::{owned_meta, retry_on};
use crate::constants::{
    ADMIN_SECRET_MOUNT_PATH, ANNOTATION_CONFIG_HASH, CLIENT_PORT, CONDITION_GRACEFUL_SHUTDOWN,
    PING_PORT, SERVER_CONFIG_KEY, SERVER_CONFIG_MOUNT_PATH, TRUSTSTORE_MOUNT_PATH,
};
use crate::controller::context::Context;
use crate::crd::{set_condition, CacheCluster, CacheClusterStatus};
use crate::events::{actions, reasons};

const CONTAINER_NAME: &str = "infinispan";
const HEALTH_PATH: &str = "/rest/v2/container/health/status";

fn service_port(name: &str, port: i32, node_port: Option<i32>) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        protocol: Some("TCP".to_string()),
        target_port: Some(IntOrString::Int(port)),
        node_port,
        ..ServicePort::default()
    }
}

/// Node port already allocated by the API server for `port_name`, if any
fn allocated_node_port(existing: Option<&Service>, port_name: &str) -> Option<i32> {
    existing?
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find(|p| p.name.as_deref() == Some(port_name))
        .and_then(|p| p.node_port)
}

fn cluster_status(cluster: &mut CacheCluster) -> &mut CacheClusterStatus {
    cluster.status.get_or_insert_with(CacheClusterStatus::default)
}

pub(super) async fn services(ctx: &mut Context<CacheCluster>) {
    let cluster = ctx.instance().clone();
    let selector = Some(cluster.pod_selector());
    let admin_port = ctx.settings().admin_port;
    let admin_type = if cluster.spec.expose_admin {
        "LoadBalancer"
    } else {
        "ClusterIP"
    };

    let definitions = [
        (cluster.name_any(), "infinispan", CLIENT_PORT, "ClusterIP", false),
        (cluster.ping_service_name(), "ping", PING_PORT, "ClusterIP", true),
        (cluster.admin_service_name(), "admin", admin_port, admin_type, false),
    ];

    for (name, port_name, port, type_, headless) in definitions {
        let existing = match ctx.registry.services.load_optional(&name).await {
            Ok(existing) => existing,
            Err(e) => return retry_on(ctx, format!("loading service '{name}'"), e),
        };
        let node_port = if type_ == "LoadBalancer" {
            allocated_node_port(existing.as_ref(), port_name)
        } else {
            None
        };
        let spec = ServiceSpec {
            type_: Some(type_.to_string()),
            selector: selector.clone(),
            ports: Some(vec![service_port(port_name, port, node_port)]),
            cluster_ip: headless.then(|| "None".to_string()),
            publish_not_ready_addresses: headless.then_some(true),
            ..ServiceSpec::default()
        };
        let base = existing.map(|svc| svc.metadata).unwrap_or_default();
        ctx.registry.services.define(Service {
            metadata: owned_meta(&cluster, &name, base),
            spec: Some(spec),
            ..Service::default()
        });
    }
}

pub(super) async fn graceful_shutdown(ctx: &mut Context<CacheCluster>) {
    let cluster = ctx.instance().clone();
    if cluster.is_gracefully_shut_down() {
        return;
    }
    let name = cluster.name_any();
    let current = match ctx.registry.stateful_sets.load_optional(&name).await {
        Ok(current) => current,
        Err(e) => return retry_on(ctx, format!("loading statefulset '{name}'"), e),
    };
    let running = current
        .as_ref()
        .and_then(|sts| sts.spec.as_ref())
        .and_then(|spec| spec.replicas)
        .unwrap_or(0);

    if running > 0 {
        let admin = match ctx.admin(&cluster) {
            Ok(admin) => admin,
            Err(e) => return retry_on(ctx, "connecting to administration endpoint".to_string(), e),
        };
        if let Err(e) = admin.shutdown().await {
            return retry_on(ctx, format!("shutting down cluster '{name}'"), e);
        }
        info!(cluster = %name, members = running, "cluster shut down gracefully");
        ctx.publish_event(
            EventType::Normal,
            reasons::GRACEFUL_SHUTDOWN,
            actions::SHUTDOWN,
            Some(format!("Stopped {running} members before scaling to zero")),
        )
        .await;
    }

    let status = cluster_status(ctx.instance_mut());
    if running > 0 {
        status.replicas_wanted_at_restart = Some(running);
    }
    set_condition(
        &mut status.conditions,
        CONDITION_GRACEFUL_SHUTDOWN,
        true,
        "ShutdownComplete",
        None,
    );
}

fn health_check(admin_port: i32, failure_threshold: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(HEALTH_PATH.to_string()),
            port: IntOrString::Int(admin_port),
            scheme: Some("HTTP".to_string()),
            ..HTTPGetAction::default()
        }),
        failure_threshold: Some(failure_threshold),
        initial_delay_seconds: Some(1),
        period_seconds: Some(10),
        success_threshold: Some(1),
        timeout_seconds: Some(3),
        ..Probe::default()
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..ContainerPort::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..VolumeMount::default()
    }
}

fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn resources(cluster: &CacheCluster) -> Option<ResourceRequirements> {
    let container = cluster.spec.container.as_ref()?;
    let mut limits = BTreeMap::new();
    if let Some(memory) = &container.memory {
        limits.insert("memory".to_string(), Quantity(memory.clone()));
    }
    if let Some(cpu) = &container.cpu {
        limits.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if limits.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        requests: Some(limits.clone()),
        limits: Some(limits),
        ..ResourceRequirements::default()
    })
}

/// Pod template for the server pods
fn pod_template(
    cluster: &CacheCluster,
    image: &str,
    admin_port: i32,
    config_hash: Option<&str>,
    truststore: Option<&str>,
) -> PodTemplateSpec {
    let mut labels = cluster.labels();
    labels.extend(cluster.pod_selector());
    let annotations = config_hash.map(|hash| {
        BTreeMap::from([(ANNOTATION_CONFIG_HASH.to_string(), hash.to_string())])
    });

    let env = cluster
        .spec
        .container
        .as_ref()
        .and_then(|c| c.extra_jvm_opts.clone())
        .map(|opts| {
            vec![EnvVar {
                name: "JAVA_OPTIONS".to_string(),
                value: Some(opts),
                ..EnvVar::default()
            }]
        });

    let mut volume_mounts = vec![
        mount("config", SERVER_CONFIG_MOUNT_PATH),
        mount("admin-identities", ADMIN_SECRET_MOUNT_PATH),
    ];
    let mut volumes = vec![
        Volume {
            name: "config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: cluster.config_map_name(),
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        },
        secret_volume("admin-identities", &cluster.admin_secret_name()),
    ];
    if let Some(secret) = truststore {
        volume_mounts.push(mount("truststore", TRUSTSTORE_MOUNT_PATH));
        volumes.push(secret_volume("truststore", secret));
    }

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        args: Some(vec![
            "--server-config".to_string(),
            format!("{SERVER_CONFIG_MOUNT_PATH}/{SERVER_CONFIG_KEY}"),
        ]),
        env,
        ports: Some(vec![
            container_port("infinispan", CLIENT_PORT),
            container_port("ping", PING_PORT),
            container_port("admin", admin_port),
        ]),
        volume_mounts: Some(volume_mounts),
        readiness_probe: Some(health_check(admin_port, 5)),
        liveness_probe: Some(health_check(admin_port, 5)),
        resources: resources(cluster),
        ..Container::default()
    };

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            annotations,
            ..ObjectMeta::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            volumes: Some(volumes),
            restart_policy: Some("Always".to_string()),
            ..PodSpec::default()
        }),
    }
}

pub(super) async fn stateful_set(ctx: &mut Context<CacheCluster>) {
    let cluster = ctx.instance().clone();
    let name = cluster.name_any();
    let existing = match ctx.registry.stateful_sets.load_optional(&name).await {
        Ok(existing) => existing,
        Err(e) => return retry_on(ctx, format!("loading statefulset '{name}'"), e),
    };
    let current = existing
        .as_ref()
        .and_then(|sts| sts.spec.as_ref())
        .and_then(|spec| spec.replicas)
        .unwrap_or(0);

    // Scaling to zero waits for the graceful shutdown to complete
    let replicas = if cluster.spec.replicas > 0 {
        cluster.effective_replicas()
    } else if cluster.is_gracefully_shut_down() {
        0
    } else {
        current
    };
    debug!(cluster = %name, replicas, current, "statefulset replicas");

    let settings = ctx.settings();
    let template = pod_template(
        &cluster,
        cluster.image_or(&settings.server_image),
        settings.admin_port,
        ctx.artifacts.config_hash.as_deref(),
        ctx.artifacts.truststore_secret.as_deref(),
    );
    let base = existing.map(|sts| sts.metadata).unwrap_or_default();
    ctx.registry.stateful_sets.define(StatefulSet {
        metadata: owned_meta(&cluster, &name, base),
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: Some(cluster.ping_service_name()),
            selector: LabelSelector {
                match_labels: Some(cluster.pod_selector()),
                ..LabelSelector::default()
            },
            template,
            ..StatefulSetSpec::default()
        }),
        ..StatefulSet::default()
    });

    // replicasWantedAtRestart is released once the restarted cluster re-forms
    if cluster.spec.replicas > 0 && cluster.is_gracefully_shut_down() {
        info!(cluster = %name, replicas, "restarting after graceful shutdown");
        let status = cluster_status(ctx.instance_mut());
        set_condition(
            &mut status.conditions,
            CONDITION_GRACEFUL_SHUTDOWN,
            false,
            "Restarted",
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CacheClusterSpec, ContainerSpec, SecuritySpec};

    fn cluster() -> CacheCluster {
        CacheCluster::new(
            "example",
            CacheClusterSpec {
                replicas: 3,
                image: None,
                security: SecuritySpec::default(),
                container: Some(ContainerSpec {
                    memory: Some("1Gi".into()),
                    cpu: None,
                    extra_jvm_opts: Some("-Xmx512m".into()),
                }),
                expose_admin: false,
            },
        )
    }

    #[test]
    fn test_pod_template_carries_config_hash() {
        let template = pod_template(&cluster(), "img", 11223, Some("abc"), None);
        let annotations = template.metadata.unwrap().annotations.unwrap();
        assert_eq!(annotations[ANNOTATION_CONFIG_HASH], "abc");

        let spec = template.spec.unwrap();
        let container = &spec.containers[0];
        assert_eq!(container.image.as_deref(), Some("img"));
        assert_eq!(container.env.as_ref().unwrap()[0].value.as_deref(), Some("-Xmx512m"));
        assert_eq!(
            container.resources.as_ref().unwrap().limits.as_ref().unwrap()["memory"],
            Quantity("1Gi".into())
        );
        assert_eq!(spec.volumes.unwrap().len(), 2);
    }

    #[test]
    fn test_truststore_adds_volume() {
        let template = pod_template(&cluster(), "img", 11223, None, Some("trust"));
        let spec = template.spec.unwrap();
        let volumes = spec.volumes.unwrap();
        assert!(volumes
            .iter()
            .any(|v| v.secret.as_ref().and_then(|s| s.secret_name.as_deref()) == Some("trust")));
        assert!(template.metadata.unwrap().annotations.is_none());
    }

    #[test]
    fn test_allocated_node_port_is_kept() {
        let existing = Service {
            spec: Some(ServiceSpec {
                ports: Some(vec![service_port("admin", 11223, Some(30123))]),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        };
        assert_eq!(allocated_node_port(Some(&existing), "admin"), Some(30123));
        assert_eq!(allocated_node_port(Some(&existing), "ping"), None);
        assert_eq!(allocated_node_port(None, "admin"), None);
    }
}
