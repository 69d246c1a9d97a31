//! Nautilus node tier (segment stores).
//!
//! Nodes run in a StatefulSet so that each keeps its cache volume across
//! restarts, and are addressed through a headless service.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, Container, ContainerPort, EnvFromSource, PersistentVolumeClaim,
    PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use crate::crd::{NautilusCluster, NautilusSpec};
use crate::resources::common::{
    exec_probe, field_env_var, health_check_command, nautilus_labels, owned_meta,
    owner_reference, pod_anti_affinity,
};
use crate::resources::nautilus_controller::{controller_url, jvm_system_properties};

/// Component label value for nodes.
pub const COMPONENT: &str = "nautilus-node";

/// Port nodes listen on for client traffic
pub const NODE_PORT: i32 = 12345;

const CACHE_VOLUME_NAME: &str = "cache";
const CACHE_MOUNT_PATH: &str = "/tmp/nautilus/cache";

pub fn statefulset_name(cluster: &NautilusCluster) -> String {
    format!("{}-nautilus-node", cluster.name_any())
}

pub fn headless_service_name(cluster: &NautilusCluster) -> String {
    format!("{}-nautilus-node-headless", cluster.name_any())
}

pub fn configmap_name(cluster: &NautilusCluster) -> String {
    format!("{}-nautilus-node-configmap", cluster.name_any())
}

pub fn generate_configmap(cluster: &NautilusCluster, nautilus: &NautilusSpec) -> ConfigMap {
    let data = BTreeMap::from([
        ("CLUSTER_NAME".to_string(), cluster.name_any()),
        ("ZK_URL".to_string(), cluster.spec.zookeeper_uri.clone()),
        ("BK_ZK_URL".to_string(), cluster.spec.zookeeper_uri.clone()),
        ("CONTROLLER_URL".to_string(), controller_url(cluster)),
        (
            "JAVA_OPTS".to_string(),
            jvm_system_properties(nautilus.options.as_ref()),
        ),
        ("HOST_PORT".to_string(), NODE_PORT.to_string()),
    ]);

    ConfigMap {
        metadata: owned_meta(
            configmap_name(cluster),
            cluster.namespace(),
            nautilus_labels(cluster, COMPONENT),
            Some(owner_reference(cluster)),
        ),
        data: Some(data),
        ..Default::default()
    }
}

pub fn generate_headless_service(cluster: &NautilusCluster) -> Service {
    let labels = nautilus_labels(cluster, COMPONENT);
    Service {
        metadata: owned_meta(
            headless_service_name(cluster),
            cluster.namespace(),
            labels.clone(),
            Some(owner_reference(cluster)),
        ),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("server".to_string()),
                port: NODE_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn generate_statefulset(cluster: &NautilusCluster, nautilus: &NautilusSpec) -> StatefulSet {
    let labels = nautilus_labels(cluster, COMPONENT);
    let image = nautilus.image.clone().unwrap_or_default();

    let container = Container {
        name: COMPONENT.to_string(),
        image: Some(image.image_ref()),
        image_pull_policy: Some(image.pull_policy.clone()),
        args: Some(vec!["segmentstore".to_string()]),
        ports: Some(vec![ContainerPort {
            name: Some("server".to_string()),
            container_port: NODE_PORT,
            ..Default::default()
        }]),
        env: Some(vec![field_env_var("POD_NAME", "metadata.name")]),
        env_from: Some(vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: configmap_name(cluster),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: CACHE_VOLUME_NAME.to_string(),
            mount_path: CACHE_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        resources: nautilus.node_resources.clone(),
        readiness_probe: Some(exec_probe(health_check_command(NODE_PORT), 10, 10, 9)),
        liveness_probe: Some(exec_probe(health_check_command(NODE_PORT), 60, 15, 4)),
        ..Default::default()
    };

    StatefulSet {
        metadata: owned_meta(
            statefulset_name(cluster),
            cluster.namespace(),
            labels.clone(),
            Some(owner_reference(cluster)),
        ),
        spec: Some(StatefulSetSpec {
            service_name: Some(headless_service_name(cluster)),
            replicas: Some(nautilus.node_replicas),
            pod_management_policy: Some("Parallel".to_string()),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    affinity: Some(pod_anti_affinity(labels)),
                    service_account_name: if nautilus.node_service_account_name.is_empty() {
                        None
                    } else {
                        Some(nautilus.node_service_account_name.clone())
                    },
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(CACHE_VOLUME_NAME.to_string()),
                    ..Default::default()
                },
                spec: nautilus.cache_volume_claim_template.clone(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
