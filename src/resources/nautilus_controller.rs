//! Nautilus controller tier: a Deployment behind a ClusterIP Service.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, Container, ContainerPort, EnvFromSource, PodSpec,
    PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use crate::crd::{NautilusCluster, NautilusSpec};
use crate::resources::common::{
    exec_probe, health_check_command, nautilus_labels, owned_meta, owner_reference,
    pod_anti_affinity,
};

/// Component label value for controllers.
pub const COMPONENT: &str = "nautilus-controller";

/// gRPC port used by clients and nodes
pub const CONTROLLER_PORT: i32 = 9090;

/// REST API port
pub const REST_PORT: i32 = 10080;

pub fn deployment_name(cluster: &NautilusCluster) -> String {
    format!("{}-nautilus-controller", cluster.name_any())
}

pub fn service_name(cluster: &NautilusCluster) -> String {
    format!("{}-nautilus-controller", cluster.name_any())
}

pub fn configmap_name(cluster: &NautilusCluster) -> String {
    format!("{}-nautilus-controller-configmap", cluster.name_any())
}

/// In-cluster URL at which nodes reach the controller.
pub fn controller_url(cluster: &NautilusCluster) -> String {
    format!(
        "tcp://{}.{}:{}",
        service_name(cluster),
        cluster.namespace().unwrap_or_else(|| "default".to_string()),
        CONTROLLER_PORT
    )
}

/// Render configuration overrides as JVM system properties, sorted by key.
pub fn jvm_system_properties(options: Option<&BTreeMap<String, String>>) -> String {
    options
        .into_iter()
        .flatten()
        .map(|(key, value)| format!("-D{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn generate_configmap(cluster: &NautilusCluster, nautilus: &NautilusSpec) -> ConfigMap {
    let data = BTreeMap::from([
        ("CLUSTER_NAME".to_string(), cluster.name_any()),
        ("ZK_URL".to_string(), cluster.spec.zookeeper_uri.clone()),
        ("WAIT_FOR".to_string(), cluster.spec.zookeeper_uri.clone()),
        (
            "JAVA_OPTS".to_string(),
            jvm_system_properties(nautilus.options.as_ref()),
        ),
        ("REST_SERVER_PORT".to_string(), REST_PORT.to_string()),
        ("CONTROLLER_SERVER_PORT".to_string(), CONTROLLER_PORT.to_string()),
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

pub fn generate_deployment(cluster: &NautilusCluster, nautilus: &NautilusSpec) -> Deployment {
    let labels = nautilus_labels(cluster, COMPONENT);
    let image = nautilus.image.clone().unwrap_or_default();

    let container = Container {
        name: COMPONENT.to_string(),
        image: Some(image.image_ref()),
        image_pull_policy: Some(image.pull_policy.clone()),
        args: Some(vec!["controller".to_string()]),
        ports: Some(vec![
            ContainerPort {
                name: Some("rest".to_string()),
                container_port: REST_PORT,
                ..Default::default()
            },
            ContainerPort {
                name: Some("grpc".to_string()),
                container_port: CONTROLLER_PORT,
                ..Default::default()
            },
        ]),
        env_from: Some(vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: configmap_name(cluster),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        resources: nautilus.controller_resources.clone(),
        readiness_probe: Some(exec_probe(health_check_command(REST_PORT), 20, 10, 3)),
        liveness_probe: Some(exec_probe(health_check_command(REST_PORT), 60, 15, 4)),
        ..Default::default()
    };

    Deployment {
        metadata: owned_meta(
            deployment_name(cluster),
            cluster.namespace(),
            labels.clone(),
            Some(owner_reference(cluster)),
        ),
        spec: Some(DeploymentSpec {
            replicas: Some(nautilus.controller_replicas),
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
                    service_account_name: if nautilus.controller_service_account_name.is_empty() {
                        None
                    } else {
                        Some(nautilus.controller_service_account_name.clone())
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn generate_service(cluster: &NautilusCluster) -> Service {
    let labels = nautilus_labels(cluster, COMPONENT);
    Service {
        metadata: owned_meta(
            service_name(cluster),
            cluster.namespace(),
            labels.clone(),
            Some(owner_reference(cluster)),
        ),
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![
                ServicePort {
                    name: Some("rest".to_string()),
                    port: REST_PORT,
                    ..Default::default()
                },
                ServicePort {
                    name: Some("grpc".to_string()),
                    port: CONTROLLER_PORT,
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
