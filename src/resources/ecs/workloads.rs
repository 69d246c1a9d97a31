//! ECS workloads: the node DaemonSet and the CSI helper.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, HTTPGetAction, HostPathVolumeSource, PodSpec,
    PodTemplateSpec, Probe, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::controller::validation::ValidationError;
use crate::crd::EcsCluster;
use crate::resources::common::{env_var, field_env_var, secret_env_var};
use crate::resources::ecs::podspec::{
    CSI_SIDECAR_SOCKET, add_csi, add_node_affinity, add_node_container_resources, add_shared_dir,
    add_tolerations, debug_env, kv_backend_env,
};
use crate::resources::ecs::{
    CSI_PROVISIONER_NAME, ClusterFeatures, DAEMONSET_NAME, DAEMONSET_SERVICE_ACCOUNT,
    INIT_SECRET_NAME, STATEFULSET_NAME, STATEFULSET_SERVICE_ACCOUNT, daemonset_labels,
    daemonset_object_labels, namespaced_meta, statefulset_labels,
};

const NODE_CONTAINER_NAME: &str = "ecs";
const SYS_ADMIN_CAPABILITY: &str = "SYS_ADMIN";
const HEALTH_PATH: &str = "/v1/health";
const STATE_DIR: &str = "/var/lib/ecs";

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn http_probe(initial_delay_seconds: i32, period_seconds: i32, failure_threshold: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(HEALTH_PATH.to_string()),
            port: IntOrString::String("api".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(period_seconds),
        failure_threshold: Some(failure_threshold),
        timeout_seconds: Some(3),
        ..Default::default()
    }
}

fn host_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_node_container(cluster: &EcsCluster, join: &str) -> Container {
    let spec = &cluster.spec;

    let mut env = vec![
        field_env_var("HOSTNAME", "spec.nodeName"),
        secret_env_var("ADMIN_USERNAME", INIT_SECRET_NAME, "username"),
        secret_env_var("ADMIN_PASSWORD", INIT_SECRET_NAME, "password"),
        env_var("JOIN", join),
        field_env_var("ADVERTISE_IP", "status.podIP"),
        field_env_var("NAMESPACE", "metadata.namespace"),
        env_var("DISABLE_FENCING", bool_str(spec.disable_fencing)),
        env_var("DISABLE_TELEMETRY", bool_str(spec.disable_telemetry)),
    ];
    env.extend(kv_backend_env(spec));
    env.extend(debug_env(spec));

    Container {
        name: NODE_CONTAINER_NAME.to_string(),
        image: Some(spec.images.node_container.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec!["server".to_string()]),
        ports: Some(vec![ContainerPort {
            name: Some("api".to_string()),
            container_port: spec.service.internal_port,
            ..Default::default()
        }]),
        env: Some(env),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            allow_privilege_escalation: Some(true),
            capabilities: Some(Capabilities {
                add: Some(vec![SYS_ADMIN_CAPABILITY.to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "fuse".to_string(),
                mount_path: "/dev/fuse".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: "sys".to_string(),
                mount_path: "/sys".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: "state".to_string(),
                mount_path: STATE_DIR.to_string(),
                mount_propagation: Some("Bidirectional".to_string()),
                ..Default::default()
            },
        ]),
        readiness_probe: Some(http_probe(65, 10, 3)),
        liveness_probe: Some(http_probe(65, 5, 3)),
        ..Default::default()
    }
}

/// Generate the node DaemonSet.
///
/// `join` is the address list nodes use to find each other; it is
/// `spec.join` when set, otherwise computed from the cluster's nodes.
pub fn generate_daemonset(
    cluster: &EcsCluster,
    features: ClusterFeatures,
    join: &str,
) -> Result<DaemonSet, ValidationError> {
    let spec = &cluster.spec;
    let labels = daemonset_labels(cluster);

    let mut pod_spec = PodSpec {
        service_account_name: Some(DAEMONSET_SERVICE_ACCOUNT.to_string()),
        host_network: Some(true),
        host_pid: Some(true),
        dns_policy: Some("ClusterFirstWithHostNet".to_string()),
        containers: vec![generate_node_container(cluster, join)],
        volumes: Some(vec![
            host_volume("fuse", "/dev/fuse"),
            host_volume("sys", "/sys"),
            host_volume("state", STATE_DIR),
        ]),
        ..Default::default()
    };
    add_shared_dir(spec, &mut pod_spec);
    add_csi(spec, features, &mut pod_spec);
    add_node_affinity(spec, &mut pod_spec);
    add_tolerations(spec, &mut pod_spec)?;
    add_node_container_resources(spec, &mut pod_spec);

    Ok(DaemonSet {
        metadata: namespaced_meta(cluster, DAEMONSET_NAME, daemonset_object_labels(cluster)),
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn csi_sidecar(name: &str, image: &str, args: Vec<String>) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(args),
        env: Some(vec![env_var("ADDRESS", CSI_SIDECAR_SOCKET)]),
        volume_mounts: Some(vec![VolumeMount {
            name: "plugin-dir".to_string(),
            mount_path: "/csi".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn generate_csi_helper_pod_template(
    cluster: &EcsCluster,
    features: ClusterFeatures,
    labels: &BTreeMap<String, String>,
) -> PodTemplateSpec {
    let spec = &cluster.spec;
    let common_args = || {
        vec![
            "--v=5".to_string(),
            "--csi-address=$(ADDRESS)".to_string(),
        ]
    };

    let mut provisioner_args = common_args();
    provisioner_args.push(format!("--provisioner={CSI_PROVISIONER_NAME}"));

    let mut containers = vec![
        csi_sidecar(
            "csi-external-provisioner",
            &spec.images.csi_external_provisioner_container,
            provisioner_args,
        ),
        csi_sidecar(
            "csi-external-attacher",
            &spec.images.csi_external_attacher_container,
            common_args(),
        ),
    ];
    if features.csi_v1 {
        containers.push(csi_sidecar(
            "csi-cluster-driver-registrar",
            &spec.images.csi_cluster_driver_registrar_container,
            common_args(),
        ));
    }

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name: Some(STATEFULSET_SERVICE_ACCOUNT.to_string()),
            containers,
            volumes: Some(vec![Volume {
                name: "plugin-dir".to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: spec.csi_plugin_dir(features.csi_v1).to_string(),
                    type_: Some("DirectoryOrCreate".to_string()),
                }),
                ..Default::default()
            }]),
            tolerations: if spec.tolerations.is_empty() {
                None
            } else {
                Some(spec.tolerations.clone())
            },
            ..Default::default()
        }),
    }
}

/// Generate the CSI helper as a single-replica StatefulSet.
pub fn generate_csi_helper_statefulset(
    cluster: &EcsCluster,
    features: ClusterFeatures,
) -> StatefulSet {
    let labels = statefulset_labels(cluster);
    StatefulSet {
        metadata: namespaced_meta(cluster, STATEFULSET_NAME, labels.clone()),
        spec: Some(StatefulSetSpec {
            service_name: Some(STATEFULSET_NAME.to_string()),
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: generate_csi_helper_pod_template(cluster, features, &labels),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the CSI helper as a single-replica Deployment.
pub fn generate_csi_helper_deployment(cluster: &EcsCluster, features: ClusterFeatures) -> Deployment {
    let labels = statefulset_labels(cluster);
    Deployment {
        metadata: namespaced_meta(cluster, STATEFULSET_NAME, labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: generate_csi_helper_pod_template(cluster, features, &labels),
            ..Default::default()
        }),
        ..Default::default()
    }
}
