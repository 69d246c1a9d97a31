//! Pod spec decorations for the ECS node DaemonSet.
//!
//! The node pod starts with a single node container; each function here adds
//! one optional feature to it. The node container is always the first one.

use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, HostPathVolumeSource, NodeAffinity, NodeSelector, PodSpec, Volume,
    VolumeMount,
};

use crate::controller::validation::{ValidationError, validate_tolerations};
use crate::crd::EcsClusterSpec;
use crate::resources::common::{env_var, field_env_var, secret_env_var};
use crate::resources::ecs::{
    CSI_CONTROLLER_PUBLISH_SECRET_NAME, CSI_NODE_PUBLISH_SECRET_NAME, CSI_PROVISIONER_SECRET_NAME,
    ClusterFeatures,
};

const DEVICE_DIR_ENV: &str = "DEVICE_DIR";
const CSI_ENDPOINT_ENV: &str = "CSI_ENDPOINT";
const CSI_VERSION_ENV: &str = "CSI_VERSION";
const ADDRESS_ENV: &str = "ADDRESS";
const KUBE_NODE_NAME_ENV: &str = "KUBE_NODE_NAME";
const KV_ADDR_ENV: &str = "KV_ADDR";
const KV_BACKEND_ENV: &str = "KV_BACKEND";
const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
const DEBUG_LOG_LEVEL: &str = "xdebug";

/// Socket path of the CSI driver inside sidecar containers.
pub const CSI_SIDECAR_SOCKET: &str = "/csi/csi.sock";

const BIDIRECTIONAL: &str = "Bidirectional";
const HOST_PATH_DIRECTORY: &str = "Directory";
const HOST_PATH_DIRECTORY_OR_CREATE: &str = "DirectoryOrCreate";

fn host_path_volume(name: &str, path: &str, type_: Option<&str>) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: type_.map(str::to_string),
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn bidirectional_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        mount_propagation: Some(BIDIRECTIONAL.to_string()),
        ..mount(name, path)
    }
}

fn node_container(pod_spec: &mut PodSpec) -> Option<&mut Container> {
    pod_spec.containers.first_mut()
}

fn push_env(container: &mut Container, env: impl IntoIterator<Item = EnvVar>) {
    container.env.get_or_insert_with(Vec::new).extend(env);
}

fn push_mounts(container: &mut Container, mounts: impl IntoIterator<Item = VolumeMount>) {
    container
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .extend(mounts);
}

/// Share a host directory with a containerized kubelet.
pub fn add_shared_dir(spec: &EcsClusterSpec, pod_spec: &mut PodSpec) {
    if spec.shared_dir.is_empty() {
        return;
    }
    pod_spec
        .volumes
        .get_or_insert_with(Vec::new)
        .push(host_path_volume("shared", &spec.shared_dir, None));

    if let Some(container) = node_container(pod_spec) {
        push_env(
            container,
            [env_var(DEVICE_DIR_ENV, format!("{}/devices", spec.shared_dir))],
        );
        push_mounts(container, [bidirectional_mount("shared", &spec.shared_dir)]);
    }
}

/// Credential env vars for each CSI operation whose credentials are enabled.
fn csi_credential_env(spec: &EcsClusterSpec) -> Vec<EnvVar> {
    let mut env = Vec::new();
    if spec.csi.enable_provision_creds {
        env.extend([
            env_var("CSI_REQUIRE_CREDS_CREATE_VOL", "true"),
            env_var("CSI_REQUIRE_CREDS_DELETE_VOL", "true"),
            secret_env_var(
                "CSI_PROVISION_CREDS_USERNAME",
                CSI_PROVISIONER_SECRET_NAME,
                "username",
            ),
            secret_env_var(
                "CSI_PROVISION_CREDS_PASSWORD",
                CSI_PROVISIONER_SECRET_NAME,
                "password",
            ),
        ]);
    }
    if spec.csi.enable_controller_publish_creds {
        env.extend([
            env_var("CSI_REQUIRE_CREDS_CTRL_PUB_VOL", "true"),
            env_var("CSI_REQUIRE_CREDS_CTRL_UNPUB_VOL", "true"),
            secret_env_var(
                "CSI_CTRL_PUB_CREDS_USERNAME",
                CSI_CONTROLLER_PUBLISH_SECRET_NAME,
                "username",
            ),
            secret_env_var(
                "CSI_CTRL_PUB_CREDS_PASSWORD",
                CSI_CONTROLLER_PUBLISH_SECRET_NAME,
                "password",
            ),
        ]);
    }
    if spec.csi.enable_node_publish_creds {
        env.extend([
            env_var("CSI_REQUIRE_CREDS_NODE_PUB_VOL", "true"),
            secret_env_var(
                "CSI_NODE_PUB_CREDS_USERNAME",
                CSI_NODE_PUBLISH_SECRET_NAME,
                "username",
            ),
            secret_env_var(
                "CSI_NODE_PUB_CREDS_PASSWORD",
                CSI_NODE_PUBLISH_SECRET_NAME,
                "password",
            ),
        ]);
    }
    env
}

/// Add the CSI volumes, env vars and sidecar containers when CSI is enabled.
pub fn add_csi(spec: &EcsClusterSpec, features: ClusterFeatures, pod_spec: &mut PodSpec) {
    if !spec.csi.enable {
        return;
    }
    let csi_v1 = features.csi_v1;

    pod_spec.volumes.get_or_insert_with(Vec::new).extend([
        host_path_volume(
            "registrar-socket-dir",
            spec.csi_registrar_socket_dir(),
            Some(HOST_PATH_DIRECTORY_OR_CREATE),
        ),
        host_path_volume(
            "kubelet-dir",
            spec.csi_kubelet_dir(),
            Some(HOST_PATH_DIRECTORY),
        ),
        host_path_volume(
            "plugin-dir",
            spec.csi_plugin_dir(csi_v1),
            Some(HOST_PATH_DIRECTORY_OR_CREATE),
        ),
        host_path_volume(
            "device-dir",
            spec.csi_device_dir(),
            Some(HOST_PATH_DIRECTORY),
        ),
        host_path_volume(
            "registration-dir",
            spec.csi_registration_dir(csi_v1),
            Some(HOST_PATH_DIRECTORY),
        ),
    ]);

    if let Some(container) = node_container(pod_spec) {
        push_mounts(
            container,
            [
                bidirectional_mount("kubelet-dir", spec.csi_kubelet_dir()),
                mount("plugin-dir", spec.csi_plugin_dir(csi_v1)),
                mount("device-dir", spec.csi_device_dir()),
            ],
        );
        let mut env = vec![
            env_var(CSI_ENDPOINT_ENV, spec.csi_endpoint(csi_v1)),
            env_var(CSI_VERSION_ENV, if csi_v1 { "v1" } else { "v0" }),
        ];
        env.extend(csi_credential_env(spec));
        push_env(container, env);
    }

    let mut registrar_args = vec!["--v=5".to_string(), "--csi-address=$(ADDRESS)".to_string()];
    // Node-register mode when the kubelet watches for plugins
    if features.kubelet_plugins_watcher {
        registrar_args.push(format!(
            "--kubelet-registration-path={}",
            spec.csi_kubelet_registration_path(csi_v1)
        ));
    }
    pod_spec.containers.push(Container {
        name: "csi-driver-registrar".to_string(),
        image: Some(spec.csi_node_driver_registrar_image(csi_v1).to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(registrar_args),
        env: Some(vec![
            env_var(ADDRESS_ENV, CSI_SIDECAR_SOCKET),
            field_env_var(KUBE_NODE_NAME_ENV, "spec.nodeName"),
        ]),
        volume_mounts: Some(vec![
            mount("plugin-dir", "/csi"),
            mount("registrar-socket-dir", "/var/lib/csi/sockets/"),
            mount("registration-dir", "/registration"),
        ]),
        ..Default::default()
    });

    if csi_v1 {
        pod_spec.containers.push(Container {
            name: "csi-liveness-probe".to_string(),
            image: Some(spec.images.csi_liveness_probe_container.clone()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            args: Some(vec![
                "--csi-address=$(ADDRESS)".to_string(),
                "--connection-timeout=3s".to_string(),
            ]),
            env: Some(vec![env_var(ADDRESS_ENV, CSI_SIDECAR_SOCKET)]),
            volume_mounts: Some(vec![mount("plugin-dir", "/csi")]),
            ..Default::default()
        });
    }
}

/// Environment for an external key-value store, if configured.
pub fn kv_backend_env(spec: &EcsClusterSpec) -> Vec<EnvVar> {
    let mut env = Vec::new();
    if !spec.kv_backend.address.is_empty() {
        env.push(env_var(KV_ADDR_ENV, spec.kv_backend.address.clone()));
    }
    if !spec.kv_backend.backend.is_empty() {
        env.push(env_var(KV_BACKEND_ENV, spec.kv_backend.backend.clone()));
    }
    env
}

/// Debug log level, if enabled.
pub fn debug_env(spec: &EcsClusterSpec) -> Vec<EnvVar> {
    if spec.debug {
        vec![env_var(LOG_LEVEL_ENV, DEBUG_LOG_LEVEL)]
    } else {
        Vec::new()
    }
}

/// Restrict node pods to nodes matching the spec's selector terms.
pub fn add_node_affinity(spec: &EcsClusterSpec, pod_spec: &mut PodSpec) {
    if spec.node_selector_terms.is_empty() {
        return;
    }
    pod_spec.affinity = Some(Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: spec.node_selector_terms.clone(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    });
}

/// Apply the spec's tolerations after validating them.
pub fn add_tolerations(spec: &EcsClusterSpec, pod_spec: &mut PodSpec) -> Result<(), ValidationError> {
    validate_tolerations(&spec.tolerations)?;
    if !spec.tolerations.is_empty() {
        pod_spec.tolerations = Some(spec.tolerations.clone());
    }
    Ok(())
}

/// Copy the spec's resource requirements onto the node container.
pub fn add_node_container_resources(spec: &EcsClusterSpec, pod_spec: &mut PodSpec) {
    let Some(resources) = &spec.resources else {
        return;
    };
    if resources.limits.is_none() && resources.requests.is_none() {
        return;
    }
    if let Some(container) = node_container(pod_spec) {
        container.resources = Some(resources.clone());
    }
}
