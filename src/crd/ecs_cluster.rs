//! EcsCluster Custom Resource Definition.
//!
//! An ECS cluster runs one storage node per Kubernetes node (DaemonSet) and,
//! when CSI is enabled, a helper StatefulSet hosting the external provisioner
//! and attacher. Optional features are toggled from the spec: CSI, ingress
//! with TLS, and pod fencing.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{NodeSelectorTerm, ResourceRequirements, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::defaults::{DefaultingConfig, WithDefaults, default_if_empty, default_if_zero};
use super::status::ClusterStatus;

/// Namespace where ECS node resources are created by default.
pub const DEFAULT_RESOURCE_NAMESPACE: &str = "ecs";

pub const DEFAULT_NODE_CONTAINER_IMAGE: &str = "ecs/node:1.1.0";
pub const CSI_V0_NODE_DRIVER_REGISTRAR_IMAGE: &str = "quay.io/k8scsi/driver-registrar:v0.4.2";
pub const CSI_V1_NODE_DRIVER_REGISTRAR_IMAGE: &str =
    "quay.io/k8scsi/csi-node-driver-registrar:v1.0.1";
pub const CSI_V1_CLUSTER_DRIVER_REGISTRAR_IMAGE: &str =
    "quay.io/k8scsi/csi-cluster-driver-registrar:v1.0.1";
pub const CSI_V1_EXTERNAL_PROVISIONER_IMAGE: &str = "ecs/csi-provisioner:v1.0.1";
pub const CSI_V1_EXTERNAL_ATTACHER_IMAGE: &str = "quay.io/k8scsi/csi-attacher:v1.0.1";
pub const CSI_V1_LIVENESS_PROBE_IMAGE: &str = "quay.io/k8scsi/livenessprobe:v1.0.1";

pub const DEFAULT_SERVICE_NAME: &str = "ecs";
pub const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";
pub const DEFAULT_SERVICE_PORT: i32 = 5705;

pub const DEFAULT_STORAGE_CLASS_NAME: &str = "fast";

pub const CSI_HELPER_STATEFULSET: &str = "statefulset";
pub const CSI_HELPER_DEPLOYMENT: &str = "deployment";

const CSI_KUBELET_DIR: &str = "/var/lib/kubelet";
const CSI_DEVICE_DIR: &str = "/dev";
const CSI_REGISTRAR_SOCKET_DIR: &str = "/var/lib/kubelet/device-plugins/";
const CSI_V0_PLUGIN_DIR: &str = "/var/lib/kubelet/plugins/ecs/";
const CSI_V1_PLUGIN_DIR: &str = "/var/lib/kubelet/plugins_registry/ecs/";
const CSI_V0_REGISTRATION_DIR: &str = "/var/lib/kubelet/device-plugins/";
const CSI_V1_REGISTRATION_DIR: &str = "/var/lib/kubelet/plugins_registry";

/// EcsCluster is a custom resource for deploying ECS storage clusters.
///
/// Example:
/// ```yaml
/// apiVersion: ecs.ecs.io/v1
/// kind: EcsCluster
/// metadata:
///   name: example-ecs
/// spec:
///   secretRefName: ecs-api
///   secretRefNamespace: default
///   csi:
///     enable: true
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ecs.ecs.io",
    version = "v1",
    kind = "EcsCluster",
    plural = "ecsclusters",
    shortname = "ecs",
    status = "ClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Desired", "type":"integer", "jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EcsClusterSpec {
    /// Join token or address list used by nodes to form the cluster.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub join: String,

    /// Namespace where node resources are created (default: ecs).
    #[serde(default)]
    pub namespace: String,

    /// Name of the Secret holding API and CSI credentials.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_ref_name: String,

    /// Namespace of the Secret holding API and CSI credentials.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_ref_namespace: String,

    /// Container images.
    #[serde(default)]
    pub images: EcsImages,

    /// CSI driver configuration.
    #[serde(default)]
    pub csi: CsiSpec,

    /// API service configuration.
    #[serde(default)]
    pub service: EcsServiceSpec,

    /// Ingress for the API service.
    #[serde(default)]
    pub ingress: IngressSpec,

    /// External key-value store.
    #[serde(default)]
    pub kv_backend: KvBackend,

    /// Directory shared with a containerized kubelet.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub shared_dir: String,

    /// Enable debug logging in the node container.
    #[serde(default)]
    pub debug: bool,

    /// Disable pod fencing.
    #[serde(default)]
    pub disable_fencing: bool,

    /// Disable telemetry reporting.
    #[serde(default)]
    pub disable_telemetry: bool,

    /// Node selector terms restricting where nodes run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_selector_terms: Vec<NodeSelectorTerm>,

    /// Tolerations applied to node pods.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    /// CPU and memory requests and limits of the node container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Name of the StorageClass created for the cluster (default: fast).
    #[serde(default)]
    pub storage_class_name: String,
}

/// Container images used by ECS.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EcsImages {
    #[serde(default)]
    pub node_container: String,
    /// Left empty to pick the registrar matching the cluster's CSI version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub csi_node_driver_registrar_container: String,
    #[serde(default)]
    pub csi_cluster_driver_registrar_container: String,
    #[serde(default)]
    pub csi_external_provisioner_container: String,
    #[serde(default)]
    pub csi_external_attacher_container: String,
    #[serde(default)]
    pub csi_liveness_probe_container: String,
}

/// CSI driver configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CsiSpec {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub enable_provision_creds: bool,
    #[serde(default)]
    pub enable_controller_publish_creds: bool,
    #[serde(default)]
    pub enable_node_publish_creds: bool,
    /// Workload kind hosting the CSI helper: `statefulset` (default) or `deployment`.
    #[serde(default)]
    pub deployment_strategy: String,
}

/// API service configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EcsServiceSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub external_port: i32,
    #[serde(default)]
    pub internal_port: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Ingress for the API service.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    #[serde(default)]
    pub enable: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// External key-value store settings.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KvBackend {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend: String,
}

impl WithDefaults for EcsImages {
    fn with_defaults(&mut self, _config: &DefaultingConfig) -> bool {
        let mut changed = default_if_empty(&mut self.node_container, DEFAULT_NODE_CONTAINER_IMAGE);
        changed |= default_if_empty(
            &mut self.csi_cluster_driver_registrar_container,
            CSI_V1_CLUSTER_DRIVER_REGISTRAR_IMAGE,
        );
        changed |= default_if_empty(
            &mut self.csi_external_provisioner_container,
            CSI_V1_EXTERNAL_PROVISIONER_IMAGE,
        );
        changed |= default_if_empty(
            &mut self.csi_external_attacher_container,
            CSI_V1_EXTERNAL_ATTACHER_IMAGE,
        );
        changed |= default_if_empty(
            &mut self.csi_liveness_probe_container,
            CSI_V1_LIVENESS_PROBE_IMAGE,
        );
        changed
    }
}

impl WithDefaults for EcsServiceSpec {
    fn with_defaults(&mut self, _config: &DefaultingConfig) -> bool {
        let mut changed = default_if_empty(&mut self.name, DEFAULT_SERVICE_NAME);
        changed |= default_if_empty(&mut self.r#type, DEFAULT_SERVICE_TYPE);
        changed |= default_if_zero(&mut self.external_port, DEFAULT_SERVICE_PORT);
        changed |= default_if_zero(&mut self.internal_port, DEFAULT_SERVICE_PORT);
        changed
    }
}

impl WithDefaults for EcsClusterSpec {
    fn with_defaults(&mut self, config: &DefaultingConfig) -> bool {
        let mut changed = self.images.with_defaults(config);
        changed |= self.service.with_defaults(config);
        changed |= default_if_empty(&mut self.namespace, DEFAULT_RESOURCE_NAMESPACE);
        changed |= default_if_empty(&mut self.storage_class_name, DEFAULT_STORAGE_CLASS_NAME);
        changed |= default_if_empty(&mut self.csi.deployment_strategy, CSI_HELPER_STATEFULSET);
        changed
    }
}

impl EcsClusterSpec {
    /// Namespace where node resources live.
    pub fn resource_namespace(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_RESOURCE_NAMESPACE
        } else {
            &self.namespace
        }
    }

    pub fn csi_kubelet_dir(&self) -> &'static str {
        CSI_KUBELET_DIR
    }

    pub fn csi_device_dir(&self) -> &'static str {
        CSI_DEVICE_DIR
    }

    pub fn csi_registrar_socket_dir(&self) -> &'static str {
        CSI_REGISTRAR_SOCKET_DIR
    }

    pub fn csi_plugin_dir(&self, csi_v1: bool) -> &'static str {
        if csi_v1 {
            CSI_V1_PLUGIN_DIR
        } else {
            CSI_V0_PLUGIN_DIR
        }
    }

    pub fn csi_registration_dir(&self, csi_v1: bool) -> &'static str {
        if csi_v1 {
            CSI_V1_REGISTRATION_DIR
        } else {
            CSI_V0_REGISTRATION_DIR
        }
    }

    /// Socket the kubelet registers the driver with.
    pub fn csi_kubelet_registration_path(&self, csi_v1: bool) -> String {
        format!("{}csi.sock", self.csi_plugin_dir(csi_v1))
    }

    /// CSI endpoint exposed by the node container.
    pub fn csi_endpoint(&self, csi_v1: bool) -> String {
        format!(
            "unix://{}csi.sock",
            self.csi_plugin_dir(csi_v1).trim_start_matches('/')
        )
    }

    /// Whether the CSI helper runs as a Deployment instead of a StatefulSet.
    pub fn csi_helper_is_deployment(&self) -> bool {
        self.csi.deployment_strategy == CSI_HELPER_DEPLOYMENT
    }

    pub fn csi_node_driver_registrar_image(&self, csi_v1: bool) -> &str {
        if !self.images.csi_node_driver_registrar_container.is_empty() {
            return &self.images.csi_node_driver_registrar_container;
        }
        if csi_v1 {
            CSI_V1_NODE_DRIVER_REGISTRAR_IMAGE
        } else {
            CSI_V0_NODE_DRIVER_REGISTRAR_IMAGE
        }
    }
}
