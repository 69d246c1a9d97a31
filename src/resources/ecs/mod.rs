//! Resource generation for EcsCluster.
//!
//! ECS objects live in the cluster's resource namespace (`spec.namespace`),
//! which may differ from the namespace of the EcsCluster itself. Owner
//! references are only set where Kubernetes accepts them (same namespace);
//! everything else is removed by the EcsCluster finalizer.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | Namespace | Resource namespace |
//! | ServiceAccount | Identities for the node DaemonSet and CSI helper |
//! | Role / RoleBinding | Key management secrets |
//! | Secret | Init credentials, TLS, CSI credentials |
//! | DaemonSet | One storage node per Kubernetes node |
//! | Service / Ingress | API access |
//! | StatefulSet or Deployment | CSI provisioner and attacher |
//! | ClusterRole / ClusterRoleBinding | CSI sidecars and pod fencing |
//! | StorageClass | Dynamic provisioning |

pub mod podspec;
pub mod rbac;
pub mod secrets;
pub mod services;
pub mod storage_class;
pub mod workloads;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use semver::Version;
use tracing::warn;

use crate::crd::EcsCluster;
use crate::resources::common::owner_reference;

/// Value of the `app` label on every ECS object.
pub const APP_NAME: &str = "ecs";

pub const DAEMONSET_NAME: &str = "ecs-daemonset";
pub const STATEFULSET_NAME: &str = "ecs-statefulset";
pub const DAEMONSET_SERVICE_ACCOUNT: &str = "ecs-daemonset-sa";
pub const STATEFULSET_SERVICE_ACCOUNT: &str = "ecs-statefulset-sa";

pub const INIT_SECRET_NAME: &str = "init-secret";
pub const TLS_SECRET_NAME: &str = "tls-secret";
pub const CSI_PROVISIONER_SECRET_NAME: &str = "csi-provisioner-secret";
pub const CSI_CONTROLLER_PUBLISH_SECRET_NAME: &str = "csi-controller-publish-secret";
pub const CSI_NODE_PUBLISH_SECRET_NAME: &str = "csi-node-publish-secret";

/// Every CSI credential Secret the operator may create.
pub const CSI_SECRET_NAMES: &[&str] = &[
    CSI_PROVISIONER_SECRET_NAME,
    CSI_CONTROLLER_PUBLISH_SECRET_NAME,
    CSI_NODE_PUBLISH_SECRET_NAME,
];

/// Provisioner name registered by the CSI driver.
pub const CSI_PROVISIONER_NAME: &str = "ecs";
/// Provisioner name of the in-tree volume plugin.
pub const INTREE_PROVISIONER_NAME: &str = "kubernetes.io/ecs";

/// Label naming the owning EcsCluster.
pub const OWNER_NAME_LABEL: &str = "ecs_cr";
/// Label carrying the owning EcsCluster's namespace.
pub const OWNER_NAMESPACE_LABEL: &str = "ecs_ns";

const DAEMONSET_KIND: &str = "daemonset";
const STATEFULSET_KIND: &str = "statefulset";

/// Labels selecting the node DaemonSet pods of an EcsCluster.
pub fn daemonset_labels(cluster: &EcsCluster) -> BTreeMap<String, String> {
    kind_labels(cluster, DAEMONSET_KIND)
}

/// Labels selecting the CSI helper pods of an EcsCluster.
pub fn statefulset_labels(cluster: &EcsCluster) -> BTreeMap<String, String> {
    kind_labels(cluster, STATEFULSET_KIND)
}

/// Labels on the node DaemonSet object itself.
///
/// Adds the owner's namespace, which stays out of the selector since a
/// DaemonSet selector cannot change after creation.
pub fn daemonset_object_labels(cluster: &EcsCluster) -> BTreeMap<String, String> {
    let mut labels = daemonset_labels(cluster);
    labels.insert(
        OWNER_NAMESPACE_LABEL.to_string(),
        cluster.namespace().unwrap_or_default(),
    );
    labels
}

/// Whether an object carrying `labels` belongs to `cluster`.
///
/// Objects without the namespace label match on name alone.
pub fn is_owned_by(labels: &BTreeMap<String, String>, cluster: &EcsCluster) -> bool {
    if labels.get(OWNER_NAME_LABEL).map(String::as_str) != cluster.metadata.name.as_deref() {
        return false;
    }
    match labels.get(OWNER_NAMESPACE_LABEL) {
        Some(ns) => cluster.metadata.namespace.as_deref() == Some(ns.as_str()),
        None => true,
    }
}

fn kind_labels(cluster: &EcsCluster, kind: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), APP_NAME.to_string()),
        (OWNER_NAME_LABEL.to_string(), cluster.name_any()),
        ("kind".to_string(), kind.to_string()),
    ])
}

/// Labels applied to cluster-scoped objects and the namespace.
pub fn app_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), APP_NAME.to_string())])
}

/// Owner reference for an object created in `namespace`, if allowed there.
pub fn owner_in(cluster: &EcsCluster, namespace: &str) -> Option<OwnerReference> {
    (cluster.namespace().as_deref() == Some(namespace)).then(|| owner_reference(cluster))
}

/// Metadata for an object in the cluster's resource namespace.
pub fn namespaced_meta(
    cluster: &EcsCluster,
    name: &str,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    let namespace = cluster.spec.resource_namespace().to_string();
    ObjectMeta {
        name: Some(name.to_string()),
        owner_references: owner_in(cluster, &namespace).map(|o| vec![o]),
        namespace: Some(namespace),
        labels: if labels.is_empty() { None } else { Some(labels) },
        ..Default::default()
    }
}

/// Metadata for a cluster-scoped object.
pub fn cluster_meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(app_labels()),
        ..Default::default()
    }
}

/// Capabilities of the Kubernetes cluster that change how ECS is deployed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ClusterFeatures {
    /// CSI spec v1 (Kubernetes 1.13 and above).
    pub csi_v1: bool,
    /// Kubelet plugin registration through the plugins watcher (1.12 and above).
    pub kubelet_plugins_watcher: bool,
}

impl ClusterFeatures {
    /// Derive features from an API server version such as `v1.13.2`.
    pub fn from_version(version: &str) -> Self {
        Self {
            csi_v1: csi_v1_supported(version),
            kubelet_plugins_watcher: kubelet_plugins_watcher_supported(version),
        }
    }
}

pub fn kubelet_plugins_watcher_supported(version: &str) -> bool {
    version_supported(version, "1.12.0")
}

pub fn csi_v1_supported(version: &str) -> bool {
    version_supported(version, "1.13.0")
}

/// Whether `have` is at least `want`. Unparsable versions are unsupported.
pub fn version_supported(have: &str, want: &str) -> bool {
    let want = match Version::parse(want) {
        Ok(v) => v,
        Err(e) => {
            warn!(version = %want, error = %e, "Failed to parse version");
            return false;
        }
    };
    let have = match Version::parse(have.trim_start_matches('v')) {
        Ok(v) => v,
        Err(e) => {
            warn!(version = %have, error = %e, "Failed to parse version");
            return false;
        }
    };
    have >= want
}

/// Generate the resource namespace.
pub fn generate_namespace(cluster: &EcsCluster) -> Namespace {
    Namespace {
        metadata: cluster_meta(cluster.spec.resource_namespace()),
        ..Default::default()
    }
}

/// EcsCluster named `example-ecs` in `namespace`, shared by the resource tests.
#[cfg(test)]
pub(crate) fn test_cluster(namespace: &str, spec: crate::crd::EcsClusterSpec) -> EcsCluster {
    let mut cluster = EcsCluster::new("example-ecs", spec);
    cluster.metadata.namespace = Some(namespace.to_string());
    cluster.metadata.uid = Some("uid-1".to_string());
    cluster
}
