//! Common resource generation utilities.
//!
//! Provides functions for creating standard Kubernetes resources with proper
//! labels, owner references, and configurations.

use k8s_openapi::api::core::v1::{
    Affinity, EnvVar, EnvVarSource, ExecAction, ObjectFieldSelector, PodAffinityTerm,
    PodAntiAffinity, Probe, SecretKeySelector, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

use crate::crd::NautilusCluster;

/// Value of the `app.kubernetes.io/managed-by` label.
pub const MANAGED_BY: &str = "nautilus-operator";

/// Value of the `app.kubernetes.io/name` label on NautilusCluster objects.
pub const NAUTILUS_APP: &str = "nautilus-cluster";

/// Standard labels applied to all managed resources of a cluster component.
pub fn standard_labels(app: &str, instance: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), app.to_string());
    labels.insert("app.kubernetes.io/instance".to_string(), instance.to_string());
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        component.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );
    labels
}

/// Labels for one component of a NautilusCluster. Also used as the pod selector.
pub fn nautilus_labels(cluster: &NautilusCluster, component: &str) -> BTreeMap<String, String> {
    standard_labels(NAUTILUS_APP, &cluster.name_any(), component)
}

/// Controller owner reference pointing at `resource`.
pub fn owner_reference<K>(resource: &K) -> OwnerReference
where
    K: Resource<DynamicType = ()>,
{
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: resource.name_any(),
        uid: resource.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Metadata for a namespaced object owned by a cluster resource.
pub fn owned_meta(
    name: impl Into<String>,
    namespace: Option<String>,
    labels: BTreeMap<String, String>,
    owner: Option<OwnerReference>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace,
        labels: if labels.is_empty() { None } else { Some(labels) },
        owner_references: owner.map(|o| vec![o]),
        ..Default::default()
    }
}

/// Exec probe command that succeeds once something listens on `port`.
pub fn health_check_command(port: i32) -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!("netstat -ltn 2> /dev/null | grep {port} || ss -ltn 2> /dev/null | grep {port}"),
    ]
}

/// Exec probe with the given timings.
pub fn exec_probe(
    command: Vec<String>,
    initial_delay_seconds: i32,
    period_seconds: i32,
    failure_threshold: i32,
) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(command),
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(period_seconds),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    }
}

/// Soft anti-affinity spreading pods matching `selector` across nodes.
pub fn pod_anti_affinity(selector: BTreeMap<String, String>) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(LabelSelector {
                            match_labels: Some(selector),
                            ..Default::default()
                        }),
                        topology_key: "kubernetes.io/hostname".to_string(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Plain `name=value` environment variable.
pub fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Environment variable read from a pod field such as `spec.nodeName`.
pub fn field_env_var(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".to_string()),
                field_path: field_path.to_string(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Environment variable read from a key of a Secret.
pub fn secret_env_var(name: &str, secret_name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.to_string(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::crd::{NautilusCluster, NautilusClusterSpec};

    #[test]
    fn test_owner_reference_targets_cluster() {
        let mut cluster = NautilusCluster::new("example", NautilusClusterSpec::default());
        cluster.metadata.uid = Some("uid-1".to_string());

        let owner = owner_reference(&cluster);
        assert_eq!(owner.api_version, "nautilus.nautilus.io/v1alpha1");
        assert_eq!(owner.kind, "NautilusCluster");
        assert_eq!(owner.name, "example");
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn test_standard_labels() {
        let labels = standard_labels("nautilus-cluster", "example", "bookie");
        assert_eq!(labels["app.kubernetes.io/instance"], "example");
        assert_eq!(labels["app.kubernetes.io/component"], "bookie");
        assert_eq!(labels["app.kubernetes.io/managed-by"], MANAGED_BY);
    }

    #[test]
    fn test_health_check_command_mentions_port() {
        let command = health_check_command(3181);
        assert_eq!(command.len(), 3);
        assert!(command[2].contains("grep 3181"));
    }

    #[test]
    fn test_secret_env_var() {
        let env = secret_env_var("ADMIN_PASSWORD", "init-secret", "password");
        let selector = env.value_from.unwrap().secret_key_ref.unwrap();
        assert_eq!(selector.name, "init-secret");
        assert_eq!(selector.key, "password");
        assert!(env.value.is_none());
    }
}
