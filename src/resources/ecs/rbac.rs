//! Service accounts and RBAC objects for ECS.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};

use crate::crd::EcsCluster;
use crate::resources::ecs::{
    DAEMONSET_SERVICE_ACCOUNT, STATEFULSET_SERVICE_ACCOUNT, app_labels, cluster_meta,
    namespaced_meta,
};

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

pub const KEY_MANAGEMENT_ROLE: &str = "key-management-role";
pub const KEY_MANAGEMENT_BINDING: &str = "key-management-binding";

pub const DRIVER_REGISTRAR_CLUSTER_ROLE: &str = "ecs:driver-registrar";
pub const DRIVER_REGISTRAR_BINDING: &str = "ecs:driver-registrar";
pub const K8S_DRIVER_REGISTRAR_BINDING: &str = "ecs:k8s-driver-registrar";
pub const PROVISIONER_CLUSTER_ROLE: &str = "ecs:csi-provisioner";
pub const PROVISIONER_BINDING: &str = "ecs:csi-provisioner";
pub const ATTACHER_CLUSTER_ROLE: &str = "ecs:csi-attacher";
pub const ATTACHER_BINDING: &str = "ecs:csi-attacher";
pub const FENCING_CLUSTER_ROLE: &str = "ecs:pod-fencer";
pub const FENCING_BINDING: &str = "ecs:pod-fencer";

/// Cluster roles that exist only while CSI is enabled.
pub const CSI_CLUSTER_ROLES: &[&str] = &[
    DRIVER_REGISTRAR_CLUSTER_ROLE,
    PROVISIONER_CLUSTER_ROLE,
    ATTACHER_CLUSTER_ROLE,
];

/// Cluster role bindings that exist only while CSI is enabled.
pub const CSI_CLUSTER_ROLE_BINDINGS: &[&str] = &[
    DRIVER_REGISTRAR_BINDING,
    K8S_DRIVER_REGISTRAR_BINDING,
    PROVISIONER_BINDING,
    ATTACHER_BINDING,
];

/// Every cluster role this operator may create.
pub const CLUSTER_ROLES: &[&str] = &[
    DRIVER_REGISTRAR_CLUSTER_ROLE,
    PROVISIONER_CLUSTER_ROLE,
    ATTACHER_CLUSTER_ROLE,
    FENCING_CLUSTER_ROLE,
];

/// Every cluster role binding this operator may create.
pub const CLUSTER_ROLE_BINDINGS: &[&str] = &[
    DRIVER_REGISTRAR_BINDING,
    K8S_DRIVER_REGISTRAR_BINDING,
    PROVISIONER_BINDING,
    ATTACHER_BINDING,
    FENCING_BINDING,
];

fn rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    PolicyRule {
        api_groups: Some(owned(api_groups)),
        resources: Some(owned(resources)),
        verbs: owned(verbs),
        ..Default::default()
    }
}

fn service_account_subject(cluster: &EcsCluster, name: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(cluster.spec.resource_namespace().to_string()),
        ..Default::default()
    }
}

fn cluster_role(name: &str, rules: Vec<PolicyRule>) -> ClusterRole {
    ClusterRole {
        metadata: cluster_meta(name),
        rules: Some(rules),
        ..Default::default()
    }
}

fn cluster_role_binding(
    cluster: &EcsCluster,
    name: &str,
    role: &str,
    service_account: &str,
) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: cluster_meta(name),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![service_account_subject(cluster, service_account)]),
    }
}

pub fn generate_daemonset_service_account(cluster: &EcsCluster) -> ServiceAccount {
    ServiceAccount {
        metadata: namespaced_meta(cluster, DAEMONSET_SERVICE_ACCOUNT, app_labels()),
        ..Default::default()
    }
}

pub fn generate_statefulset_service_account(cluster: &EcsCluster) -> ServiceAccount {
    ServiceAccount {
        metadata: namespaced_meta(cluster, STATEFULSET_SERVICE_ACCOUNT, app_labels()),
        ..Default::default()
    }
}

/// Role allowing the node pods to manage their encryption key secrets.
pub fn generate_key_management_role(cluster: &EcsCluster) -> Role {
    Role {
        metadata: namespaced_meta(cluster, KEY_MANAGEMENT_ROLE, app_labels()),
        rules: Some(vec![rule(
            &[""],
            &["secrets"],
            &["get", "list", "create", "delete"],
        )]),
    }
}

pub fn generate_key_management_binding(cluster: &EcsCluster) -> RoleBinding {
    RoleBinding {
        metadata: namespaced_meta(cluster, KEY_MANAGEMENT_BINDING, app_labels()),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "Role".to_string(),
            name: KEY_MANAGEMENT_ROLE.to_string(),
        },
        subjects: Some(vec![service_account_subject(
            cluster,
            DAEMONSET_SERVICE_ACCOUNT,
        )]),
    }
}

/// Cluster roles needed by the CSI sidecars.
pub fn generate_csi_cluster_roles() -> Vec<ClusterRole> {
    vec![
        cluster_role(
            DRIVER_REGISTRAR_CLUSTER_ROLE,
            vec![
                rule(
                    &[""],
                    &["events"],
                    &["get", "list", "watch", "create", "update", "patch"],
                ),
                rule(&[""], &["nodes"], &["get", "update", "patch"]),
                rule(
                    &["csi.storage.k8s.io"],
                    &["csinodeinfos"],
                    &["get", "update", "patch", "create"],
                ),
                rule(
                    &["apiextensions.k8s.io"],
                    &["customresourcedefinitions"],
                    &["create", "list", "watch", "delete"],
                ),
            ],
        ),
        cluster_role(
            PROVISIONER_CLUSTER_ROLE,
            vec![
                rule(
                    &[""],
                    &["persistentvolumes"],
                    &["get", "list", "watch", "create", "delete"],
                ),
                rule(
                    &[""],
                    &["persistentvolumeclaims"],
                    &["get", "list", "watch", "update"],
                ),
                rule(
                    &["storage.k8s.io"],
                    &["storageclasses"],
                    &["get", "list", "watch"],
                ),
                rule(
                    &[""],
                    &["events"],
                    &["list", "watch", "create", "update", "patch"],
                ),
                rule(&[""], &["secrets"], &["get"]),
            ],
        ),
        cluster_role(
            ATTACHER_CLUSTER_ROLE,
            vec![
                rule(
                    &[""],
                    &["persistentvolumes"],
                    &["get", "list", "watch", "update"],
                ),
                rule(&[""], &["nodes"], &["get", "list", "watch"]),
                rule(
                    &["storage.k8s.io"],
                    &["volumeattachments"],
                    &["get", "list", "watch", "update"],
                ),
                rule(
                    &["csi.storage.k8s.io"],
                    &["csinodeinfos"],
                    &["get", "list", "watch"],
                ),
            ],
        ),
    ]
}

/// Bindings of the CSI cluster roles to the node and helper service accounts.
pub fn generate_csi_cluster_role_bindings(cluster: &EcsCluster) -> Vec<ClusterRoleBinding> {
    vec![
        cluster_role_binding(
            cluster,
            DRIVER_REGISTRAR_BINDING,
            DRIVER_REGISTRAR_CLUSTER_ROLE,
            DAEMONSET_SERVICE_ACCOUNT,
        ),
        cluster_role_binding(
            cluster,
            K8S_DRIVER_REGISTRAR_BINDING,
            DRIVER_REGISTRAR_CLUSTER_ROLE,
            STATEFULSET_SERVICE_ACCOUNT,
        ),
        cluster_role_binding(
            cluster,
            PROVISIONER_BINDING,
            PROVISIONER_CLUSTER_ROLE,
            STATEFULSET_SERVICE_ACCOUNT,
        ),
        cluster_role_binding(
            cluster,
            ATTACHER_BINDING,
            ATTACHER_CLUSTER_ROLE,
            STATEFULSET_SERVICE_ACCOUNT,
        ),
    ]
}

/// Cluster role letting node pods evict pods from failed nodes.
pub fn generate_fencing_cluster_role() -> ClusterRole {
    cluster_role(
        FENCING_CLUSTER_ROLE,
        vec![
            rule(&[""], &["pods"], &["get", "list", "delete"]),
            rule(&[""], &["persistentvolumeclaims"], &["get", "list"]),
            rule(&["storage.k8s.io"], &["volumeattachments"], &["get", "list"]),
            rule(&[""], &["nodes"], &["get", "list", "watch"]),
            rule(&[""], &["events"], &["create", "patch"]),
        ],
    )
}

pub fn generate_fencing_cluster_role_binding(cluster: &EcsCluster) -> ClusterRoleBinding {
    cluster_role_binding(
        cluster,
        FENCING_BINDING,
        FENCING_CLUSTER_ROLE,
        DAEMONSET_SERVICE_ACCOUNT,
    )
}
