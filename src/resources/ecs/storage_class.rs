//! StorageClass for dynamically provisioned ECS volumes.
//!
//! With CSI enabled the class points at the CSI driver and references the
//! credential secrets using the parameter keys of the detected CSI version.
//! Otherwise it uses the in-tree provisioner with the init secret.

use std::collections::BTreeMap;

use k8s_openapi::api::storage::v1::StorageClass;

use crate::crd::EcsCluster;
use crate::resources::ecs::{
    CSI_CONTROLLER_PUBLISH_SECRET_NAME, CSI_NODE_PUBLISH_SECRET_NAME, CSI_PROVISIONER_NAME,
    CSI_PROVISIONER_SECRET_NAME, ClusterFeatures, INIT_SECRET_NAME, INTREE_PROVISIONER_NAME,
    cluster_meta,
};

const DEFAULT_FS_TYPE: &str = "ext4";

/// Parameter keys naming a credential secret, per CSI version.
struct SecretParamKeys {
    name: &'static str,
    namespace: &'static str,
}

struct CsiParamKeys {
    fs_type: &'static str,
    provisioner: SecretParamKeys,
    controller_publish: SecretParamKeys,
    node_publish: SecretParamKeys,
}

const CSI_V0_KEYS: CsiParamKeys = CsiParamKeys {
    fs_type: "fsType",
    provisioner: SecretParamKeys {
        name: "csiProvisionerSecretName",
        namespace: "csiProvisionerSecretNamespace",
    },
    controller_publish: SecretParamKeys {
        name: "csiControllerPublishSecretName",
        namespace: "csiControllerPublishSecretNamespace",
    },
    node_publish: SecretParamKeys {
        name: "csiNodePublishSecretName",
        namespace: "csiNodePublishSecretNamespace",
    },
};

const CSI_V1_KEYS: CsiParamKeys = CsiParamKeys {
    fs_type: "csi.storage.k8s.io/fstype",
    provisioner: SecretParamKeys {
        name: "csi.storage.k8s.io/provisioner-secret-name",
        namespace: "csi.storage.k8s.io/provisioner-secret-namespace",
    },
    controller_publish: SecretParamKeys {
        name: "csi.storage.k8s.io/controller-publish-secret-name",
        namespace: "csi.storage.k8s.io/controller-publish-secret-namespace",
    },
    node_publish: SecretParamKeys {
        name: "csi.storage.k8s.io/node-publish-secret-name",
        namespace: "csi.storage.k8s.io/node-publish-secret-namespace",
    },
};

/// Generate the StorageClass named `spec.storageClassName`.
pub fn generate_storage_class(cluster: &EcsCluster, features: ClusterFeatures) -> StorageClass {
    let spec = &cluster.spec;
    let namespace = spec.resource_namespace().to_string();
    let mut parameters = BTreeMap::new();

    let provisioner = if spec.csi.enable {
        let keys = if features.csi_v1 {
            &CSI_V1_KEYS
        } else {
            &CSI_V0_KEYS
        };
        parameters.insert(keys.fs_type.to_string(), DEFAULT_FS_TYPE.to_string());

        let secrets = [
            (
                spec.csi.enable_provision_creds,
                &keys.provisioner,
                CSI_PROVISIONER_SECRET_NAME,
            ),
            (
                spec.csi.enable_controller_publish_creds,
                &keys.controller_publish,
                CSI_CONTROLLER_PUBLISH_SECRET_NAME,
            ),
            (
                spec.csi.enable_node_publish_creds,
                &keys.node_publish,
                CSI_NODE_PUBLISH_SECRET_NAME,
            ),
        ];
        for (enabled, param, secret_name) in secrets {
            if enabled {
                parameters.insert(param.name.to_string(), secret_name.to_string());
                parameters.insert(param.namespace.to_string(), namespace.clone());
            }
        }
        CSI_PROVISIONER_NAME
    } else {
        parameters.insert("fsType".to_string(), DEFAULT_FS_TYPE.to_string());
        parameters.insert("adminSecretNamespace".to_string(), namespace);
        parameters.insert("adminSecretName".to_string(), INIT_SECRET_NAME.to_string());
        INTREE_PROVISIONER_NAME
    };

    StorageClass {
        metadata: cluster_meta(&spec.storage_class_name),
        provisioner: provisioner.to_string(),
        parameters: Some(parameters),
        ..Default::default()
    }
}
