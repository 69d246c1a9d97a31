//! NautilusCluster Custom Resource Definition.
//!
//! A Nautilus cluster is a BookKeeper ensemble plus the Nautilus controller
//! and node tiers, coordinated through an external ZooKeeper.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::defaults::{
    DefaultingConfig, ImageDefaults, ImageSpec, WithDefaults, default_if_absent,
    default_if_empty, default_nested, default_options, enforce_minimum, resource_requirements,
    volume_claim_spec,
};
use super::status::ClusterStatus;

/// Default ZooKeeper connection string.
pub const DEFAULT_ZOOKEEPER_URI: &str = "zk-client:2181";

/// Default BookKeeper image.
pub const BOOKKEEPER_IMAGE: ImageDefaults = ImageDefaults {
    repository: "nautilus/bookkeeper",
    tag: "latest",
    pull_policy: "Always",
};

/// Minimum number of BookKeeper replicas accepted.
pub const MINIMUM_BOOKKEEPER_REPLICAS: i32 = 3;

pub const DEFAULT_BOOKKEEPER_REQUEST_CPU: &str = "500m";
pub const DEFAULT_BOOKKEEPER_REQUEST_MEMORY: &str = "1Gi";
pub const DEFAULT_BOOKKEEPER_LIMIT_CPU: &str = "1";
pub const DEFAULT_BOOKKEEPER_LIMIT_MEMORY: &str = "2Gi";

/// Default size of each BookKeeper volume (ledger, journal, index).
pub const DEFAULT_BOOKKEEPER_VOLUME_SIZE: &str = "10Gi";

/// Default Nautilus image, shared by the controller and node tiers.
pub const NAUTILUS_IMAGE: ImageDefaults = ImageDefaults {
    repository: "nautilus/nautilus",
    tag: "latest",
    pull_policy: "IfNotPresent",
};

pub const MINIMUM_CONTROLLER_REPLICAS: i32 = 1;
pub const MINIMUM_NODE_REPLICAS: i32 = 1;

pub const DEFAULT_CONTROLLER_REQUEST_CPU: &str = "250m";
pub const DEFAULT_CONTROLLER_REQUEST_MEMORY: &str = "512Mi";
pub const DEFAULT_CONTROLLER_LIMIT_CPU: &str = "500m";
pub const DEFAULT_CONTROLLER_LIMIT_MEMORY: &str = "1Gi";

pub const DEFAULT_NODE_REQUEST_CPU: &str = "500m";
pub const DEFAULT_NODE_REQUEST_MEMORY: &str = "1Gi";
pub const DEFAULT_NODE_LIMIT_CPU: &str = "1";
pub const DEFAULT_NODE_LIMIT_MEMORY: &str = "2Gi";

/// Default size of the node tier cache volume.
pub const DEFAULT_NODE_CACHE_VOLUME_SIZE: &str = "20Gi";

/// NautilusCluster is a custom resource for deploying Nautilus clusters.
///
/// Example:
/// ```yaml
/// apiVersion: nautilus.nautilus.io/v1alpha1
/// kind: NautilusCluster
/// metadata:
///   name: example
/// spec:
///   zookeeperUri: zk-client:2181
///   bookkeeper:
///     replicas: 3
///   nautilus:
///     controllerReplicas: 1
///     nodeReplicas: 3
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "nautilus.nautilus.io",
    version = "v1alpha1",
    kind = "NautilusCluster",
    plural = "nautilusclusters",
    shortname = "nc",
    status = "ClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.currentVersion"}"#,
    printcolumn = r#"{"name":"Desired Members", "type":"integer", "jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready Members", "type":"integer", "jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NautilusClusterSpec {
    /// ZooKeeper connection string (default: zk-client:2181).
    #[serde(default)]
    pub zookeeper_uri: String,

    /// BookKeeper configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookkeeper: Option<BookkeeperSpec>,

    /// Nautilus controller and node configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nautilus: Option<NautilusSpec>,
}

impl WithDefaults for NautilusClusterSpec {
    fn with_defaults(&mut self, config: &DefaultingConfig) -> bool {
        let mut changed = default_nested(&mut self.bookkeeper, config);
        changed |= default_nested(&mut self.nautilus, config);
        changed |= default_if_empty(&mut self.zookeeper_uri, DEFAULT_ZOOKEEPER_URI);
        changed
    }
}

impl NautilusClusterSpec {
    /// Total number of pods the cluster should run once defaulted.
    pub fn desired_replicas(&self) -> i32 {
        let bookies = self.bookkeeper.as_ref().map_or(0, |b| b.replicas);
        let nautilus = self
            .nautilus
            .as_ref()
            .map_or(0, |n| n.controller_replicas + n.node_replicas);
        bookies + nautilus
    }

    /// Version the cluster is expected to run, taken from the Nautilus image tag.
    pub fn target_version(&self) -> Option<&str> {
        self.nautilus
            .as_ref()
            .and_then(|n| n.image.as_ref())
            .map(|i| i.tag.as_str())
            .filter(|t| !t.is_empty())
    }
}

/// BookKeeper configuration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookkeeperSpec {
    /// BookKeeper image (default: nautilus/bookkeeper:latest).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSpec>,

    /// Number of bookies. Minimum 3, default 3.
    #[serde(default)]
    pub replicas: i32,

    /// Volumes used by each bookie.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<BookkeeperStorageSpec>,

    /// Whether BookKeeper auto recovery is enabled (default: true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_recovery: Option<bool>,

    /// Service account used by bookie pods.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_name: String,

    /// CPU and memory requests and limits of each bookie.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Overrides for bk_server.conf, exported as `BK_<key>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<BTreeMap<String, String>>,
}

impl WithDefaults for BookkeeperSpec {
    fn with_defaults(&mut self, config: &DefaultingConfig) -> bool {
        let mut changed = false;

        let image = self.image.get_or_insert_with(|| {
            changed = true;
            ImageSpec::default()
        });
        changed |= image.with_image_defaults(&BOOKKEEPER_IMAGE);

        changed |= enforce_minimum(&mut self.replicas, MINIMUM_BOOKKEEPER_REPLICAS, config);
        changed |= default_nested(&mut self.storage, config);
        changed |= default_if_absent(&mut self.auto_recovery, || true);
        changed |= default_if_absent(&mut self.resources, || {
            resource_requirements(
                DEFAULT_BOOKKEEPER_REQUEST_CPU,
                DEFAULT_BOOKKEEPER_REQUEST_MEMORY,
                DEFAULT_BOOKKEEPER_LIMIT_CPU,
                DEFAULT_BOOKKEEPER_LIMIT_MEMORY,
            )
        });
        changed |= default_options(&mut self.options);
        changed
    }
}

/// Volumes used by BookKeeper. Each template is optional and defaults to a
/// ReadWriteOnce claim of 10Gi.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookkeeperStorageSpec {
    /// PVC template for the ledger volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_volume_claim_template: Option<PersistentVolumeClaimSpec>,

    /// PVC template for the journal volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_volume_claim_template: Option<PersistentVolumeClaimSpec>,

    /// PVC template for the index volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_volume_claim_template: Option<PersistentVolumeClaimSpec>,
}

impl WithDefaults for BookkeeperStorageSpec {
    fn with_defaults(&mut self, _config: &DefaultingConfig) -> bool {
        let mut changed = default_if_absent(&mut self.ledger_volume_claim_template, || {
            volume_claim_spec(DEFAULT_BOOKKEEPER_VOLUME_SIZE)
        });
        changed |= default_if_absent(&mut self.journal_volume_claim_template, || {
            volume_claim_spec(DEFAULT_BOOKKEEPER_VOLUME_SIZE)
        });
        changed |= default_if_absent(&mut self.index_volume_claim_template, || {
            volume_claim_spec(DEFAULT_BOOKKEEPER_VOLUME_SIZE)
        });
        changed
    }
}

/// Nautilus controller and node configuration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NautilusSpec {
    /// Nautilus image (default: nautilus/nautilus:latest).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSpec>,

    /// Number of controller replicas (minimum 1).
    #[serde(default)]
    pub controller_replicas: i32,

    /// Number of node (segment store) replicas (minimum 1).
    #[serde(default)]
    pub node_replicas: i32,

    /// Service account used by controller pods.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub controller_service_account_name: String,

    /// Service account used by node pods.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_service_account_name: String,

    /// CPU and memory requests and limits of each controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_resources: Option<ResourceRequirements>,

    /// CPU and memory requests and limits of each node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_resources: Option<ResourceRequirements>,

    /// PVC template for the node cache volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_volume_claim_template: Option<PersistentVolumeClaimSpec>,

    /// Nautilus configuration overrides passed as JVM system properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<BTreeMap<String, String>>,
}

impl WithDefaults for NautilusSpec {
    fn with_defaults(&mut self, config: &DefaultingConfig) -> bool {
        let mut changed = false;

        let image = self.image.get_or_insert_with(|| {
            changed = true;
            ImageSpec::default()
        });
        changed |= image.with_image_defaults(&NAUTILUS_IMAGE);

        changed |= enforce_minimum(
            &mut self.controller_replicas,
            MINIMUM_CONTROLLER_REPLICAS,
            config,
        );
        changed |= enforce_minimum(&mut self.node_replicas, MINIMUM_NODE_REPLICAS, config);
        changed |= default_if_absent(&mut self.controller_resources, || {
            resource_requirements(
                DEFAULT_CONTROLLER_REQUEST_CPU,
                DEFAULT_CONTROLLER_REQUEST_MEMORY,
                DEFAULT_CONTROLLER_LIMIT_CPU,
                DEFAULT_CONTROLLER_LIMIT_MEMORY,
            )
        });
        changed |= default_if_absent(&mut self.node_resources, || {
            resource_requirements(
                DEFAULT_NODE_REQUEST_CPU,
                DEFAULT_NODE_REQUEST_MEMORY,
                DEFAULT_NODE_LIMIT_CPU,
                DEFAULT_NODE_LIMIT_MEMORY,
            )
        });
        changed |= default_if_absent(&mut self.cache_volume_claim_template, || {
            volume_claim_spec(DEFAULT_NODE_CACHE_VOLUME_SIZE)
        });
        changed |= default_options(&mut self.options);
        changed
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn defaulted() -> NautilusClusterSpec {
        let mut spec = NautilusClusterSpec::default();
        spec.with_defaults(&DefaultingConfig::default());
        spec
    }

    #[test]
    fn test_empty_spec_is_fully_defaulted() {
        let mut spec = NautilusClusterSpec::default();
        assert!(spec.with_defaults(&DefaultingConfig::default()));

        assert_eq!(spec.zookeeper_uri, "zk-client:2181");

        let bk = spec.bookkeeper.as_ref().unwrap();
        assert_eq!(
            bk.image.as_ref().unwrap().image_ref(),
            "nautilus/bookkeeper:latest"
        );
        assert_eq!(bk.image.as_ref().unwrap().pull_policy, "Always");
        assert_eq!(bk.replicas, 3);
        assert_eq!(bk.auto_recovery, Some(true));
        assert_eq!(bk.options, Some(BTreeMap::new()));

        let storage = bk.storage.as_ref().unwrap();
        for template in [
            &storage.ledger_volume_claim_template,
            &storage.journal_volume_claim_template,
            &storage.index_volume_claim_template,
        ] {
            let template = template.as_ref().unwrap();
            assert_eq!(template.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
            let requests = template.resources.as_ref().unwrap().requests.as_ref().unwrap();
            assert_eq!(requests["storage"], Quantity("10Gi".to_string()));
        }

        let nautilus = spec.nautilus.as_ref().unwrap();
        assert_eq!(nautilus.controller_replicas, 1);
        assert_eq!(nautilus.node_replicas, 1);
        assert_eq!(
            nautilus.image.as_ref().unwrap().image_ref(),
            "nautilus/nautilus:latest"
        );
    }

    #[test]
    fn test_defaulting_is_idempotent() {
        let mut spec = defaulted();
        let snapshot = spec.clone();
        assert!(!spec.with_defaults(&DefaultingConfig::default()));
        assert_eq!(spec, snapshot);
    }

    #[test]
    fn test_bookkeeper_minimum_replicas_enforced() {
        let mut bk = BookkeeperSpec::default();
        bk.with_defaults(&DefaultingConfig::default());
        bk.replicas = 1;

        // Everything else is already defaulted, so the clamp alone flags the change
        assert!(bk.with_defaults(&DefaultingConfig::default()));
        assert_eq!(bk.replicas, 3);
    }

    #[test]
    fn test_bookkeeper_minimum_not_enforced_in_test_mode() {
        let mut bk = BookkeeperSpec {
            replicas: 1,
            ..Default::default()
        };
        bk.with_defaults(&DefaultingConfig::test_mode());
        assert_eq!(bk.replicas, 1);
        assert!(!bk.with_defaults(&DefaultingConfig::test_mode()));
    }

    #[test]
    fn test_custom_resources_are_kept() {
        let custom = resource_requirements("2", "4Gi", "4", "6Gi");
        let mut spec = NautilusClusterSpec {
            bookkeeper: Some(BookkeeperSpec {
                resources: Some(custom.clone()),
                ..Default::default()
            }),
            nautilus: Some(NautilusSpec {
                controller_resources: Some(custom.clone()),
                node_resources: Some(custom.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };
        spec.with_defaults(&DefaultingConfig::default());

        assert_eq!(spec.bookkeeper.unwrap().resources, Some(custom.clone()));
        let nautilus = spec.nautilus.unwrap();
        assert_eq!(nautilus.controller_resources, Some(custom.clone()));
        assert_eq!(nautilus.node_resources, Some(custom));
    }

    #[test]
    fn test_default_component_resources() {
        let spec = defaulted();
        let controller = spec
            .nautilus
            .as_ref()
            .unwrap()
            .controller_resources
            .clone()
            .unwrap();
        assert_eq!(
            controller.requests.unwrap()["cpu"],
            Quantity("250m".to_string())
        );
        assert_eq!(
            controller.limits.unwrap()["memory"],
            Quantity("1Gi".to_string())
        );

        let bookie = spec.bookkeeper.unwrap().resources.unwrap();
        assert_eq!(bookie.requests.unwrap()["memory"], Quantity("1Gi".to_string()));
        assert_eq!(bookie.limits.unwrap()["cpu"], Quantity("1".to_string()));
    }

    #[test]
    fn test_partial_storage_only_fills_missing_templates() {
        let ledger = volume_claim_spec("100Gi");
        let mut storage = BookkeeperStorageSpec {
            ledger_volume_claim_template: Some(ledger.clone()),
            ..Default::default()
        };
        assert!(storage.with_defaults(&DefaultingConfig::default()));
        assert_eq!(storage.ledger_volume_claim_template, Some(ledger));
        assert!(storage.journal_volume_claim_template.is_some());
        assert!(storage.index_volume_claim_template.is_some());
    }

    #[test]
    fn test_desired_replicas_and_target_version() {
        let spec = defaulted();
        assert_eq!(spec.desired_replicas(), 5);
        assert_eq!(spec.target_version(), Some("latest"));
        assert_eq!(NautilusClusterSpec::default().target_version(), None);
    }

    #[test]
    fn test_spec_deserializes_with_absent_sections() {
        let spec: NautilusClusterSpec =
            serde_json::from_str(r#"{"bookkeeper":{"replicas":5}}"#).unwrap();
        assert_eq!(spec.bookkeeper.as_ref().unwrap().replicas, 5);
        assert!(spec.bookkeeper.as_ref().unwrap().image.is_none());
        assert!(spec.nautilus.is_none());
        assert!(spec.zookeeper_uri.is_empty());
    }
}
