// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for nautilus-operator.
//!
//! These tests run without a Kubernetes cluster and exercise the public API:
//! defaulting, condition tracking, validation, status computation, resource
//! generation and admission policies.

#[path = "../common/mod.rs"]
mod common;

use std::cell::Cell;

use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use nautilus_operator::controller::status::Clock;

/// Clock that advances one second on every read.
struct SteppingClock {
    seconds: Cell<u32>,
}

impl SteppingClock {
    fn new() -> Self {
        Self {
            seconds: Cell::new(0),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> String {
        let s = self.seconds.get() + 1;
        self.seconds.set(s);
        format!("2024-01-01T00:00:{:02}Z", s % 60)
    }
}

fn pod(name: &str, ready: bool) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

mod defaults_tests {
    use super::common::*;
    use nautilus_operator::crd::{
        DEFAULT_ZOOKEEPER_URI, DefaultingConfig, EcsClusterSpec, WithDefaults,
    };

    #[test]
    fn test_minimal_cluster_is_defaulted() {
        let mut cluster = minimal_nautilus("example");
        assert!(cluster.spec.with_defaults(&DefaultingConfig::default()));

        assert_eq!(cluster.spec.zookeeper_uri, DEFAULT_ZOOKEEPER_URI);
        assert_eq!(cluster.spec.bookkeeper.as_ref().unwrap().replicas, 3);
        let nautilus = cluster.spec.nautilus.as_ref().unwrap();
        assert_eq!(nautilus.controller_replicas, 1);
        assert_eq!(nautilus.node_replicas, 1);
        assert_eq!(cluster.spec.desired_replicas(), 5);
    }

    #[test]
    fn test_user_values_survive_defaulting() {
        let mut cluster = NautilusClusterBuilder::new("example")
            .zookeeper_uri("zk-0.zk:2181")
            .bookies(5)
            .nodes(4)
            .version("0.9.0")
            .bookkeeper_option("journalMaxSizeMB", "2048")
            .build();
        cluster.spec.with_defaults(&DefaultingConfig::default());

        assert_eq!(cluster.spec.zookeeper_uri, "zk-0.zk:2181");
        let bk = cluster.spec.bookkeeper.as_ref().unwrap();
        assert_eq!(bk.replicas, 5);
        assert_eq!(
            bk.options.as_ref().unwrap()["journalMaxSizeMB"],
            "2048".to_string()
        );
        let nautilus = cluster.spec.nautilus.as_ref().unwrap();
        assert_eq!(nautilus.node_replicas, 4);
        assert_eq!(
            nautilus.image.as_ref().unwrap().image_ref(),
            "nautilus/nautilus:0.9.0"
        );
        assert_eq!(cluster.spec.target_version(), Some("0.9.0"));
    }

    #[test]
    fn test_second_pass_reports_no_change() {
        let mut cluster = NautilusClusterBuilder::new("example").bookies(1).build();
        assert!(cluster.spec.with_defaults(&DefaultingConfig::default()));
        assert!(!cluster.spec.with_defaults(&DefaultingConfig::default()));
    }

    #[test]
    fn test_minimum_bookies_enforced_outside_test_mode() {
        let mut cluster = NautilusClusterBuilder::new("example").bookies(1).build();
        cluster.spec.with_defaults(&DefaultingConfig::default());
        assert_eq!(cluster.spec.bookkeeper.unwrap().replicas, 3);

        let mut cluster = NautilusClusterBuilder::new("example").bookies(1).build();
        cluster.spec.with_defaults(&DefaultingConfig::test_mode());
        assert_eq!(cluster.spec.bookkeeper.unwrap().replicas, 1);
    }

    #[test]
    fn test_ecs_spec_defaults() {
        let mut spec = EcsClusterSpec::default();
        assert!(spec.with_defaults(&DefaultingConfig::default()));
        assert_eq!(spec.namespace, "ecs");
        assert_eq!(spec.storage_class_name, "fast");
        assert_eq!(spec.csi.deployment_strategy, "statefulset");
        assert_eq!(spec.service.name, "ecs");
        assert_eq!(spec.service.r#type, "ClusterIP");
        assert_eq!(spec.service.external_port, 5705);
        assert_eq!(spec.service.internal_port, 5705);
        assert!(!spec.images.node_container.is_empty());
        assert!(!spec.with_defaults(&DefaultingConfig::default()));
    }

    #[test]
    fn test_ecs_user_namespace_kept() {
        let mut cluster = EcsClusterBuilder::new("example-ecs")
            .resource_namespace("storage")
            .build();
        cluster.spec.with_defaults(&DefaultingConfig::default());
        assert_eq!(cluster.spec.namespace, "storage");
        assert_eq!(cluster.spec.resource_namespace(), "storage");
    }
}

mod condition_tests {
    use super::SteppingClock;
    use nautilus_operator::controller::status::{
        get_condition_reason, is_condition_true, upsert_condition,
    };
    use nautilus_operator::crd::{
        ClusterCondition, ClusterConditionType, ClusterStatus, ConditionStatus,
    };

    #[test]
    fn test_first_condition_is_appended_verbatim() {
        let clock = SteppingClock::new();
        let mut conditions = Vec::new();
        let condition = ClusterCondition::new(
            ClusterConditionType::PodsReady,
            ConditionStatus::False,
            "Waiting",
            "0/3 ready",
        );
        assert!(upsert_condition(&mut conditions, condition.clone(), &clock));
        assert_eq!(conditions, vec![condition]);
    }

    #[test]
    fn test_identical_condition_is_a_no_op() {
        let clock = SteppingClock::new();
        let mut status = ClusterStatus::default();
        status.set_pods_ready_condition_true(&clock);
        status.set_pods_ready_condition_false(&clock);
        let snapshot = status.clone();

        assert!(!status.set_pods_ready_condition_false(&clock));
        assert_eq!(status, snapshot);
    }

    #[test]
    fn test_status_change_moves_both_timestamps() {
        let clock = SteppingClock::new();
        let mut status = ClusterStatus::default();
        status.set_pods_ready_condition_false(&clock);
        assert!(status.set_pods_ready_condition_true(&clock));

        let (_, condition) = status.get_condition(ClusterConditionType::PodsReady).unwrap();
        assert_eq!(condition.status, ConditionStatus::True);
        assert!(!condition.last_transition_time.is_empty());
        assert_eq!(condition.last_transition_time, condition.last_update_time);
    }

    #[test]
    fn test_reason_change_only_moves_update_time() {
        let clock = SteppingClock::new();
        let mut status = ClusterStatus::default();
        status.set_pods_ready_condition_true(&clock);
        status.set_pods_ready_condition_false(&clock);
        let transition = status.conditions[0].last_transition_time.clone();

        assert!(status.set_condition(
            ClusterCondition::new(
                ClusterConditionType::PodsReady,
                ConditionStatus::False,
                "Waiting",
                "1/3 ready",
            ),
            &clock,
        ));

        let condition = &status.conditions[0];
        assert_eq!(condition.last_transition_time, transition);
        assert_ne!(condition.last_update_time, transition);
        assert_eq!(condition.reason, "Waiting");
        assert_eq!(condition.message, "1/3 ready");
    }

    #[test]
    fn test_one_entry_per_type() {
        let clock = SteppingClock::new();
        let mut status = ClusterStatus::default();
        status.set_pods_ready_condition_false(&clock);
        status.set_condition_true(ClusterConditionType::Upgrading, &clock);
        status.set_pods_ready_condition_true(&clock);
        status.set_condition_false(ClusterConditionType::Upgrading, &clock);

        assert_eq!(status.conditions.len(), 2);
        assert_eq!(
            status.get_condition(ClusterConditionType::Upgrading).unwrap().0,
            1
        );
        assert!(is_condition_true(
            &status.conditions,
            ClusterConditionType::PodsReady
        ));
        assert!(!is_condition_true(
            &status.conditions,
            ClusterConditionType::Upgrading
        ));
    }

    #[test]
    fn test_missing_condition_lookups() {
        let status = ClusterStatus::default();
        assert!(status.get_condition(ClusterConditionType::PodsReady).is_none());
        assert!(!is_condition_true(
            &status.conditions,
            ClusterConditionType::PodsReady
        ));
        assert_eq!(
            get_condition_reason(&status.conditions, ClusterConditionType::PodsReady),
            None
        );
    }
}

mod validation_tests {
    use super::common::*;
    use nautilus_operator::controller::validation::{
        ValidationError, validate_ecs_spec, validate_nautilus_spec,
    };

    #[test]
    fn test_exists_toleration_with_value_rejected() {
        let cluster = EcsClusterBuilder::new("example-ecs")
            .toleration("node-role", "Exists", "master")
            .build();
        let err = validate_ecs_spec(&cluster.spec).unwrap_err();
        assert_eq!(
            err,
            ValidationError::TolerationValue {
                key: "node-role".to_string()
            }
        );
        assert_eq!(
            err.to_string(),
            "key(node-role): toleration value must be empty when `operator` is 'Exists'"
        );
    }

    #[test]
    fn test_equal_toleration_accepted() {
        let cluster = EcsClusterBuilder::new("example-ecs")
            .toleration("node-role", "Equal", "storage")
            .toleration("dedicated", "Exists", "")
            .build();
        assert!(validate_ecs_spec(&cluster.spec).is_ok());
    }

    #[test]
    fn test_replica_bounds() {
        let cluster = NautilusClusterBuilder::new("example").bookies(101).build();
        assert!(matches!(
            validate_nautilus_spec(&cluster.spec),
            Err(ValidationError::ReplicasOutOfRange { value: 101, .. })
        ));

        let cluster = NautilusClusterBuilder::new("example").nodes(-1).build();
        assert!(validate_nautilus_spec(&cluster.spec).is_err());

        let cluster = NautilusClusterBuilder::new("example")
            .bookies(3)
            .nodes(3)
            .controllers(2)
            .build();
        assert!(validate_nautilus_spec(&cluster.spec).is_ok());
    }
}

mod nautilus_status_tests {
    use super::common::*;
    use super::{SteppingClock, pod};
    use nautilus_operator::controller::common::status_patch;
    use nautilus_operator::controller::nautilus_reconciler::compute_status;
    use nautilus_operator::controller::status::{get_condition_reason, is_condition_true};
    use nautilus_operator::crd::{
        ClusterConditionType, ClusterStatus, DefaultingConfig, NautilusCluster, WithDefaults,
    };

    /// Defaulted cluster with 3 bookies, 1 controller and 1 node.
    fn cluster(version: &str) -> NautilusCluster {
        let mut cluster = NautilusClusterBuilder::new("example")
            .namespace("default")
            .generation(2)
            .version(version)
            .build();
        cluster.spec.with_defaults(&DefaultingConfig::default());
        cluster
    }

    #[test]
    fn test_all_pods_ready() {
        let clock = SteppingClock::new();
        let pods: Vec<_> = (0..5).map(|i| pod(&format!("p{i}"), true)).collect();
        let status = compute_status(&cluster("0.9.0"), &pods, &clock);

        assert_eq!(status.replicas, 5);
        assert_eq!(status.ready_replicas, 5);
        assert_eq!(status.current_replicas, 5);
        assert_eq!(status.members.ready.len(), 5);
        assert_eq!(status.observed_generation, Some(2));
        assert_eq!(status.current_version, "0.9.0");
        assert!(status.target_version.is_empty());
        assert!(is_condition_true(
            &status.conditions,
            ClusterConditionType::PodsReady
        ));
    }

    #[test]
    fn test_partial_readiness() {
        let clock = SteppingClock::new();
        let pods = vec![pod("p0", true), pod("p1", false)];
        let status = compute_status(&cluster("0.9.0"), &pods, &clock);

        assert_eq!(status.ready_replicas, 1);
        assert_eq!(status.current_replicas, 2);
        assert_eq!(status.members.unready, vec!["p1".to_string()]);
        assert!(!is_condition_true(
            &status.conditions,
            ClusterConditionType::PodsReady
        ));
        assert!(status.current_version.is_empty());
    }

    #[test]
    fn test_version_change_marks_upgrading() {
        let clock = SteppingClock::new();
        let mut cluster = cluster("0.10.0");
        cluster.status = Some(ClusterStatus {
            current_version: "0.9.0".to_string(),
            ..Default::default()
        });

        let status = compute_status(&cluster, &[pod("p0", false)], &clock);
        assert_eq!(status.current_version, "0.9.0");
        assert_eq!(status.target_version, "0.10.0");
        assert!(is_condition_true(
            &status.conditions,
            ClusterConditionType::Upgrading
        ));
        assert_eq!(
            get_condition_reason(&status.conditions, ClusterConditionType::Upgrading),
            Some("UpgradeInProgress")
        );
    }

    #[test]
    fn test_recomputing_unchanged_state_keeps_status() {
        let clock = SteppingClock::new();
        let mut cluster = cluster("0.9.0");
        let pods = vec![pod("p0", true), pod("p1", false)];
        let first = compute_status(&cluster, &pods, &clock);
        cluster.status = Some(first.clone());

        let second = compute_status(&cluster, &pods, &clock);
        assert_eq!(first, second);
    }

    /// Apply a JSON merge patch the way the API server does.
    fn merge(target: &mut serde_json::Value, patch: &serde_json::Value) {
        let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) else {
            *target = patch.clone();
            return;
        };
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else if value.is_object() {
                merge(
                    target
                        .entry(key.clone())
                        .or_insert_with(|| serde_json::json!({})),
                    value,
                );
            } else {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    #[test]
    fn test_finished_upgrade_clears_stored_target_version() {
        let clock = SteppingClock::new();
        let mut stored = serde_json::json!({
            "status": {
                "conditions": [{
                    "type": "Upgrading",
                    "status": "True",
                    "reason": "UpgradeInProgress",
                    "message": "Upgrading to 0.10.0"
                }],
                "currentVersion": "0.9.0",
                "targetVersion": "0.10.0",
                "replicas": 5,
                "currentReplicas": 5,
                "readyReplicas": 2,
                "observedGeneration": 2
            }
        });
        let mut cluster = cluster("0.10.0");
        cluster.status = Some(serde_json::from_value(stored["status"].clone()).unwrap());

        let pods: Vec<_> = (0..5).map(|i| pod(&format!("p{i}"), true)).collect();
        let status = compute_status(&cluster, &pods, &clock);
        assert!(status.target_version.is_empty());

        merge(&mut stored, &status_patch(&status).unwrap());
        assert!(stored["status"].get("targetVersion").is_none());

        let persisted: ClusterStatus = serde_json::from_value(stored["status"].clone()).unwrap();
        assert_eq!(persisted, status);
        assert_eq!(persisted.current_version, "0.10.0");
        assert!(!is_condition_true(
            &persisted.conditions,
            ClusterConditionType::Upgrading
        ));
    }

    #[test]
    fn test_patch_without_generation_clears_stored_generation() {
        let mut stored = serde_json::json!({
            "status": { "replicas": 5, "observedGeneration": 4 }
        });
        let status = ClusterStatus {
            replicas: 5,
            ..Default::default()
        };

        merge(&mut stored, &status_patch(&status).unwrap());
        let persisted: ClusterStatus = serde_json::from_value(stored["status"].clone()).unwrap();
        assert_eq!(persisted, status);
    }
}

mod ecs_status_tests {
    use super::common::*;
    use super::{SteppingClock, pod};
    use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetStatus};
    use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeStatus};
    use nautilus_operator::controller::ecs_reconciler::{compute_status, join_from_nodes};
    use nautilus_operator::controller::status::is_condition_true;
    use nautilus_operator::crd::ClusterConditionType;

    fn node(internal_ip: &str) -> Node {
        Node {
            status: Some(NodeStatus {
                addresses: Some(vec![
                    NodeAddress {
                        type_: "Hostname".to_string(),
                        address: "worker".to_string(),
                    },
                    NodeAddress {
                        type_: "InternalIP".to_string(),
                        address: internal_ip.to_string(),
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn daemonset(desired: i32, ready: i32) -> DaemonSet {
        DaemonSet {
            status: Some(DaemonSetStatus {
                desired_number_scheduled: desired,
                current_number_scheduled: desired,
                number_ready: ready,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_join_uses_internal_ips_in_order() {
        let nodes = vec![node("10.0.0.2"), Node::default(), node("10.0.0.1")];
        assert_eq!(join_from_nodes(&nodes), "10.0.0.2,10.0.0.1");
        assert_eq!(join_from_nodes(&[]), "");
    }

    #[test]
    fn test_status_follows_daemonset() {
        let clock = SteppingClock::new();
        let cluster = test_ecs("example-ecs", "default");

        let ds = daemonset(3, 2);
        let pods = vec![pod("a", true), pod("b", true), pod("c", false)];
        let status = compute_status(&cluster, Some(&ds), &pods, &clock);
        assert_eq!(status.replicas, 3);
        assert_eq!(status.ready_replicas, 2);
        assert_eq!(status.members.ready, vec!["a".to_string(), "b".to_string()]);
        assert!(!is_condition_true(
            &status.conditions,
            ClusterConditionType::PodsReady
        ));

        let ds = daemonset(3, 3);
        let status = compute_status(&cluster, Some(&ds), &pods, &clock);
        assert!(is_condition_true(
            &status.conditions,
            ClusterConditionType::PodsReady
        ));
    }

    #[test]
    fn test_missing_daemonset_is_not_ready() {
        let clock = SteppingClock::new();
        let cluster = test_ecs("example-ecs", "default");
        let status = compute_status(&cluster, None, &[], &clock);
        assert_eq!(status.replicas, 0);
        assert!(!is_condition_true(
            &status.conditions,
            ClusterConditionType::PodsReady
        ));
    }
}

mod nautilus_resource_tests {
    use super::common::*;
    use nautilus_operator::crd::{DefaultingConfig, NautilusCluster, WithDefaults};
    use nautilus_operator::resources::{bookie, nautilus_controller, nautilus_node};

    fn cluster() -> NautilusCluster {
        let mut cluster = test_nautilus("example", "streaming");
        cluster.spec.with_defaults(&DefaultingConfig::default());
        cluster
    }

    #[test]
    fn test_bookie_objects() {
        let cluster = cluster();
        let bk = cluster.spec.bookkeeper.clone().unwrap();

        let sts = bookie::generate_statefulset(&cluster, &bk);
        assert_eq!(sts.metadata.name.as_deref(), Some("example-bookie"));
        assert_eq!(sts.metadata.namespace.as_deref(), Some("streaming"));
        let owner = &sts.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "NautilusCluster");
        assert_eq!(owner.uid, "test-uid-example");
        assert_eq!(sts.spec.as_ref().unwrap().replicas, Some(3));

        let svc = bookie::generate_headless_service(&cluster);
        assert_eq!(svc.metadata.name.as_deref(), Some("example-bookie-headless"));
        assert_eq!(
            svc.spec.unwrap().cluster_ip.as_deref(),
            Some("None")
        );

        let pdb = bookie::generate_pod_disruption_budget(&cluster);
        assert_eq!(pdb.metadata.name.as_deref(), Some("example-bookie"));
    }

    #[test]
    fn test_controller_objects() {
        let cluster = cluster();
        let nautilus = cluster.spec.nautilus.clone().unwrap();

        let deployment = nautilus_controller::generate_deployment(&cluster, &nautilus);
        assert_eq!(
            deployment.metadata.name.as_deref(),
            Some("example-nautilus-controller")
        );
        assert_eq!(deployment.spec.unwrap().replicas, Some(1));
        assert_eq!(
            nautilus_controller::controller_url(&cluster),
            "tcp://example-nautilus-controller.streaming:9090"
        );
    }

    #[test]
    fn test_node_objects() {
        let cluster = cluster();
        let nautilus = cluster.spec.nautilus.clone().unwrap();

        let sts = nautilus_node::generate_statefulset(&cluster, &nautilus);
        assert_eq!(sts.metadata.name.as_deref(), Some("example-nautilus-node"));
        let spec = sts.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(
            spec.service_name.as_deref(),
            Some("example-nautilus-node-headless")
        );
    }

    #[test]
    fn test_jvm_options_sorted_by_key() {
        let cluster = NautilusClusterBuilder::new("example")
            .bookkeeper_option("b", "2")
            .bookkeeper_option("a", "1")
            .build();
        let options = cluster.spec.bookkeeper.unwrap().options;
        assert_eq!(
            nautilus_controller::jvm_system_properties(options.as_ref()),
            "-Da=1 -Db=2"
        );
        assert_eq!(nautilus_controller::jvm_system_properties(None), "");
    }
}

mod ecs_resource_tests {
    use super::common::*;
    use nautilus_operator::controller::validation::ValidationError;
    use nautilus_operator::crd::{DefaultingConfig, EcsCluster, WithDefaults};
    use nautilus_operator::resources::ecs::{
        self, ClusterFeatures, INTREE_PROVISIONER_NAME, storage_class, workloads,
    };

    fn defaulted(mut cluster: EcsCluster) -> EcsCluster {
        cluster.spec.with_defaults(&DefaultingConfig::default());
        cluster
    }

    fn csi_v1() -> ClusterFeatures {
        ClusterFeatures::from_version("v1.14.1")
    }

    #[test]
    fn test_objects_land_in_resource_namespace() {
        let cluster = defaulted(test_ecs("example-ecs", "default"));
        let ds = workloads::generate_daemonset(&cluster, csi_v1(), "10.0.0.1").unwrap();
        assert_eq!(ds.metadata.name.as_deref(), Some("ecs-daemonset"));
        assert_eq!(ds.metadata.namespace.as_deref(), Some("ecs"));
        // Cross-namespace owners are rejected by the API server
        assert!(ds.metadata.owner_references.is_none());

        let ns = ecs::generate_namespace(&cluster);
        assert_eq!(ns.metadata.name.as_deref(), Some("ecs"));
    }

    #[test]
    fn test_same_namespace_objects_are_owned() {
        let cluster = defaulted(
            EcsClusterBuilder::new("example-ecs")
                .namespace("storage")
                .resource_namespace("storage")
                .uid("uid-7")
                .build(),
        );
        let ds = workloads::generate_daemonset(&cluster, csi_v1(), "10.0.0.1").unwrap();
        let owner = &ds.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.kind, "EcsCluster");
        assert_eq!(owner.uid, "uid-7");
    }

    #[test]
    fn test_daemonset_carries_join() {
        let cluster = defaulted(test_ecs("example-ecs", "default"));
        let ds = workloads::generate_daemonset(&cluster, csi_v1(), "10.0.0.1,10.0.0.2").unwrap();
        let pod = ds.spec.unwrap().template.spec.unwrap();
        let env = pod.containers[0].env.clone().unwrap();
        let join = env.iter().find(|e| e.name == "JOIN").unwrap();
        assert_eq!(join.value.as_deref(), Some("10.0.0.1,10.0.0.2"));
    }

    #[test]
    fn test_daemonset_rejects_invalid_toleration() {
        let cluster = defaulted(
            EcsClusterBuilder::new("example-ecs")
                .namespace("default")
                .toleration("key1", "Exists", "value1")
                .build(),
        );
        let err = workloads::generate_daemonset(&cluster, csi_v1(), "10.0.0.1").unwrap_err();
        assert!(matches!(err, ValidationError::TolerationValue { .. }));
    }

    #[test]
    fn test_csi_adds_driver_registrar() {
        let cluster = defaulted(
            EcsClusterBuilder::new("example-ecs")
                .namespace("default")
                .csi()
                .build(),
        );
        let ds = workloads::generate_daemonset(&cluster, csi_v1(), "10.0.0.1").unwrap();
        let containers = ds.spec.unwrap().template.spec.unwrap().containers;
        let names: Vec<_> = containers.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"csi-driver-registrar"));
        assert!(names.contains(&"csi-liveness-probe"));
    }

    #[test]
    fn test_storage_class_provisioner() {
        let cluster = defaulted(test_ecs("example-ecs", "default"));
        let sc = storage_class::generate_storage_class(&cluster, csi_v1());
        assert_eq!(sc.metadata.name.as_deref(), Some("fast"));
        assert_eq!(sc.provisioner, INTREE_PROVISIONER_NAME);

        let cluster = defaulted(
            EcsClusterBuilder::new("example-ecs")
                .namespace("default")
                .csi()
                .build(),
        );
        let sc = storage_class::generate_storage_class(&cluster, csi_v1());
        assert_eq!(sc.provisioner, ecs::CSI_PROVISIONER_NAME);
        let params = sc.parameters.unwrap();
        assert_eq!(
            params["csi.storage.k8s.io/provisioner-secret-name"],
            ecs::CSI_PROVISIONER_SECRET_NAME
        );
        assert_eq!(params["csi.storage.k8s.io/provisioner-secret-namespace"], "ecs");
    }
}

mod version_tests {
    use nautilus_operator::resources::ecs::{ClusterFeatures, version_supported};

    #[test]
    fn test_version_comparison() {
        assert!(version_supported("v1.13.0", "1.13.0"));
        assert!(version_supported("1.20.4", "1.13.0"));
        assert!(!version_supported("v1.12.9", "1.13.0"));
        assert!(!version_supported("garbage", "1.13.0"));
    }

    #[test]
    fn test_features_by_version() {
        let old = ClusterFeatures::from_version("v1.11.0");
        assert!(!old.csi_v1);
        assert!(!old.kubelet_plugins_watcher);

        let new = ClusterFeatures::from_version("v1.13.1");
        assert!(new.csi_v1);
        assert!(new.kubelet_plugins_watcher);
    }
}

mod webhook_tests {
    use super::common::*;
    use nautilus_operator::webhooks::ValidationContext;
    use nautilus_operator::webhooks::policies::{validate_ecs_cluster, validate_nautilus_cluster};

    #[test]
    fn test_valid_nautilus_create_allowed() {
        let cluster = test_nautilus("example", "default");
        let ctx = ValidationContext {
            resource: &cluster,
            old_resource: None,
            dry_run: false,
            namespace: Some("default"),
        };
        assert!(validate_nautilus_cluster(&ctx).allowed);
    }

    #[test]
    fn test_out_of_range_bookies_denied() {
        let cluster = NautilusClusterBuilder::new("example").bookies(500).build();
        let ctx = ValidationContext {
            resource: &cluster,
            old_resource: None,
            dry_run: false,
            namespace: None,
        };
        let result = validate_nautilus_cluster(&ctx);
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("InvalidReplicas"));
    }

    #[test]
    fn test_zookeeper_uri_immutable_on_update() {
        let old = NautilusClusterBuilder::new("example")
            .zookeeper_uri("zk-a:2181")
            .build();
        let new = NautilusClusterBuilder::new("example")
            .zookeeper_uri("zk-b:2181")
            .build();
        let ctx = ValidationContext {
            resource: &new,
            old_resource: Some(&old),
            dry_run: false,
            namespace: None,
        };
        let result = validate_nautilus_cluster(&ctx);
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("ImmutableField"));
    }

    #[test]
    fn test_ecs_toleration_denied() {
        let cluster = EcsClusterBuilder::new("example-ecs")
            .toleration("key", "Exists", "value")
            .build();
        let ctx = ValidationContext {
            resource: &cluster,
            old_resource: None,
            dry_run: true,
            namespace: None,
        };
        let result = validate_ecs_cluster(&ctx);
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("InvalidToleration"));
    }

    #[test]
    fn test_ecs_namespace_immutable_on_update() {
        let old = EcsClusterBuilder::new("example-ecs")
            .resource_namespace("ecs")
            .build();
        let new = EcsClusterBuilder::new("example-ecs")
            .resource_namespace("storage")
            .build();
        let ctx = ValidationContext {
            resource: &new,
            old_resource: Some(&old),
            dry_run: false,
            namespace: None,
        };
        assert!(!validate_ecs_cluster(&ctx).allowed);
    }
}

mod config_tests {
    use std::collections::HashMap;

    use nautilus_operator::OperatorConfig;
    use nautilus_operator::config::DEFAULT_HEALTH_PORT;

    #[test]
    fn test_config_from_lookup() {
        let vars = HashMap::from([
            ("WATCH_NAMESPACE", "streaming"),
            ("NAUTILUS_TEST_MODE", "yes"),
        ]);
        let cfg = OperatorConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.watch_namespace.as_deref(), Some("streaming"));
        assert!(cfg.test_mode);
        assert_eq!(cfg.health_port, DEFAULT_HEALTH_PORT);
        assert!(!cfg.defaulting().enforce_minimum_replicas);
    }
}

mod health_tests {
    use nautilus_operator::HealthState;

    #[tokio::test]
    async fn test_ready_flag() {
        let state = HealthState::new();
        assert!(!state.is_ready().await);
        state.set_ready(true).await;
        assert!(state.is_ready().await);
    }

    #[test]
    fn test_cluster_metrics_removed() {
        let state = HealthState::new();
        state
            .metrics
            .set_cluster_state("NautilusCluster", "default", "example", 5, 3);
        let encoded = state.metrics.encode();
        assert!(encoded.contains(
            "nautilus_operator_cluster_replicas_ready{kind=\"NautilusCluster\",namespace=\"default\",name=\"example\"} 3"
        ));

        state
            .metrics
            .remove_cluster("NautilusCluster", "default", "example");
        assert!(!state.metrics.encode().contains("name=\"example\""));
    }
}
