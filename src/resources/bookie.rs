//! BookKeeper ensemble resources.
//!
//! Each bookie runs in a StatefulSet pod with three volumes (journal, ledgers,
//! index). The ensemble is reached through a headless service and protected by
//! a PodDisruptionBudget allowing one bookie down at a time.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, Container, ContainerPort, EnvFromSource, PersistentVolumeClaim,
    PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec, VolumeMount,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::{BookkeeperSpec, NautilusCluster};
use crate::resources::common::{
    exec_probe, health_check_command, nautilus_labels, owned_meta, owner_reference,
    pod_anti_affinity,
};

/// Component label value for bookies.
pub const COMPONENT: &str = "bookie";

/// BookKeeper client port
pub const BOOKIE_PORT: i32 = 3181;

const LEDGER_DISK_NAME: &str = "ledger";
const JOURNAL_DISK_NAME: &str = "journal";
const INDEX_DISK_NAME: &str = "index";

const MEMORY_OPTS: &[&str] = &[
    "-Xms1g",
    "-XX:+UnlockExperimentalVMOptions",
    "-XX:+UseCGroupMemoryLimitForHeap",
    "-XX:MaxRAMFraction=2",
    "-XX:MaxDirectMemorySize=1g",
    "-XX:+ExitOnOutOfMemoryError",
    "-XX:+CrashOnOutOfMemoryError",
    "-XX:+HeapDumpOnOutOfMemoryError",
];

const GC_OPTS: &[&str] = &[
    "-XX:+UseG1GC",
    "-XX:MaxGCPauseMillis=10",
    "-XX:+ParallelRefProcEnabled",
    "-XX:+AggressiveOpts",
    "-XX:+DoEscapeAnalysis",
    "-XX:ParallelGCThreads=32",
    "-XX:ConcGCThreads=32",
    "-XX:G1NewSizePercent=50",
    "-XX:+DisableExplicitGC",
    "-XX:-ResizePLAB",
];

const GC_LOGGING_OPTS: &[&str] = &[
    "-XX:+PrintGCDetails",
    "-XX:+PrintGCDateStamps",
    "-XX:+PrintGCApplicationStoppedTime",
    "-XX:+UseGCLogFileRotation",
    "-XX:NumberOfGCLogFiles=5",
    "-XX:GCLogFileSize=64m",
];

pub fn statefulset_name(cluster: &NautilusCluster) -> String {
    format!("{}-bookie", cluster.name_any())
}

pub fn headless_service_name(cluster: &NautilusCluster) -> String {
    format!("{}-bookie-headless", cluster.name_any())
}

pub fn configmap_name(cluster: &NautilusCluster) -> String {
    format!("{}-bookie-configmap", cluster.name_any())
}

pub fn pdb_name(cluster: &NautilusCluster) -> String {
    format!("{}-bookie", cluster.name_any())
}

/// Generate the headless Service used for bookie discovery.
pub fn generate_headless_service(cluster: &NautilusCluster) -> Service {
    let labels = nautilus_labels(cluster, COMPONENT);
    Service {
        metadata: owned_meta(
            headless_service_name(cluster),
            cluster.namespace(),
            labels.clone(),
            Some(owner_reference(cluster)),
        ),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("bookie".to_string()),
                port: BOOKIE_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the ConfigMap exported into the bookie environment.
///
/// Every entry of `spec.bookkeeper.options` becomes `BK_<key>`, which the
/// image maps onto bk_server.conf. Options override the built-in entries.
pub fn generate_configmap(cluster: &NautilusCluster, bookkeeper: &BookkeeperSpec) -> ConfigMap {
    let zookeeper_uri = cluster.spec.zookeeper_uri.clone();
    let mut data = BTreeMap::from([
        ("BOOKIE_MEM_OPTS".to_string(), MEMORY_OPTS.join(" ")),
        ("BOOKIE_GC_OPTS".to_string(), GC_OPTS.join(" ")),
        ("BOOKIE_GC_LOGGING_OPTS".to_string(), GC_LOGGING_OPTS.join(" ")),
        ("ZK_URL".to_string(), zookeeper_uri.clone()),
        // Overridable for images based on BookKeeper 4.7 or newer
        ("BK_useHostNameAsBookieID".to_string(), "false".to_string()),
        ("NAUTILUS_CLUSTER_NAME".to_string(), cluster.name_any()),
        ("WAIT_FOR".to_string(), zookeeper_uri),
    ]);

    if bookkeeper.auto_recovery.unwrap_or(true) {
        data.insert("BK_AUTORECOVERY".to_string(), "true".to_string());
    }

    for (key, value) in bookkeeper.options.iter().flatten() {
        data.insert(format!("BK_{key}"), value.clone());
    }

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

/// Generate the bookie StatefulSet.
pub fn generate_statefulset(cluster: &NautilusCluster, bookkeeper: &BookkeeperSpec) -> StatefulSet {
    let labels = nautilus_labels(cluster, COMPONENT);

    StatefulSet {
        metadata: owned_meta(
            statefulset_name(cluster),
            cluster.namespace(),
            labels.clone(),
            Some(owner_reference(cluster)),
        ),
        spec: Some(StatefulSetSpec {
            service_name: Some(headless_service_name(cluster)),
            replicas: Some(bookkeeper.replicas),
            // Bookies are independent, start them all at once
            pod_management_policy: Some("Parallel".to_string()),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(generate_pod_spec(cluster, bookkeeper, labels)),
            },
            volume_claim_templates: Some(generate_volume_claim_templates(bookkeeper)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_pod_spec(
    cluster: &NautilusCluster,
    bookkeeper: &BookkeeperSpec,
    labels: BTreeMap<String, String>,
) -> PodSpec {
    let image = bookkeeper.image.clone().unwrap_or_default();

    let container = Container {
        name: "bookie".to_string(),
        image: Some(image.image_ref()),
        image_pull_policy: Some(image.pull_policy.clone()),
        ports: Some(vec![ContainerPort {
            name: Some("bookie".to_string()),
            container_port: BOOKIE_PORT,
            ..Default::default()
        }]),
        env_from: Some(vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: configmap_name(cluster),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: JOURNAL_DISK_NAME.to_string(),
                mount_path: "/bk/journal".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: LEDGER_DISK_NAME.to_string(),
                mount_path: "/bk/ledgers".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: INDEX_DISK_NAME.to_string(),
                mount_path: "/bk/index".to_string(),
                ..Default::default()
            },
        ]),
        resources: bookkeeper.resources.clone(),
        // Up to 1.5 minutes to become ready
        readiness_probe: Some(exec_probe(
            vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "/opt/bookkeeper/bin/bookkeeper shell bookiesanity".to_string(),
            ],
            20,
            10,
            9,
        )),
        // Starts after the readiness window; one minute of failures restarts the pod
        liveness_probe: Some(exec_probe(health_check_command(BOOKIE_PORT), 60, 15, 4)),
        ..Default::default()
    };

    PodSpec {
        containers: vec![container],
        affinity: Some(pod_anti_affinity(labels)),
        service_account_name: if bookkeeper.service_account_name.is_empty() {
            None
        } else {
            Some(bookkeeper.service_account_name.clone())
        },
        ..Default::default()
    }
}

fn generate_volume_claim_templates(bookkeeper: &BookkeeperSpec) -> Vec<PersistentVolumeClaim> {
    let storage = bookkeeper.storage.clone().unwrap_or_default();
    [
        (JOURNAL_DISK_NAME, storage.journal_volume_claim_template),
        (LEDGER_DISK_NAME, storage.ledger_volume_claim_template),
        (INDEX_DISK_NAME, storage.index_volume_claim_template),
    ]
    .into_iter()
    .map(|(name, spec)| PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec,
        ..Default::default()
    })
    .collect()
}

/// Generate a PodDisruptionBudget allowing a single bookie down.
pub fn generate_pod_disruption_budget(cluster: &NautilusCluster) -> PodDisruptionBudget {
    let labels = nautilus_labels(cluster, COMPONENT);
    PodDisruptionBudget {
        metadata: owned_meta(
            pdb_name(cluster),
            cluster.namespace(),
            labels.clone(),
            Some(owner_reference(cluster)),
        ),
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(1)),
            selector: Some(LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
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
    use crate::crd::{DefaultingConfig, NautilusClusterSpec, WithDefaults};

    fn test_cluster() -> NautilusCluster {
        let mut spec = NautilusClusterSpec::default();
        spec.with_defaults(&DefaultingConfig::default());
        let mut cluster = NautilusCluster::new("example", spec);
        cluster.metadata.namespace = Some("default".to_string());
        cluster.metadata.uid = Some("uid-1".to_string());
        cluster
    }

    fn bookkeeper(cluster: &NautilusCluster) -> BookkeeperSpec {
        cluster.spec.bookkeeper.clone().unwrap()
    }

    #[test]
    fn test_headless_service() {
        let cluster = test_cluster();
        let svc = generate_headless_service(&cluster);
        assert_eq!(svc.metadata.name.as_deref(), Some("example-bookie-headless"));
        assert_eq!(svc.metadata.namespace.as_deref(), Some("default"));

        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.ports.unwrap()[0].port, 3181);
        assert_eq!(
            spec.selector.unwrap()["app.kubernetes.io/component"],
            "bookie"
        );
    }

    #[test]
    fn test_configmap_contents() {
        let mut cluster = test_cluster();
        let mut bk = bookkeeper(&cluster);
        bk.options = Some(BTreeMap::from([
            ("journalDirectories".to_string(), "/bk/journal".to_string()),
            ("useHostNameAsBookieID".to_string(), "true".to_string()),
        ]));
        cluster.spec.bookkeeper = Some(bk.clone());

        let cm = generate_configmap(&cluster, &bk);
        assert_eq!(cm.metadata.name.as_deref(), Some("example-bookie-configmap"));
        let data = cm.data.unwrap();
        assert_eq!(data["ZK_URL"], "zk-client:2181");
        assert_eq!(data["WAIT_FOR"], "zk-client:2181");
        assert_eq!(data["NAUTILUS_CLUSTER_NAME"], "example");
        assert_eq!(data["BK_AUTORECOVERY"], "true");
        assert_eq!(data["BK_journalDirectories"], "/bk/journal");
        // User options win over built-in entries
        assert_eq!(data["BK_useHostNameAsBookieID"], "true");
        assert!(data["BOOKIE_GC_OPTS"].contains("-XX:+UseG1GC"));
    }

    #[test]
    fn test_configmap_without_auto_recovery() {
        let cluster = test_cluster();
        let mut bk = bookkeeper(&cluster);
        bk.auto_recovery = Some(false);
        let data = generate_configmap(&cluster, &bk).data.unwrap();
        assert!(!data.contains_key("BK_AUTORECOVERY"));
    }

    #[test]
    fn test_statefulset_layout() {
        let cluster = test_cluster();
        let sts = generate_statefulset(&cluster, &bookkeeper(&cluster));
        assert_eq!(sts.metadata.name.as_deref(), Some("example-bookie"));
        assert_eq!(
            sts.metadata.owner_references.as_ref().unwrap()[0].kind,
            "NautilusCluster"
        );

        let spec = sts.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(spec.pod_management_policy.as_deref(), Some("Parallel"));
        assert_eq!(spec.service_name.as_deref(), Some("example-bookie-headless"));

        let claims: Vec<_> = spec
            .volume_claim_templates
            .unwrap()
            .into_iter()
            .map(|c| c.metadata.name.unwrap())
            .collect();
        assert_eq!(claims, vec!["journal", "ledger", "index"]);

        let pod = spec.template.spec.unwrap();
        let container = &pod.containers[0];
        assert_eq!(
            container.image.as_deref(),
            Some("nautilus/bookkeeper:latest")
        );
        assert_eq!(container.image_pull_policy.as_deref(), Some("Always"));
        assert!(container.readiness_probe.is_some());
        assert_eq!(
            container
                .liveness_probe
                .as_ref()
                .unwrap()
                .initial_delay_seconds,
            Some(60)
        );
        assert!(container.resources.is_some());
        assert!(pod.affinity.unwrap().pod_anti_affinity.is_some());
        assert!(pod.service_account_name.is_none());
    }

    #[test]
    fn test_statefulset_service_account() {
        let cluster = test_cluster();
        let mut bk = bookkeeper(&cluster);
        bk.service_account_name = "bookie-sa".to_string();
        let sts = generate_statefulset(&cluster, &bk);
        let pod = sts.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("bookie-sa"));
    }

    #[test]
    fn test_pod_disruption_budget() {
        let cluster = test_cluster();
        let pdb = generate_pod_disruption_budget(&cluster);
        let spec = pdb.spec.unwrap();
        assert_eq!(spec.max_unavailable, Some(IntOrString::Int(1)));
        assert!(spec.min_available.is_none());
    }
}
