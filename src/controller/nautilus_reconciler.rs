//! Reconciliation loop for NautilusCluster.
//!
//! Each pass fills in spec defaults, validates the spec, applies the
//! BookKeeper, controller and node objects, then derives status from the
//! cluster's pods.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::{
    Api, Client, ResourceExt,
    api::{ListParams, Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::{
    controller::{
        common::{create_or_update, members_from_pods, status_patch},
        context::Context,
        error::{Error, Result},
        status::Clock,
        validation::validate_nautilus_spec,
    },
    crd::{
        BookkeeperSpec, ClusterCondition, ClusterConditionType, ClusterStatus, ConditionStatus,
        NautilusCluster, NautilusSpec, WithDefaults,
    },
    resources::{
        bookie,
        common::{MANAGED_BY, NAUTILUS_APP},
        nautilus_controller, nautilus_node,
    },
};

/// Kind label used in metrics and logs
pub const KIND: &str = "NautilusCluster";

/// Label selector matching every pod of a cluster.
pub fn pod_selector(name: &str) -> String {
    format!(
        "app.kubernetes.io/name={NAUTILUS_APP},app.kubernetes.io/instance={name},app.kubernetes.io/managed-by={MANAGED_BY}"
    )
}

/// Reconcile a NautilusCluster
pub async fn reconcile(obj: Arc<NautilusCluster>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling NautilusCluster");

    let api: Api<NautilusCluster> = Api::namespaced(ctx.client.clone(), &namespace);

    let mut cluster = (*obj).clone();
    if cluster.spec.with_defaults(&ctx.defaulting) {
        info!(name = %name, "Applying spec defaults");
        let patch = serde_json::json!({ "spec": cluster.spec });
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        ctx.publish_normal_event(
            &cluster,
            "DefaultsApplied",
            "Defaulting",
            Some("Filled in default values for unset spec fields".to_string()),
        )
        .await;
        // The spec write bumps the generation, which triggers the next pass.
        return Ok(Action::await_change());
    }

    if let Err(e) = validate_nautilus_spec(&cluster.spec) {
        error!(name = %name, error = %e, "Validation failed");
        ctx.publish_warning_event(&cluster, "ValidationFailed", "Validating", Some(e.to_string()))
            .await;
        return Err(e.into());
    }

    apply_cluster_objects(&cluster, &ctx.client, &namespace).await?;

    let observed = cluster.status.as_ref().and_then(|s| s.observed_generation);
    if observed != cluster.metadata.generation {
        ctx.publish_normal_event(
            &cluster,
            "ResourcesApplied",
            "Reconciling",
            Some(format!(
                "Applied objects for generation {}",
                cluster.metadata.generation.unwrap_or_default()
            )),
        )
        .await;
    }

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
    let pod_list = pods
        .list(&ListParams::default().labels(&pod_selector(&name)))
        .await?;

    let previous = cluster.status.clone().unwrap_or_default();
    let status = compute_status(&cluster, &pod_list.items, ctx.clock.as_ref());
    let pods_ready = status.ready_replicas >= status.replicas && status.replicas > 0;

    if status != previous {
        let patch = status_patch(&status)?;
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }

    let was_ready = previous
        .get_condition(ClusterConditionType::PodsReady)
        .is_some_and(|(_, c)| c.status == ConditionStatus::True);
    if pods_ready && !was_ready {
        ctx.publish_normal_event(
            &cluster,
            "PodsReady",
            "Reconciling",
            Some(format!("{} pods ready", status.ready_replicas)),
        )
        .await;
    } else if !pods_ready && was_ready {
        ctx.publish_warning_event(
            &cluster,
            "PodsNotReady",
            "Reconciling",
            Some(format!(
                "{}/{} pods ready",
                status.ready_replicas, status.replicas
            )),
        )
        .await;
    }

    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state
            .metrics
            .record_reconcile(KIND, &namespace, &name, duration);
        health_state.metrics.set_cluster_state(
            KIND,
            &namespace,
            &name,
            i64::from(status.replicas),
            i64::from(status.ready_replicas),
        );
    }

    let requeue = if pods_ready {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    };
    Ok(Action::requeue(requeue))
}

/// Error policy for the NautilusCluster controller
pub fn error_policy(obj: Arc<NautilusCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(KIND, &namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

async fn apply_cluster_objects(
    cluster: &NautilusCluster,
    client: &Client,
    namespace: &str,
) -> Result<()> {
    let bookkeeper = cluster
        .spec
        .bookkeeper
        .as_ref()
        .ok_or_else(|| Error::MissingField("spec.bookkeeper".to_string()))?;
    let nautilus = cluster
        .spec
        .nautilus
        .as_ref()
        .ok_or_else(|| Error::MissingField("spec.nautilus".to_string()))?;

    apply_bookkeeper(cluster, bookkeeper, client, namespace).await?;
    apply_nautilus_controller(cluster, nautilus, client, namespace).await?;
    apply_nautilus_node(cluster, nautilus, client, namespace).await?;

    debug!(name = %cluster.name_any(), "Applied cluster objects");
    Ok(())
}

// Services and PodDisruptionBudgets are created once; replacing a Service
// would drop its allocated clusterIP.

async fn apply_bookkeeper(
    cluster: &NautilusCluster,
    bookkeeper: &BookkeeperSpec,
    client: &Client,
    namespace: &str,
) -> Result<()> {
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let pdbs: Api<PodDisruptionBudget> = Api::namespaced(client.clone(), namespace);

    create_or_update(&services, &bookie::generate_headless_service(cluster), false).await?;
    create_or_update(
        &configmaps,
        &bookie::generate_configmap(cluster, bookkeeper),
        true,
    )
    .await?;
    create_or_update(
        &statefulsets,
        &bookie::generate_statefulset(cluster, bookkeeper),
        true,
    )
    .await?;
    create_or_update(&pdbs, &bookie::generate_pod_disruption_budget(cluster), false).await
}

async fn apply_nautilus_controller(
    cluster: &NautilusCluster,
    nautilus: &NautilusSpec,
    client: &Client,
    namespace: &str,
) -> Result<()> {
    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);

    create_or_update(
        &configmaps,
        &nautilus_controller::generate_configmap(cluster, nautilus),
        true,
    )
    .await?;
    create_or_update(
        &deployments,
        &nautilus_controller::generate_deployment(cluster, nautilus),
        true,
    )
    .await?;
    create_or_update(&services, &nautilus_controller::generate_service(cluster), false).await
}

async fn apply_nautilus_node(
    cluster: &NautilusCluster,
    nautilus: &NautilusSpec,
    client: &Client,
    namespace: &str,
) -> Result<()> {
    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);

    create_or_update(
        &configmaps,
        &nautilus_node::generate_configmap(cluster, nautilus),
        true,
    )
    .await?;
    create_or_update(&services, &nautilus_node::generate_headless_service(cluster), false)
        .await?;
    create_or_update(
        &statefulsets,
        &nautilus_node::generate_statefulset(cluster, nautilus),
        true,
    )
    .await
}

/// Derive the next status of a cluster from its current pods.
///
/// Starts from the stored status so condition timestamps carry over.
pub fn compute_status(cluster: &NautilusCluster, pods: &[Pod], clock: &dyn Clock) -> ClusterStatus {
    let mut status = cluster.status.clone().unwrap_or_default();
    let members = members_from_pods(pods);

    status.replicas = cluster.spec.desired_replicas();
    status.ready_replicas = members.ready.len() as i32;
    status.current_replicas = (members.ready.len() + members.unready.len()) as i32;
    status.members = members;
    status.observed_generation = cluster.metadata.generation;

    let pods_ready = status.replicas > 0 && status.ready_replicas >= status.replicas;
    if pods_ready {
        status.set_pods_ready_condition_true(clock);
    } else {
        status.set_pods_ready_condition_false(clock);
    }

    let target = cluster.spec.target_version().unwrap_or_default();
    if pods_ready {
        status.current_version = target.to_string();
        status.target_version.clear();
        status.set_condition_false(ClusterConditionType::Upgrading, clock);
    } else if !status.current_version.is_empty() && status.current_version != target {
        status.target_version = target.to_string();
        status.set_condition(
            ClusterCondition::new(
                ClusterConditionType::Upgrading,
                ConditionStatus::True,
                "UpgradeInProgress",
                &format!("Upgrading to {target}"),
            ),
            clock,
        );
    } else {
        status.set_condition_false(ClusterConditionType::Upgrading, clock);
    }

    status
}
