//! nautilus-operator library crate
//!
//! This module exports the controllers, CRD definitions, and resource generators.

pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;
pub mod webhooks;

pub use config::OperatorConfig;
pub use health::HealthState;
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, run_webhook_server,
};

use std::fmt::Debug;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::controller::{Action, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::context::Context;
use controller::{ecs_reconciler, nautilus_reconciler};
use crd::{EcsCluster, NautilusCluster};
use resources::ecs;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all controllers.
///
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Log the outcome of one reconciliation.
///
/// NotFound errors are expected after deletion when related watch events
/// trigger reconciliation for a deleted object, so they are logged at debug.
async fn log_result<K, E>(
    result: Result<(ObjectRef<K>, Action), ControllerError<controller::error::Error, E>>,
) where
    K: Resource,
    K::DynamicType: Debug,
    E: std::error::Error,
{
    match result {
        Ok((obj, _action)) => {
            debug!("Reconciled: {}", obj.name);
        }
        Err(e) => {
            let is_not_found = match &e {
                ControllerError::ObjectNotFound(_) => true,
                ControllerError::ReconcilerFailed(err, _) => err.is_not_found(),
                _ => false,
            };
            if is_not_found {
                debug!("Object no longer exists (likely deleted): {:?}", e);
            } else {
                error!("Reconciliation error: {:?}", e);
            }
        }
    }
}

/// Run both controllers until their streams end.
///
/// When `namespace` is `Some(ns)`, only watches resources in that namespace.
/// When `namespace` is `None`, watches resources cluster-wide.
pub async fn run_controllers(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    config: &OperatorConfig,
) {
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(
        client.clone(),
        health_state,
        config.defaulting(),
        config.pod_name.clone(),
    ));
    let namespace = config.watch_namespace.as_deref();

    tokio::join!(
        run_nautilus_controller(client.clone(), ctx.clone(), namespace),
        run_ecs_controller(client, ctx, namespace),
    );

    // This should never complete in normal operation
    error!("Controller streams ended unexpectedly");
}

/// Run the NautilusCluster controller with optional namespace scoping.
pub async fn run_nautilus_controller(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    info!(
        "Starting controller for NautilusCluster resources (scope: {})",
        namespace.unwrap_or("cluster-wide")
    );

    let clusters: Api<NautilusCluster> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let deployments: Api<Deployment> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = scoped_api(client.clone(), namespace);
    let pdbs: Api<PodDisruptionBudget> = scoped_api(client, namespace);

    let watcher_config = default_watcher_config();
    let (reader, cluster_stream) = create_filtered_stream(clusters, watcher_config.clone());

    // Workloads are watched in full since their status drives readiness; the
    // rest only need metadata to detect drift or deletion.
    Controller::for_stream(cluster_stream, reader)
        .owns(statefulsets, watcher_config.clone())
        .owns(deployments, watcher_config.clone())
        .owns_stream(metadata_watcher(services, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(configmaps, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(pdbs, watcher_config).touched_objects())
        .run(
            nautilus_reconciler::reconcile,
            nautilus_reconciler::error_policy,
            ctx,
        )
        .for_each(log_result)
        .await;
}

/// Run the EcsCluster controller with optional namespace scoping.
///
/// The node DaemonSet may live outside the EcsCluster's namespace, so it is
/// watched cluster-wide and mapped back through its `ecs_cr` and `ecs_ns` labels.
pub async fn run_ecs_controller(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    info!(
        "Starting controller for EcsCluster resources (scope: {})",
        namespace.unwrap_or("cluster-wide")
    );

    let clusters: Api<EcsCluster> = scoped_api(client.clone(), namespace);
    let daemonsets: Api<DaemonSet> = Api::all(client);

    let watcher_config = default_watcher_config();
    let (reader, cluster_stream) = create_filtered_stream(clusters, watcher_config.clone());
    let lookup = reader.clone();

    Controller::for_stream(cluster_stream, reader)
        .watches(
            daemonsets,
            watcher_config.labels("app=ecs"),
            move |ds: DaemonSet| {
                let labels = ds.metadata.labels?;
                lookup
                    .state()
                    .into_iter()
                    .find(|c| ecs::is_owned_by(&labels, c))
                    .map(|c| ObjectRef::from_obj(c.as_ref()))
            },
        )
        .run(ecs_reconciler::reconcile, ecs_reconciler::error_policy, ctx)
        .for_each(log_result)
        .await;
}
