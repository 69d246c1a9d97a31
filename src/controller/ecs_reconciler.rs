//! Reconciliation loop for EcsCluster.
//!
//! Objects in the resource namespace carry an owner reference only when that
//! namespace is the EcsCluster's own; everything else, including all
//! cluster-scoped objects, is removed by the finalizer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::{
    Api, Client, ResourceExt,
    api::{ListParams, Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::{
    controller::{
        common::{
            add_finalizer, create_or_update, delete_object, members_from_pods, remove_finalizer,
            status_patch,
        },
        context::Context,
        error::{Error, Result},
        status::Clock,
        validation::validate_ecs_spec,
    },
    crd::{ClusterConditionType, ClusterStatus, ConditionStatus, EcsCluster, WithDefaults},
    resources::ecs::{
        self, CSI_SECRET_NAMES, ClusterFeatures, DAEMONSET_NAME, DAEMONSET_SERVICE_ACCOUNT,
        INIT_SECRET_NAME, STATEFULSET_NAME, STATEFULSET_SERVICE_ACCOUNT, TLS_SECRET_NAME, rbac,
        secrets::{self, CredentialSource},
        services::{self, INGRESS_NAME},
        storage_class, workloads,
    },
};

/// Kind label used in metrics and logs
pub const KIND: &str = "EcsCluster";

/// Finalizer guarding cleanup of objects outside the owner's namespace
pub const FINALIZER: &str = "ecs.ecs.io/cleanup";

/// Reconcile an EcsCluster
pub async fn reconcile(obj: Arc<EcsCluster>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling EcsCluster");

    let api: Api<EcsCluster> = Api::namespaced(ctx.client.clone(), &namespace);

    if obj.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&obj, &ctx, &api).await;
    }

    if !obj.finalizers().iter().any(|f| f == FINALIZER) {
        info!(name = %name, "Adding finalizer");
        add_finalizer(&api, &name, FINALIZER).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

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
        return Ok(Action::await_change());
    }

    if let Err(e) = validate_ecs_spec(&cluster.spec) {
        error!(name = %name, error = %e, "Validation failed");
        ctx.publish_warning_event(&cluster, "ValidationFailed", "Validating", Some(e.to_string()))
            .await;
        return Err(e.into());
    }

    let features = detect_features(&ctx.client).await?;
    debug!(
        name = %name,
        csi_v1 = features.csi_v1,
        kubelet_plugins_watcher = features.kubelet_plugins_watcher,
        "Detected cluster features"
    );

    let credentials = read_credentials(&cluster, &ctx.client, &namespace).await?;
    let join = resolve_join(&cluster, &ctx.client).await?;

    let deployer = Deployer {
        cluster: &cluster,
        client: &ctx.client,
        features,
        credentials: CredentialSource::new(credentials.as_ref()),
    };
    deployer.apply(&join).await?;

    if cluster.status.as_ref().and_then(|s| s.observed_generation) != cluster.metadata.generation {
        ctx.publish_normal_event(
            &cluster,
            "ResourcesApplied",
            "Reconciling",
            Some(format!("Deployed ECS to namespace {}", cluster.spec.resource_namespace())),
        )
        .await;
    }

    let resource_namespace = cluster.spec.resource_namespace().to_string();
    let daemonsets: Api<DaemonSet> = Api::namespaced(ctx.client.clone(), &resource_namespace);
    let daemonset = daemonsets.get_opt(DAEMONSET_NAME).await?;
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &resource_namespace);
    let selector = ecs::daemonset_labels(&cluster)
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    let pod_list = pods.list(&ListParams::default().labels(&selector)).await?;

    let previous = cluster.status.clone().unwrap_or_default();
    let status = compute_status(
        &cluster,
        daemonset.as_ref(),
        &pod_list.items,
        ctx.clock.as_ref(),
    );
    if status != previous {
        let patch = status_patch(&status)?;
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }

    let pods_ready = status
        .get_condition(ClusterConditionType::PodsReady)
        .is_some_and(|(_, c)| c.status == ConditionStatus::True);
    let was_ready = previous
        .get_condition(ClusterConditionType::PodsReady)
        .is_some_and(|(_, c)| c.status == ConditionStatus::True);
    if pods_ready && !was_ready {
        ctx.publish_normal_event(
            &cluster,
            "PodsReady",
            "Reconciling",
            Some(format!("{} nodes ready", status.ready_replicas)),
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

/// Error policy for the EcsCluster controller
pub fn error_policy(obj: Arc<EcsCluster>, error: &Error, ctx: Arc<Context>) -> Action {
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

async fn detect_features(client: &Client) -> Result<ClusterFeatures> {
    let version = client.apiserver_version().await?;
    Ok(ClusterFeatures::from_version(&version.git_version))
}

/// Fetch the Secret named by `spec.secretRefName`, if one is configured.
async fn read_credentials(
    cluster: &EcsCluster,
    client: &Client,
    default_namespace: &str,
) -> Result<Option<Secret>> {
    let spec = &cluster.spec;
    if spec.secret_ref_name.is_empty() {
        return Ok(None);
    }
    let namespace = if spec.secret_ref_namespace.is_empty() {
        default_namespace
    } else {
        spec.secret_ref_namespace.as_str()
    };
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = api.get_opt(&spec.secret_ref_name).await?;
    if secret.is_none() {
        warn!(
            secret = %spec.secret_ref_name,
            namespace = %namespace,
            "Referenced credentials secret not found, using defaults"
        );
    }
    Ok(secret)
}

async fn resolve_join(cluster: &EcsCluster, client: &Client) -> Result<String> {
    if !cluster.spec.join.is_empty() {
        return Ok(cluster.spec.join.clone());
    }
    let nodes: Api<Node> = Api::all(client.clone());
    let list = nodes.list(&ListParams::default()).await?;
    let join = join_from_nodes(&list.items);
    if join.is_empty() {
        return Err(Error::Transient(
            "no node reports an InternalIP address".to_string(),
        ));
    }
    Ok(join)
}

/// Comma-separated InternalIP addresses of `nodes`, in list order.
pub fn join_from_nodes(nodes: &[Node]) -> String {
    nodes
        .iter()
        .filter_map(|node| {
            node.status
                .as_ref()?
                .addresses
                .as_ref()?
                .iter()
                .find(|a| a.type_ == "InternalIP")
                .map(|a| a.address.clone())
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Applies the objects of one EcsCluster in dependency order.
struct Deployer<'a> {
    cluster: &'a EcsCluster,
    client: &'a Client,
    features: ClusterFeatures,
    credentials: CredentialSource<'a>,
}

impl Deployer<'_> {
    fn namespaced<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), self.cluster.spec.resource_namespace())
    }

    fn cluster_scoped<K>(&self) -> Api<K>
    where
        K: kube::Resource<DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }

    async fn apply(&self, join: &str) -> Result<()> {
        let cluster = self.cluster;

        create_or_update(
            &self.cluster_scoped::<Namespace>(),
            &ecs::generate_namespace(cluster),
            false,
        )
        .await?;
        create_or_update(
            &self.namespaced::<ServiceAccount>(),
            &rbac::generate_daemonset_service_account(cluster),
            false,
        )
        .await?;
        create_or_update(
            &self.namespaced::<Role>(),
            &rbac::generate_key_management_role(cluster),
            true,
        )
        .await?;
        create_or_update(
            &self.namespaced::<RoleBinding>(),
            &rbac::generate_key_management_binding(cluster),
            true,
        )
        .await?;
        create_or_update(
            &self.namespaced::<Secret>(),
            &secrets::generate_init_secret(cluster, self.credentials),
            true,
        )
        .await?;

        let daemonset = workloads::generate_daemonset(cluster, self.features, join)?;
        create_or_update(&self.namespaced::<DaemonSet>(), &daemonset, true).await?;
        create_or_update(
            &self.namespaced::<Service>(),
            &services::generate_service(cluster),
            false,
        )
        .await?;

        self.apply_ingress().await?;
        self.apply_csi().await?;
        self.apply_fencing().await?;

        create_or_update(
            &self.cluster_scoped::<StorageClass>(),
            &storage_class::generate_storage_class(cluster, self.features),
            false,
        )
        .await?;

        debug!(name = %cluster.name_any(), "Applied ECS objects");
        Ok(())
    }

    async fn apply_ingress(&self) -> Result<()> {
        let cluster = self.cluster;
        let ingresses = self.namespaced::<Ingress>();
        if !cluster.spec.ingress.enable {
            return delete_object(&ingresses, INGRESS_NAME).await;
        }
        if cluster.spec.ingress.tls {
            create_or_update(
                &self.namespaced::<Secret>(),
                &secrets::generate_tls_secret(cluster, self.credentials)?,
                true,
            )
            .await?;
        }
        create_or_update(&ingresses, &services::generate_ingress(cluster), true).await
    }

    async fn apply_csi(&self) -> Result<()> {
        let cluster = self.cluster;
        let statefulsets = self.namespaced::<StatefulSet>();
        let deployments = self.namespaced::<Deployment>();

        let secret_api = self.namespaced::<Secret>();
        let wanted = if cluster.spec.csi.enable {
            secrets::generate_csi_secrets(cluster, self.credentials)
        } else {
            Vec::new()
        };
        for name in secrets::stale_csi_secrets(&wanted) {
            delete_object(&secret_api, name).await?;
        }

        if !cluster.spec.csi.enable {
            return self.remove_csi().await;
        }

        for secret in &wanted {
            create_or_update(&secret_api, secret, true).await?;
        }

        let roles = self.cluster_scoped::<ClusterRole>();
        for role in rbac::generate_csi_cluster_roles() {
            create_or_update(&roles, &role, true).await?;
        }
        let bindings = self.cluster_scoped::<ClusterRoleBinding>();
        for binding in rbac::generate_csi_cluster_role_bindings(cluster) {
            create_or_update(&bindings, &binding, true).await?;
        }

        create_or_update(
            &self.namespaced::<ServiceAccount>(),
            &rbac::generate_statefulset_service_account(cluster),
            false,
        )
        .await?;

        // Only one helper workload kind may exist at a time.
        if cluster.spec.csi_helper_is_deployment() {
            delete_object(&statefulsets, STATEFULSET_NAME).await?;
            create_or_update(
                &deployments,
                &workloads::generate_csi_helper_deployment(cluster, self.features),
                true,
            )
            .await
        } else {
            delete_object(&deployments, STATEFULSET_NAME).await?;
            create_or_update(
                &statefulsets,
                &workloads::generate_csi_helper_statefulset(cluster, self.features),
                true,
            )
            .await
        }
    }

    /// Remove the CSI helper workload and its identity and RBAC objects.
    async fn remove_csi(&self) -> Result<()> {
        delete_object(&self.namespaced::<StatefulSet>(), STATEFULSET_NAME).await?;
        delete_object(&self.namespaced::<Deployment>(), STATEFULSET_NAME).await?;

        let bindings = self.cluster_scoped::<ClusterRoleBinding>();
        for binding in rbac::CSI_CLUSTER_ROLE_BINDINGS {
            delete_object(&bindings, binding).await?;
        }
        let roles = self.cluster_scoped::<ClusterRole>();
        for role in rbac::CSI_CLUSTER_ROLES {
            delete_object(&roles, role).await?;
        }

        delete_object(
            &self.namespaced::<ServiceAccount>(),
            STATEFULSET_SERVICE_ACCOUNT,
        )
        .await
    }

    async fn apply_fencing(&self) -> Result<()> {
        let cluster = self.cluster;
        let roles = self.cluster_scoped::<ClusterRole>();
        let bindings = self.cluster_scoped::<ClusterRoleBinding>();

        if cluster.spec.disable_fencing {
            delete_object(&bindings, rbac::FENCING_BINDING).await?;
            return delete_object(&roles, rbac::FENCING_CLUSTER_ROLE).await;
        }
        create_or_update(&roles, &rbac::generate_fencing_cluster_role(), true).await?;
        create_or_update(
            &bindings,
            &rbac::generate_fencing_cluster_role_binding(cluster),
            true,
        )
        .await
    }
}

/// Handle deletion of an EcsCluster
async fn handle_deletion(obj: &EcsCluster, ctx: &Context, api: &Api<EcsCluster>) -> Result<Action> {
    let name = obj.name_any();
    info!(name = %name, "Handling deletion");

    if obj.finalizers().iter().any(|f| f == FINALIZER) {
        let mut cluster = obj.clone();
        cluster.spec.with_defaults(&ctx.defaulting);
        cleanup(&cluster, &ctx.client).await?;
        remove_finalizer(api, &name, FINALIZER).await?;
        ctx.publish_normal_event(obj, "Deleted", "Deleting", None).await;
    }

    if let Some(ref health_state) = ctx.health_state {
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        health_state.metrics.remove_cluster(KIND, &namespace, &name);
    }

    Ok(Action::await_change())
}

/// Delete every object an EcsCluster may have created.
async fn cleanup(cluster: &EcsCluster, client: &Client) -> Result<()> {
    let roles: Api<ClusterRole> = Api::all(client.clone());
    for role in rbac::CLUSTER_ROLES {
        delete_object(&roles, role).await?;
    }
    let bindings: Api<ClusterRoleBinding> = Api::all(client.clone());
    for binding in rbac::CLUSTER_ROLE_BINDINGS {
        delete_object(&bindings, binding).await?;
    }
    let storage_classes: Api<StorageClass> = Api::all(client.clone());
    delete_object(&storage_classes, &cluster.spec.storage_class_name).await?;

    let ns = cluster.spec.resource_namespace();
    let daemonsets: Api<DaemonSet> = Api::namespaced(client.clone(), ns);
    delete_object(&daemonsets, DAEMONSET_NAME).await?;
    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), ns);
    delete_object(&statefulsets, STATEFULSET_NAME).await?;
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), ns);
    delete_object(&deployments, STATEFULSET_NAME).await?;
    let services: Api<Service> = Api::namespaced(client.clone(), ns);
    delete_object(&services, &cluster.spec.service.name).await?;
    let ingresses: Api<Ingress> = Api::namespaced(client.clone(), ns);
    delete_object(&ingresses, INGRESS_NAME).await?;

    let secrets: Api<Secret> = Api::namespaced(client.clone(), ns);
    for secret in [INIT_SECRET_NAME, TLS_SECRET_NAME].iter().chain(CSI_SECRET_NAMES) {
        delete_object(&secrets, secret).await?;
    }

    let role_bindings: Api<RoleBinding> = Api::namespaced(client.clone(), ns);
    delete_object(&role_bindings, rbac::KEY_MANAGEMENT_BINDING).await?;
    let namespaced_roles: Api<Role> = Api::namespaced(client.clone(), ns);
    delete_object(&namespaced_roles, rbac::KEY_MANAGEMENT_ROLE).await?;

    let service_accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), ns);
    delete_object(&service_accounts, DAEMONSET_SERVICE_ACCOUNT).await?;
    delete_object(&service_accounts, STATEFULSET_SERVICE_ACCOUNT).await?;

    info!(name = %cluster.name_any(), namespace = %ns, "Removed ECS objects");
    Ok(())
}

/// Derive the next status of an EcsCluster from its node DaemonSet and pods.
pub fn compute_status(
    cluster: &EcsCluster,
    daemonset: Option<&DaemonSet>,
    pods: &[Pod],
    clock: &dyn Clock,
) -> ClusterStatus {
    let mut status = cluster.status.clone().unwrap_or_default();
    let ds_status = daemonset.and_then(|ds| ds.status.as_ref());

    status.replicas = ds_status.map_or(0, |s| s.desired_number_scheduled);
    status.current_replicas = ds_status.map_or(0, |s| s.current_number_scheduled);
    status.ready_replicas = ds_status.map_or(0, |s| s.number_ready);
    status.members = members_from_pods(pods);
    status.observed_generation = cluster.metadata.generation;

    if status.replicas > 0 && status.ready_replicas >= status.replicas {
        status.set_pods_ready_condition_true(clock);
    } else {
        status.set_pods_ready_condition_false(clock);
    }
    status
}
