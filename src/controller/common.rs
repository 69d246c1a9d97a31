//! Shared controller helpers.
//!
//! Object create/update/delete semantics and finalizer handling used by both
//! the NautilusCluster and EcsCluster controllers.

use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Resource, ResourceExt, api::PatchParams};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::Error;
use crate::crd::{ClusterStatus, MembersStatus};

fn kind_of<K>() -> String
where
    K: Resource,
    <K as Resource>::DynamicType: Default,
{
    K::kind(&Default::default()).to_string()
}

/// Create an object.
///
/// If it already exists and `update` is false, nothing is changed. If `update`
/// is true the existing object is replaced, keeping its resourceVersion.
/// Any other failure is wrapped with the object kind.
pub async fn create_or_update<K>(api: &Api<K>, obj: &K, update: bool) -> Result<(), Error>
where
    K: Resource + Clone + Serialize + DeserializeOwned + std::fmt::Debug,
    <K as Resource>::DynamicType: Default,
{
    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };

    match api.create(&params, obj).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => {
            if !update {
                return Ok(());
            }
            let name = obj
                .meta()
                .name
                .clone()
                .ok_or_else(|| Error::MissingField(format!("{}.metadata.name", kind_of::<K>())))?;
            let existing = api.get(&name).await?;

            let mut desired = obj.clone();
            desired.meta_mut().resource_version = existing.resource_version();
            api.replace(&name, &params, &desired)
                .await
                .map_err(|source| Error::ObjectUpdate {
                    kind: kind_of::<K>(),
                    source,
                })?;
            debug!(kind = %kind_of::<K>(), name = %name, "Updated existing object");
            Ok(())
        }
        Err(source) => Err(Error::ObjectCreate {
            kind: kind_of::<K>(),
            source,
        }),
    }
}

/// Delete an object by name. An already-deleted object is not an error.
pub async fn delete_object<K>(api: &Api<K>, name: &str) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <K as Resource>::DynamicType: Default,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Add a finalizer to a resource.
pub async fn add_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    // Get current resource to check existing finalizers
    let resource = api.get(name).await?;
    let mut finalizers = resource.finalizers().to_vec();

    // Only add if not already present
    if !finalizers.contains(&finalizer.to_string()) {
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(
            name,
            &PatchParams::default(),
            &kube::api::Patch::Merge(&patch),
        )
        .await?;
    }
    Ok(())
}

/// Remove a specific finalizer from a resource.
pub async fn remove_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let resource = match api.get(name).await {
        Ok(r) => r,
        Err(kube::Error::Api(e)) if e.code == 404 => {
            // Resource already deleted, nothing to do
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut finalizers = resource.finalizers().to_vec();

    if let Some(pos) = finalizers.iter().position(|f| f == finalizer) {
        finalizers.remove(pos);

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(
            name,
            &PatchParams::default(),
            &kube::api::Patch::Merge(&patch),
        )
        .await?;
    }
    Ok(())
}

/// Status fields omitted from serialization when empty or unset.
const CLEARABLE_STATUS_FIELDS: &[&str] = &[
    "conditions",
    "currentVersion",
    "targetVersion",
    "observedGeneration",
];

/// JSON merge patch body writing `status` in full.
///
/// A merge patch keeps any key it does not mention, so cleared fields are
/// sent as explicit nulls to remove them from the stored status.
pub fn status_patch(status: &ClusterStatus) -> Result<serde_json::Value, Error> {
    let mut body = serde_json::to_value(status)?;
    if let Some(fields) = body.as_object_mut() {
        for key in CLEARABLE_STATUS_FIELDS {
            fields
                .entry(key.to_string())
                .or_insert(serde_json::Value::Null);
        }
    }
    Ok(serde_json::json!({ "status": body }))
}

/// Whether a pod reports the Ready condition as True.
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Split pods into ready and unready member names, sorted by name.
pub fn members_from_pods(pods: &[Pod]) -> MembersStatus {
    let mut members = MembersStatus::default();
    for pod in pods {
        if pod.metadata.deletion_timestamp.is_some() {
            continue;
        }
        let name = pod.name_any();
        if is_pod_ready(pod) {
            members.ready.push(name);
        } else {
            members.unready.push(name);
        }
    }
    members.ready.sort();
    members.unready.sort();
    members
}
