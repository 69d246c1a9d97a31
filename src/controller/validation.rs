//! Validation logic for cluster specs.
//!
//! Validation is a precondition check run before resources are generated.
//! It is separate from defaulting, which never fails.

use k8s_openapi::api::core::v1::Toleration;
use thiserror::Error;

use crate::crd::{EcsClusterSpec, NautilusClusterSpec};

/// Maximum number of bookies accepted.
pub const MAX_BOOKKEEPER_REPLICAS: i32 = 100;

/// Maximum number of Nautilus controller or node replicas accepted.
pub const MAX_NAUTILUS_REPLICAS: i32 = 100;

/// Errors raised by spec validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A toleration with the `Exists` operator carries a value.
    #[error("key({key}): toleration value must be empty when `operator` is 'Exists'")]
    TolerationValue { key: String },

    /// A replica count is out of bounds.
    #[error("{field} must be between {min} and {max} (got {value})")]
    ReplicasOutOfRange {
        field: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },

    /// A field that must be set is empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Reject tolerations that use the `Exists` operator together with a value.
pub fn validate_tolerations(tolerations: &[Toleration]) -> Result<(), ValidationError> {
    for toleration in tolerations {
        let exists = toleration.operator.as_deref() == Some("Exists");
        let has_value = toleration.value.as_deref().is_some_and(|v| !v.is_empty());
        if exists && has_value {
            return Err(ValidationError::TolerationValue {
                key: toleration.key.clone().unwrap_or_default(),
            });
        }
    }
    Ok(())
}

fn validate_range(
    field: &'static str,
    value: i32,
    min: i32,
    max: i32,
) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::ReplicasOutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Validate a NautilusCluster spec.
///
/// Replica lower bounds are only checked against zero here: the defaulting
/// pass owns the per-component minimums, which test mode relaxes.
pub fn validate_nautilus_spec(spec: &NautilusClusterSpec) -> Result<(), ValidationError> {
    if let Some(bk) = &spec.bookkeeper {
        validate_range(
            "spec.bookkeeper.replicas",
            bk.replicas,
            0,
            MAX_BOOKKEEPER_REPLICAS,
        )?;
    }
    if let Some(nautilus) = &spec.nautilus {
        validate_range(
            "spec.nautilus.controllerReplicas",
            nautilus.controller_replicas,
            0,
            MAX_NAUTILUS_REPLICAS,
        )?;
        validate_range(
            "spec.nautilus.nodeReplicas",
            nautilus.node_replicas,
            0,
            MAX_NAUTILUS_REPLICAS,
        )?;
    }
    Ok(())
}

/// Validate an EcsCluster spec.
pub fn validate_ecs_spec(spec: &EcsClusterSpec) -> Result<(), ValidationError> {
    validate_tolerations(&spec.tolerations)?;
    if spec.ingress.enable && spec.ingress.hostname.is_empty() {
        return Err(ValidationError::Empty("spec.ingress.hostname"));
    }
    Ok(())
}
