//! Immutability validation policy.
//!
//! Tier 2 (Update): Only enforced on UPDATE operations
//!
//! Validates:
//! - NautilusCluster `zookeeperUri` cannot change once set
//! - EcsCluster resource `namespace` cannot change once set

use super::{ValidationContext, ValidationResult};
use crate::crd::{EcsCluster, NautilusCluster};

/// An empty old value was never persisted by the defaulting pass, so setting it is allowed.
fn changed(old: &str, new: &str) -> bool {
    !old.is_empty() && old != new
}

/// Validate NautilusCluster immutability constraints
pub fn validate_nautilus(ctx: &ValidationContext<'_, NautilusCluster>) -> ValidationResult {
    let Some(old) = ctx.old_resource else {
        return ValidationResult::allowed();
    };

    let (old_uri, new_uri) = (&old.spec.zookeeper_uri, &ctx.resource.spec.zookeeper_uri);
    if changed(old_uri, new_uri) {
        return ValidationResult::denied(
            "ImmutableField",
            &format!("spec.zookeeperUri cannot be changed (from {old_uri:?} to {new_uri:?})"),
        );
    }

    ValidationResult::allowed()
}

/// Validate EcsCluster immutability constraints
pub fn validate_ecs(ctx: &ValidationContext<'_, EcsCluster>) -> ValidationResult {
    let Some(old) = ctx.old_resource else {
        return ValidationResult::allowed();
    };

    let (old_ns, new_ns) = (&old.spec.namespace, &ctx.resource.spec.namespace);
    if changed(old_ns, new_ns) {
        return ValidationResult::denied(
            "ImmutableField",
            &format!("spec.namespace cannot be changed (from {old_ns:?} to {new_ns:?})"),
        );
    }

    ValidationResult::allowed()
}
