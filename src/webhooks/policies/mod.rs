//! Validation policies for NautilusCluster and EcsCluster admission webhooks.
//!
//! Policies are organized into tiers:
//! - Tier 1 (Critical): Always enforced (replica bounds, tolerations)
//! - Tier 2 (Update): Only enforced on UPDATE operations (immutability)

pub mod immutability;
pub mod replicas;
pub mod tolerations;

use crate::crd::{EcsCluster, NautilusCluster};

/// Result of a validation check
#[derive(Debug)]
pub struct ValidationResult {
    /// Whether the validation passed
    pub allowed: bool,
    /// Reason for denial (if not allowed)
    pub reason: Option<String>,
    /// Detailed message (if not allowed)
    pub message: Option<String>,
}

impl ValidationResult {
    /// Create an allowed result
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    /// Create a denied result
    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}

/// Context for validation
pub struct ValidationContext<'a, K> {
    /// The resource being validated
    pub resource: &'a K,
    /// The old resource (for UPDATE operations)
    pub old_resource: Option<&'a K>,
    /// Whether this is a dry-run request
    pub dry_run: bool,
    /// The namespace of the resource
    pub namespace: Option<&'a str>,
}

impl<K> ValidationContext<'_, K> {
    /// Check if this is an UPDATE operation
    pub fn is_update(&self) -> bool {
        self.old_resource.is_some()
    }
}

/// Run all NautilusCluster policies
pub fn validate_nautilus_cluster(ctx: &ValidationContext<'_, NautilusCluster>) -> ValidationResult {
    let result = replicas::validate(ctx);
    if !result.allowed {
        return result;
    }

    if ctx.is_update() {
        let result = immutability::validate_nautilus(ctx);
        if !result.allowed {
            return result;
        }
    }

    ValidationResult::allowed()
}

/// Run all EcsCluster policies
pub fn validate_ecs_cluster(ctx: &ValidationContext<'_, EcsCluster>) -> ValidationResult {
    let result = tolerations::validate(ctx);
    if !result.allowed {
        return result;
    }

    if ctx.is_update() {
        let result = immutability::validate_ecs(ctx);
        if !result.allowed {
            return result;
        }
    }

    ValidationResult::allowed()
}
