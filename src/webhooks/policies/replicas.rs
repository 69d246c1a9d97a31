//! Replica count validation policy for NautilusCluster.
//!
//! Tier 1 (Critical): Always enforced
//!
//! Zero means "use the default", so only negative counts and counts above
//! the per-component maximum are rejected. Minimums are applied by defaulting.

use super::{ValidationContext, ValidationResult};
use crate::controller::validation::validate_nautilus_spec;
use crate::crd::NautilusCluster;

/// Validate bookie, controller and node replica counts
pub fn validate(ctx: &ValidationContext<'_, NautilusCluster>) -> ValidationResult {
    match validate_nautilus_spec(&ctx.resource.spec) {
        Ok(()) => ValidationResult::allowed(),
        Err(e) => ValidationResult::denied("InvalidReplicas", &e.to_string()),
    }
}
