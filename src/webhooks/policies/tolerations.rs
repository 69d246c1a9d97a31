//! EcsCluster spec policy.
//!
//! Tier 1 (Critical): Always enforced

use super::{ValidationContext, ValidationResult};
use crate::controller::validation::{ValidationError, validate_ecs_spec};
use crate::crd::EcsCluster;

/// Validate tolerations and ingress settings
pub fn validate(ctx: &ValidationContext<'_, EcsCluster>) -> ValidationResult {
    match validate_ecs_spec(&ctx.resource.spec) {
        Ok(()) => ValidationResult::allowed(),
        Err(e @ ValidationError::TolerationValue { .. }) => {
            ValidationResult::denied("InvalidToleration", &e.to_string())
        }
        Err(e) => ValidationResult::denied("InvalidSpec", &e.to_string()),
    }
}
