//! Default merging for partially specified cluster specs.
//!
//! Every level of a spec hierarchy implements [`WithDefaults`]. A parent
//! defaults its nested structures first, then its own scalar fields, and
//! reports `true` if anything at any level was written.
//!
//! Rule for the `mutated` flag: any write flags it, including normalizing an
//! absent options map to an empty one. A second pass over a defaulted spec
//! therefore always reports `false`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaimSpec, ResourceRequirements, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Knobs threaded through every defaulting call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DefaultingConfig {
    /// Clamp replica counts up to each component's minimum.
    /// Disabled for test and development deployments.
    pub enforce_minimum_replicas: bool,
}

impl Default for DefaultingConfig {
    fn default() -> Self {
        Self {
            enforce_minimum_replicas: true,
        }
    }
}

impl DefaultingConfig {
    /// Configuration for test/dev clusters, where minimums are not enforced.
    pub fn test_mode() -> Self {
        Self {
            enforce_minimum_replicas: false,
        }
    }
}

/// Fill unset fields with documented defaults.
pub trait WithDefaults {
    /// Returns `true` when any field was changed.
    fn with_defaults(&mut self, config: &DefaultingConfig) -> bool;
}

/// Allocate an absent nested structure and default it.
pub fn default_nested<T>(slot: &mut Option<T>, config: &DefaultingConfig) -> bool
where
    T: WithDefaults + Default,
{
    let mut changed = false;
    if slot.is_none() {
        *slot = Some(T::default());
        changed = true;
    }
    match slot {
        Some(inner) => inner.with_defaults(config) || changed,
        None => changed,
    }
}

/// Populate an absent value.
pub fn default_if_absent<T>(slot: &mut Option<T>, make: impl FnOnce() -> T) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(make());
    true
}

/// Replace an empty string with a default.
pub fn default_if_empty(field: &mut String, value: &str) -> bool {
    if !field.is_empty() {
        return false;
    }
    *field = value.to_string();
    true
}

/// Replace a zero number with a default.
pub fn default_if_zero(field: &mut i32, value: i32) -> bool {
    if *field != 0 {
        return false;
    }
    *field = value;
    true
}

/// Clamp a replica count up to `minimum` unless minimums are disabled.
pub fn enforce_minimum(replicas: &mut i32, minimum: i32, config: &DefaultingConfig) -> bool {
    if !config.enforce_minimum_replicas || *replicas >= minimum {
        return false;
    }
    *replicas = minimum;
    true
}

/// Normalize an absent options map to an empty one.
pub fn default_options(options: &mut Option<BTreeMap<String, String>>) -> bool {
    default_if_absent(options, BTreeMap::new)
}

/// Build resource requirements from request and limit quantities.
pub fn resource_requirements(
    request_cpu: &str,
    request_memory: &str,
    limit_cpu: &str,
    limit_memory: &str,
) -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(request_cpu.to_string())),
            ("memory".to_string(), Quantity(request_memory.to_string())),
        ])),
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(limit_cpu.to_string())),
            ("memory".to_string(), Quantity(limit_memory.to_string())),
        ])),
        ..Default::default()
    }
}

/// Build a ReadWriteOnce volume claim template requesting `size`.
pub fn volume_claim_spec(size: &str) -> PersistentVolumeClaimSpec {
    PersistentVolumeClaimSpec {
        access_modes: Some(vec!["ReadWriteOnce".to_string()]),
        resources: Some(VolumeResourceRequirements {
            requests: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity(size.to_string()),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Container image coordinates.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Image repository.
    #[serde(default)]
    pub repository: String,

    /// Image tag.
    #[serde(default)]
    pub tag: String,

    /// Image pull policy (Always, IfNotPresent or Never).
    #[serde(default)]
    pub pull_policy: String,
}

/// Per-component image defaults.
#[derive(Clone, Copy, Debug)]
pub struct ImageDefaults {
    pub repository: &'static str,
    pub tag: &'static str,
    pub pull_policy: &'static str,
}

impl ImageSpec {
    /// Fill empty coordinates from `defaults`.
    pub fn with_image_defaults(&mut self, defaults: &ImageDefaults) -> bool {
        let mut changed = default_if_empty(&mut self.repository, defaults.repository);
        changed |= default_if_empty(&mut self.tag, defaults.tag);
        changed |= default_if_empty(&mut self.pull_policy, defaults.pull_policy);
        changed
    }

    /// Docker-compatible `repository:tag` reference.
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}
