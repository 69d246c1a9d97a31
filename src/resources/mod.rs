//! Resource generation module.
//!
//! Pure functions translating a defaulted cluster spec into the Kubernetes
//! objects the controllers apply.
//!
//! ## NautilusCluster
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | StatefulSet | Bookies, Nautilus nodes |
//! | Deployment | Nautilus controllers |
//! | Headless Service | Bookie and node discovery |
//! | Service | Controller endpoint |
//! | ConfigMap | Component environment |
//! | PodDisruptionBudget | One bookie down at a time |
//!
//! ## EcsCluster
//!
//! See [`ecs`].

pub mod bookie;
pub mod common;
pub mod ecs;
pub mod nautilus_controller;
pub mod nautilus_node;

// Re-export commonly used items from common
pub use common::{owner_reference, standard_labels};
