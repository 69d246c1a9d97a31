//! Custom Resource Definitions (CRDs) for nautilus-operator.
//!
//! - `NautilusCluster`: BookKeeper ensemble plus Nautilus controller and nodes
//! - `EcsCluster`: ECS storage nodes with optional CSI, ingress and fencing
//!
//! Both share the `ClusterStatus` layout and the default merging helpers.

pub mod defaults;
mod ecs_cluster;
mod nautilus_cluster;
mod status;

pub use defaults::{DefaultingConfig, ImageSpec, WithDefaults};
pub use ecs_cluster::*;
pub use nautilus_cluster::*;
pub use status::*;
