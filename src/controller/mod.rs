//! Controller module for nautilus-operator.
//!
//! Contains the reconciliation loops, error handling, status management and
//! validation logic.
//!
//! This module supports two controllers:
//! - NautilusCluster controller (`nautilus_reconciler`)
//! - EcsCluster controller (`ecs_reconciler`)

// Shared modules
pub mod common;
pub mod context;
pub mod error;
pub mod status;
pub mod validation;

pub mod ecs_reconciler;
pub mod nautilus_reconciler;
