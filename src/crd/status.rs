//! Status types shared by NautilusCluster and EcsCluster.
//!
//! The serialized layout of `status.conditions` is read by existing tooling,
//! so field names and omission rules here must stay stable.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kinds of condition tracked on a cluster resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ClusterConditionType {
    /// Every pod managed for the cluster reports Ready.
    PodsReady,
    /// The cluster is rolling towards `targetVersion`.
    Upgrading,
}

impl std::fmt::Display for ClusterConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterConditionType::PodsReady => write!(f, "PodsReady"),
            ClusterConditionType::Upgrading => write!(f, "Upgrading"),
        }
    }
}

/// Tri-state condition status, following Kubernetes API conventions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// Current condition of a cluster.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    /// Type of cluster condition.
    pub r#type: ClusterConditionType,

    /// Status of the condition, one of True, False, Unknown.
    pub status: ConditionStatus,

    /// The reason for the condition's last transition.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// A human readable message indicating details about the transition.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// The last time this condition was updated.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_update_time: String,

    /// Last time the condition transitioned from one status to another.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_transition_time: String,
}

impl ClusterCondition {
    /// Build a condition with blank timestamps.
    ///
    /// Timestamps are only stamped by the tracker when an existing entry changes.
    pub fn new(
        condition_type: ClusterConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> Self {
        Self {
            r#type: condition_type,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_update_time: String::new(),
            last_transition_time: String::new(),
        }
    }
}

/// Ready and unready member lists of a cluster.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct MembersStatus {
    #[serde(default)]
    pub ready: Vec<String>,
    #[serde(default)]
    pub unready: Vec<String>,
}

/// Observed state of a cluster resource.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Conditions list all the applied conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ClusterCondition>,

    /// The current cluster version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_version: String,

    /// The version the cluster is upgrading to; empty when not upgrading.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_version: String,

    /// Number of desired replicas in the cluster.
    #[serde(default)]
    pub replicas: i32,

    /// Number of current replicas in the cluster.
    #[serde(default)]
    pub current_replicas: i32,

    /// Number of ready replicas in the cluster.
    #[serde(default)]
    pub ready_replicas: i32,

    /// Cluster members split by readiness.
    #[serde(default)]
    pub members: MembersStatus,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
