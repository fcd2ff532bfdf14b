//! AWSPlacementGroup resource

use super::meta::{Condition, LocalObjectReference, ObjectMeta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Finalizer guarding placement group cleanup.
pub const PLACEMENT_GROUP_FINALIZER: &str = "awsplacementgroup.machine.openshift.io";

/// Condition type tracking readiness of the backing group.
pub const READY_CONDITION: &str = "Ready";
/// Condition type set when deletion failed.
pub const DELETING_CONDITION: &str = "Deleting";

pub const REASON_CREATION_SUCCEEDED: &str = "CreationSucceeded";
pub const REASON_CREATION_FAILED: &str = "CreationFailed";
pub const REASON_DELETION_FAILED: &str = "DeletionFailed";
pub const REASON_CONFIGURATION_MISMATCH: &str = "ConfigurationMismatch";
pub const REASON_CONFIGURATION_IN_SYNC: &str = "ConfigurationInSync";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AwsPlacementGroup {
    pub metadata: ObjectMeta,
    pub spec: AwsPlacementGroupSpec,
    pub status: AwsPlacementGroupStatus,
}

impl AwsPlacementGroup {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagementState {
    #[default]
    Managed,
    Unmanaged,
}

impl fmt::Display for ManagementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Managed => write!(f, "Managed"),
            Self::Unmanaged => write!(f, "Unmanaged"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementGroupType {
    Cluster,
    Partition,
    Spread,
}

impl PlacementGroupType {
    /// Strategy name on the wire.
    pub fn strategy(&self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::Partition => "partition",
            Self::Spread => "spread",
        }
    }

    pub fn from_strategy(strategy: &str) -> Option<Self> {
        match strategy {
            "cluster" => Some(Self::Cluster),
            "partition" => Some(Self::Partition),
            "spread" => Some(Self::Spread),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionSpec {
    /// 1 to 7; `None` leaves the count to the API.
    pub count: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedPlacementGroup {
    pub group_type: PlacementGroupType,
    #[serde(default)]
    pub partition: Option<PartitionSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagementSpec {
    pub management_state: ManagementState,
    /// Required when the state is `Managed`.
    pub managed: Option<ManagedPlacementGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AwsPlacementGroupSpec {
    pub credentials_secret: Option<LocalObjectReference>,
    pub management_spec: ManagementSpec,
}

/// Snapshot of the group as last described.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedConfiguration {
    pub group_type: PlacementGroupType,
    #[serde(default)]
    pub partition: Option<PartitionSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AwsPlacementGroupStatus {
    pub management_state: Option<ManagementState>,
    pub observed_configuration: Option<ObservedConfiguration>,
    /// The observed configuration is refreshed once this passes.
    pub expires_at: Option<DateTime<Utc>>,
    pub conditions: Vec<Condition>,
}
