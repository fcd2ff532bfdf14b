//! AWS provider config and status embedded in machines

use super::meta::{Condition, LocalObjectReference};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag declared on the provider config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSpecification {
    pub name: String,
    pub value: String,
}

impl TagSpecification {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// A cloud resource referenced either by ID, ARN or by filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsResourceReference {
    pub id: Option<String>,
    pub arn: Option<String>,
    pub filters: Vec<Filter>,
}

impl AwsResourceReference {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn by_filter(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            filters: vec![Filter {
                name: name.into(),
                values,
            }],
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.arn.is_none() && self.filters.is_empty()
    }
}

pub const ALLOCATION_STRATEGY_USER_PROVIDED: &str = "UserProvided";
pub const ALLOCATION_STRATEGY_DYNAMIC: &str = "Dynamic";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DynamicHostAllocationSpec {
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DedicatedHost {
    /// Host to launch on when the strategy is `UserProvided`.
    pub id: String,
    /// `UserProvided` (default) or `Dynamic`.
    pub allocation_strategy: Option<String>,
    pub dynamic_host_allocation: Option<DynamicHostAllocationSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostPlacement {
    /// `AnyAvailable` or `DedicatedHost`.
    pub affinity: Option<String>,
    pub dedicated_host: Option<DedicatedHost>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Placement {
    pub region: String,
    pub availability_zone: String,
    /// `default`, `dedicated` or `host`; empty leaves it to the API.
    pub tenancy: String,
    pub host: Option<HostPlacement>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EbsBlockDeviceSpec {
    pub volume_size: Option<i64>,
    pub volume_type: Option<String>,
    pub iops: Option<i64>,
    pub throughput: Option<i64>,
    pub encrypted: Option<bool>,
    pub kms_key: AwsResourceReference,
    pub delete_on_termination: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockDeviceMappingSpec {
    /// Omitted for the root device.
    pub device_name: Option<String>,
    pub ebs: Option<EbsBlockDeviceSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadBalancerType {
    Classic,
    Network,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerReference {
    pub name: String,
    #[serde(rename = "type")]
    pub lb_type: LoadBalancerType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpotMarketOptions {
    pub max_price: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataServiceOptions {
    /// `Optional` or `Required`; empty leaves the API default.
    pub authentication: String,
}

pub const NETWORK_INTERFACE_TYPE_ENA: &str = "ENA";
pub const NETWORK_INTERFACE_TYPE_EFA: &str = "EFA";

pub const MARKET_TYPE_ON_DEMAND: &str = "OnDemand";
pub const MARKET_TYPE_SPOT: &str = "Spot";
pub const MARKET_TYPE_CAPACITY_BLOCK: &str = "CapacityBlock";

/// Desired instance configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AwsMachineProviderConfig {
    pub ami: AwsResourceReference,
    pub instance_type: String,
    pub tags: Vec<TagSpecification>,
    pub iam_instance_profile: Option<AwsResourceReference>,
    pub user_data_secret: Option<LocalObjectReference>,
    pub credentials_secret: Option<LocalObjectReference>,
    pub key_name: Option<String>,
    pub device_index: i32,
    #[serde(rename = "publicIp")]
    pub public_ip: Option<bool>,
    /// `ENA` or `EFA`.
    pub network_interface_type: String,
    pub security_groups: Vec<AwsResourceReference>,
    pub subnet: AwsResourceReference,
    pub placement: Placement,
    pub placement_group_name: String,
    pub placement_group_partition: Option<i32>,
    pub load_balancers: Vec<LoadBalancerReference>,
    pub block_devices: Vec<BlockDeviceMappingSpec>,
    pub spot_market_options: Option<SpotMarketOptions>,
    pub metadata_service_options: MetadataServiceOptions,
    /// `OnDemand`, `Spot` or `CapacityBlock`.
    pub market_type: String,
    #[serde(rename = "capacityReservationId")]
    pub capacity_reservation_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedicatedHostStatus {
    pub id: String,
}

/// Observed instance state embedded in the machine status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AwsMachineProviderStatus {
    pub instance_id: Option<String>,
    pub instance_state: Option<String>,
    pub conditions: Vec<Condition>,
    pub dedicated_host: Option<DedicatedHostStatus>,
}
