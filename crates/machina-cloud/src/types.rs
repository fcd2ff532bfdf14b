//! Request and response types exchanged with the compute API
//!
//! These mirror the subset of EC2/ELB shapes the controllers consume. Optional
//! fields stay `Option` so a request can distinguish "unset" from a zero value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exact-match describe filter (`name` matches any of `values`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Filter {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, vec![value.into()])
    }

    /// `tag:<key>` filter.
    pub fn tag(key: &str, value: impl Into<String>) -> Self {
        Self::single(format!("tag:{}", key), value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Looks up a tag value by key.
pub fn tag_value<'a>(tags: &'a [Tag], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.key == key)
        .map(|t| t.value.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaggedResourceType {
    Instance,
    Volume,
    PlacementGroup,
    DedicatedHost,
}

impl TaggedResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Volume => "volume",
            Self::PlacementGroup => "placement-group",
            Self::DedicatedHost => "dedicated-host",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagSpecification {
    pub resource_type: TaggedResourceType,
    pub tags: Vec<Tag>,
}

// ---------------------------------------------------------------------------
// Images, networking, zones
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Image {
    pub image_id: String,
    pub name: Option<String>,
    /// RFC3339 creation timestamp as reported by the API.
    pub creation_date: Option<String>,
    pub root_device_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subnet {
    pub subnet_id: String,
    pub availability_zone: Option<String>,
    pub vpc_id: Option<String>,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityGroup {
    pub group_id: String,
    pub group_name: Option<String>,
    pub tags: Vec<Tag>,
}

/// Zone type reported for wavelength zones.
pub const WAVELENGTH_ZONE_TYPE: &str = "wavelength-zone";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AvailabilityZone {
    pub zone_name: String,
    /// `availability-zone`, `local-zone` or `wavelength-zone`.
    pub zone_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vpc {
    pub vpc_id: String,
    pub dhcp_options_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DhcpConfiguration {
    pub key: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DhcpOptions {
    pub dhcp_options_id: String,
    pub configurations: Vec<DhcpConfiguration>,
}

// ---------------------------------------------------------------------------
// Placement groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementGroupInfo {
    pub group_name: String,
    pub group_id: Option<String>,
    /// Lowercase strategy: `cluster`, `partition` or `spread`.
    pub strategy: Option<String>,
    pub partition_count: Option<i32>,
    pub state: Option<String>,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePlacementGroupRequest {
    pub group_name: String,
    pub strategy: String,
    pub partition_count: Option<i32>,
    pub tags: Vec<Tag>,
}

// ---------------------------------------------------------------------------
// Instance types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceTypeInfo {
    pub instance_type: String,
    pub default_vcpus: Option<i64>,
    pub memory_mib: Option<i64>,
    /// Per-device GPU counts.
    pub gpu_counts: Vec<i64>,
    /// e.g. `x86_64`, `arm64`, `i386`.
    pub supported_architectures: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceTypesPage {
    pub instance_types: Vec<InstanceTypeInfo>,
    pub next_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstanceStateName {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    Other(String),
}

impl InstanceStateName {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Other(s) => s,
        }
    }

    /// States other than `terminated`.
    pub fn live_states() -> Vec<String> {
        [
            Self::Pending,
            Self::Running,
            Self::ShuttingDown,
            Self::Stopping,
            Self::Stopped,
        ]
        .iter()
        .map(|s| s.as_str().to_string())
        .collect()
    }
}

impl From<&str> for InstanceStateName {
    fn from(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for InstanceStateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceNetworkInterface {
    /// `in-use`, `available`, ...
    pub status: Option<String>,
    pub private_ip_addresses: Vec<String>,
    pub ipv6_addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Instance {
    pub instance_id: String,
    pub image_id: Option<String>,
    pub instance_type: Option<String>,
    pub state: Option<InstanceStateName>,
    pub launch_time: Option<DateTime<Utc>>,
    pub private_ip_address: Option<String>,
    pub public_ip_address: Option<String>,
    pub private_dns_name: Option<String>,
    pub public_dns_name: Option<String>,
    pub subnet_id: Option<String>,
    pub vpc_id: Option<String>,
    pub availability_zone: Option<String>,
    pub placement_group_name: Option<String>,
    pub host_id: Option<String>,
    pub tags: Vec<Tag>,
    pub network_interfaces: Vec<InstanceNetworkInterface>,
}

impl Instance {
    pub fn state_name(&self) -> &str {
        self.state.as_ref().map(|s| s.as_str()).unwrap_or("unknown")
    }

    pub fn is_terminated(&self) -> bool {
        self.state == Some(InstanceStateName::Terminated)
    }

    pub fn is_running(&self) -> bool {
        self.state == Some(InstanceStateName::Running)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceStateChange {
    pub instance_id: String,
    pub previous_state: Option<InstanceStateName>,
    pub current_state: Option<InstanceStateName>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Volume {
    pub volume_id: String,
}

// ---------------------------------------------------------------------------
// RunInstances
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkInterfaceSpec {
    pub device_index: i32,
    pub subnet_id: Option<String>,
    pub groups: Vec<String>,
    pub associate_public_ip_address: Option<bool>,
    pub associate_carrier_ip_address: Option<bool>,
    /// `interface` or `efa`.
    pub interface_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placement {
    pub availability_zone: Option<String>,
    pub tenancy: Option<String>,
    pub group_name: Option<String>,
    pub partition_number: Option<i32>,
    pub host_id: Option<String>,
    /// `default` or `host`.
    pub affinity: Option<String>,
}

impl Placement {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EbsBlockDevice {
    pub volume_size: Option<i32>,
    pub volume_type: Option<String>,
    pub iops: Option<i32>,
    pub throughput: Option<i32>,
    pub encrypted: Option<bool>,
    pub kms_key_id: Option<String>,
    pub delete_on_termination: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockDeviceMapping {
    pub device_name: String,
    pub ebs: EbsBlockDevice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketType {
    Spot,
    CapacityBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionBehavior {
    Terminate,
    Stop,
    Hibernate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotInstanceType {
    OneTime,
    Persistent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotOptions {
    pub instance_interruption_behavior: InterruptionBehavior,
    pub spot_instance_type: SpotInstanceType,
    pub max_price: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceMarketOptions {
    pub market_type: MarketType,
    pub spot_options: Option<SpotOptions>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapacityReservationSpec {
    pub capacity_reservation_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpTokens {
    Optional,
    Required,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataOptions {
    pub http_tokens: HttpTokens,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunInstancesRequest {
    pub image_id: String,
    pub instance_type: String,
    pub min_count: i32,
    pub max_count: i32,
    pub key_name: Option<String>,
    pub iam_instance_profile_name: Option<String>,
    pub tag_specifications: Vec<TagSpecification>,
    pub network_interfaces: Vec<NetworkInterfaceSpec>,
    /// Base64-encoded user data.
    pub user_data: Option<String>,
    pub placement: Option<Placement>,
    pub block_device_mappings: Vec<BlockDeviceMapping>,
    pub market_options: Option<InstanceMarketOptions>,
    pub capacity_reservation: Option<CapacityReservationSpec>,
    pub metadata_options: Option<MetadataOptions>,
}

// ---------------------------------------------------------------------------
// Dedicated hosts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AllocateHostsRequest {
    pub instance_type: String,
    pub availability_zone: String,
    pub quantity: i32,
    pub auto_placement: bool,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnsuccessfulItem {
    pub resource_id: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleaseHostsOutput {
    pub successful: Vec<String>,
    pub unsuccessful: Vec<UnsuccessfulItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Host {
    pub host_id: String,
    /// `available`, `under-assessment`, `released`, ...
    pub state: Option<String>,
    pub availability_zone: Option<String>,
    pub instance_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Load balancers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadBalancerInfo {
    pub name: String,
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetType {
    Instance,
    Ip,
    Other(String),
}

impl From<&str> for TargetType {
    fn from(value: &str) -> Self {
        match value {
            "instance" => Self::Instance,
            "ip" => Self::Ip,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetGroup {
    pub arn: String,
    pub target_type: TargetType,
}
