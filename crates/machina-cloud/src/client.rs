//! Cloud client capability trait

use crate::error::Result;
use crate::types::*;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Compute API capability interface
///
/// One method per cloud operation the controllers use. Implementations map
/// transport failures onto [`crate::CloudError`] so that callers can tell a
/// not-found answer from misconfiguration and from transient failures.
#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn describe_images(&self, image_ids: &[String], filters: &[Filter]) -> Result<Vec<Image>>;

    async fn describe_subnets(&self, subnet_ids: &[String], filters: &[Filter]) -> Result<Vec<Subnet>>;

    async fn describe_security_groups(
        &self,
        group_ids: &[String],
        filters: &[Filter],
    ) -> Result<Vec<SecurityGroup>>;

    async fn describe_availability_zones(&self, zone_names: &[String]) -> Result<Vec<AvailabilityZone>>;

    async fn describe_vpcs(&self, vpc_ids: &[String]) -> Result<Vec<Vpc>>;

    async fn describe_dhcp_options(&self, dhcp_options_ids: &[String]) -> Result<Vec<DhcpOptions>>;

    async fn describe_placement_groups(&self, group_names: &[String]) -> Result<Vec<PlacementGroupInfo>>;

    async fn create_placement_group(&self, request: CreatePlacementGroupRequest) -> Result<PlacementGroupInfo>;

    async fn delete_placement_group(&self, group_name: &str) -> Result<()>;

    /// One page of instance type offerings; pass the previous page's token to continue.
    async fn describe_instance_types(&self, next_token: Option<String>) -> Result<InstanceTypesPage>;

    async fn run_instances(&self, request: RunInstancesRequest) -> Result<Vec<Instance>>;

    async fn describe_instances(&self, instance_ids: &[String], filters: &[Filter]) -> Result<Vec<Instance>>;

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<Vec<InstanceStateChange>>;

    async fn describe_volumes(&self, filters: &[Filter]) -> Result<Vec<Volume>>;

    async fn create_tags(&self, resource_ids: &[String], tags: &[Tag]) -> Result<()>;

    async fn allocate_hosts(&self, request: AllocateHostsRequest) -> Result<Vec<String>>;

    async fn release_hosts(&self, host_ids: &[String]) -> Result<ReleaseHostsOutput>;

    async fn describe_hosts(&self, host_ids: &[String]) -> Result<Vec<Host>>;

    /// Registers instances with a classic load balancer.
    async fn register_instances_with_load_balancer(
        &self,
        load_balancer_name: &str,
        instance_ids: &[String],
    ) -> Result<()>;

    async fn describe_load_balancers(&self, names: &[String]) -> Result<Vec<LoadBalancerInfo>>;

    async fn describe_target_groups(&self, load_balancer_arn: &str) -> Result<Vec<TargetGroup>>;

    async fn register_targets(&self, target_group_arn: &str, target_ids: &[String]) -> Result<()>;

    async fn deregister_targets(&self, target_group_arn: &str, target_ids: &[String]) -> Result<()>;
}

/// Long-lived access key pair held in memory only.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Everything needed to construct a client for one reconcile cycle.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub region: String,
    /// `None` falls back to the ambient credential chain.
    pub credentials: Option<StaticCredentials>,
    /// Service name (`ec2`, `elasticloadbalancing`) to endpoint URL.
    pub endpoints: BTreeMap<String, String>,
}

/// Constructs cloud clients.
#[async_trait]
pub trait ClientBuilder: Send + Sync {
    async fn build(&self, options: ClientOptions) -> Result<Arc<dyn CloudClient>>;
}
