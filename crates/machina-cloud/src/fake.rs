//! Deterministic in-memory compute API
//!
//! `FakeCloud` keeps every resource in a mutex-guarded state table, applies
//! describe filters with exact-match semantics, and records each call so tests
//! can assert on call counts and the exact requests sent.

use crate::client::{ClientBuilder, ClientOptions, CloudClient};
use crate::error::{CloudError, Result};
use crate::types::*;
use async_trait::async_trait;
use chrono::DateTime;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Identifiers used by the default fixture.
pub mod stub {
    pub const CLUSTER_ID: &str = "aws-actuator-cluster";
    pub const MACHINE_NAME: &str = "aws-actuator-testing-machine";
    pub const REGION: &str = "us-east-1";
    pub const AVAILABILITY_ZONE: &str = "us-east-1a";
    pub const WAVELENGTH_ZONE: &str = "us-east-1-wl1-nyc-wlz-1";
    pub const AMI_ID: &str = "ami-a9acbbd6";
    pub const SUBNET_ID: &str = "subnet-0e56b13a64ff8a941";
    pub const WAVELENGTH_SUBNET_ID: &str = "subnet-0a1b2c3d4e5f60718";
    pub const SECURITY_GROUP_ID: &str = "sg-05acc3c38a35ce63b";
    pub const VPC_ID: &str = "vpc-0b5d3d8d1e7a3c2f1";
    pub const DHCP_OPTIONS_ID: &str = "dopt-0c1d2e3f4a5b6c7d8";
    pub const INSTANCE_TYPE: &str = "m4.xlarge";
    pub const ROOT_DEVICE_NAME: &str = "/dev/xvda";
}

#[derive(Default)]
struct FakeState {
    images: Vec<Image>,
    subnets: Vec<Subnet>,
    security_groups: Vec<SecurityGroup>,
    zones: Vec<AvailabilityZone>,
    vpcs: Vec<Vpc>,
    dhcp_options: Vec<DhcpOptions>,
    placement_groups: Vec<PlacementGroupInfo>,
    instance_type_pages: Vec<Vec<InstanceTypeInfo>>,
    instances: Vec<Instance>,
    /// (attached instance id, volume)
    volumes: Vec<(String, Volume)>,
    hosts: Vec<Host>,
    load_balancers: Vec<LoadBalancerInfo>,
    target_groups: HashMap<String, Vec<TargetGroup>>,
    targets: HashMap<String, Vec<String>>,
    classic_registrations: HashMap<String, Vec<String>>,
    /// One-shot failures keyed by operation name.
    failures: HashMap<String, CloudError>,
    release_failures: HashMap<String, String>,
    launch_state: Option<InstanceStateName>,
    calls: Vec<String>,
    run_requests: Vec<RunInstancesRequest>,
    create_tags_calls: Vec<(Vec<String>, Vec<Tag>)>,
    create_placement_group_requests: Vec<CreatePlacementGroupRequest>,
    allocate_requests: Vec<AllocateHostsRequest>,
    next_id: u64,
}

impl FakeState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Records the call and fires any injected failure for it.
    fn enter(&mut self, operation: &str) -> Result<()> {
        self.calls.push(operation.to_string());
        match self.failures.remove(operation) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub struct FakeCloud {
    state: Mutex<FakeState>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    /// An empty cloud.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
        }
    }

    /// A cloud seeded with the [`stub`] AMI, subnets, zones, security group and VPC.
    pub fn with_defaults() -> Self {
        let cloud = Self::new();
        cloud.add_image(Image {
            image_id: stub::AMI_ID.to_string(),
            name: Some("rhcos-stub".to_string()),
            creation_date: Some("2024-01-10T08:00:00.000Z".to_string()),
            root_device_name: Some(stub::ROOT_DEVICE_NAME.to_string()),
        });
        cloud.add_zone(AvailabilityZone {
            zone_name: stub::AVAILABILITY_ZONE.to_string(),
            zone_type: Some("availability-zone".to_string()),
        });
        cloud.add_zone(AvailabilityZone {
            zone_name: stub::WAVELENGTH_ZONE.to_string(),
            zone_type: Some(WAVELENGTH_ZONE_TYPE.to_string()),
        });
        cloud.add_subnet(Subnet {
            subnet_id: stub::SUBNET_ID.to_string(),
            availability_zone: Some(stub::AVAILABILITY_ZONE.to_string()),
            vpc_id: Some(stub::VPC_ID.to_string()),
            tags: vec![Tag::new("Name", "aws-actuator-cluster-private-us-east-1a")],
        });
        cloud.add_subnet(Subnet {
            subnet_id: stub::WAVELENGTH_SUBNET_ID.to_string(),
            availability_zone: Some(stub::WAVELENGTH_ZONE.to_string()),
            vpc_id: Some(stub::VPC_ID.to_string()),
            tags: vec![Tag::new("Name", "aws-actuator-cluster-wavelength")],
        });
        cloud.add_security_group(SecurityGroup {
            group_id: stub::SECURITY_GROUP_ID.to_string(),
            group_name: Some("aws-actuator-cluster-worker-sg".to_string()),
            tags: vec![Tag::new("Name", "aws-actuator-cluster-worker-sg")],
        });
        cloud.add_vpc(Vpc {
            vpc_id: stub::VPC_ID.to_string(),
            dhcp_options_id: Some(stub::DHCP_OPTIONS_ID.to_string()),
        });
        cloud.add_dhcp_options(DhcpOptions {
            dhcp_options_id: stub::DHCP_OPTIONS_ID.to_string(),
            configurations: vec![DhcpConfiguration {
                key: "domain-name".to_string(),
                values: vec!["ec2.internal".to_string()],
            }],
        });
        cloud
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- seeding ----------------------------------------------------------

    pub fn add_image(&self, image: Image) {
        self.state().images.push(image);
    }

    pub fn add_subnet(&self, subnet: Subnet) {
        self.state().subnets.push(subnet);
    }

    pub fn add_security_group(&self, group: SecurityGroup) {
        self.state().security_groups.push(group);
    }

    pub fn add_zone(&self, zone: AvailabilityZone) {
        self.state().zones.push(zone);
    }

    pub fn add_vpc(&self, vpc: Vpc) {
        self.state().vpcs.push(vpc);
    }

    pub fn add_dhcp_options(&self, options: DhcpOptions) {
        self.state().dhcp_options.push(options);
    }

    pub fn add_placement_group(&self, group: PlacementGroupInfo) {
        self.state().placement_groups.push(group);
    }

    pub fn add_instance(&self, instance: Instance) {
        self.state().instances.push(instance);
    }

    pub fn add_host(&self, host: Host) {
        self.state().hosts.push(host);
    }

    /// Each call adds one page to the `DescribeInstanceTypes` listing.
    pub fn add_instance_type_page(&self, page: Vec<InstanceTypeInfo>) {
        self.state().instance_type_pages.push(page);
    }

    pub fn add_load_balancer(&self, lb: LoadBalancerInfo, target_groups: Vec<TargetGroup>) {
        let mut state = self.state();
        state.target_groups.insert(lb.arn.clone(), target_groups);
        state.load_balancers.push(lb);
    }

    /// State new instances start in (default `pending`).
    pub fn set_launch_state(&self, state: InstanceStateName) {
        self.state().launch_state = Some(state);
    }

    pub fn set_instance_state(&self, instance_id: &str, new_state: InstanceStateName) {
        let mut state = self.state();
        if let Some(instance) = state.instances.iter_mut().find(|i| i.instance_id == instance_id) {
            instance.state = Some(new_state);
        }
    }

    /// Drops an instance as if the API stopped listing it.
    pub fn remove_instance(&self, instance_id: &str) {
        self.state().instances.retain(|i| i.instance_id != instance_id);
    }

    pub fn set_instance_tags(&self, instance_id: &str, tags: Vec<Tag>) {
        let mut state = self.state();
        if let Some(instance) = state.instances.iter_mut().find(|i| i.instance_id == instance_id) {
            instance.tags = tags;
        }
    }

    /// Makes the next call to `operation` fail with `err`.
    pub fn fail_next(&self, operation: &str, err: CloudError) {
        self.state().failures.insert(operation.to_string(), err);
    }

    /// Makes `ReleaseHosts` report `host_id` as unsuccessful.
    pub fn fail_release(&self, host_id: &str, message: &str) {
        self.state()
            .release_failures
            .insert(host_id.to_string(), message.to_string());
    }

    pub fn clear_release_failures(&self) {
        self.state().release_failures.clear();
    }

    // -- inspection -------------------------------------------------------

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == operation).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn run_requests(&self) -> Vec<RunInstancesRequest> {
        self.state().run_requests.clone()
    }

    pub fn create_tags_calls(&self) -> Vec<(Vec<String>, Vec<Tag>)> {
        self.state().create_tags_calls.clone()
    }

    pub fn create_placement_group_requests(&self) -> Vec<CreatePlacementGroupRequest> {
        self.state().create_placement_group_requests.clone()
    }

    pub fn allocate_requests(&self) -> Vec<AllocateHostsRequest> {
        self.state().allocate_requests.clone()
    }

    pub fn instances(&self) -> Vec<Instance> {
        self.state().instances.clone()
    }

    pub fn instance(&self, instance_id: &str) -> Option<Instance> {
        self.state()
            .instances
            .iter()
            .find(|i| i.instance_id == instance_id)
            .cloned()
    }

    pub fn placement_group(&self, name: &str) -> Option<PlacementGroupInfo> {
        self.state()
            .placement_groups
            .iter()
            .find(|g| g.group_name == name)
            .cloned()
    }

    pub fn host(&self, host_id: &str) -> Option<Host> {
        self.state().hosts.iter().find(|h| h.host_id == host_id).cloned()
    }

    pub fn registered_targets(&self, target_group_arn: &str) -> Vec<String> {
        self.state()
            .targets
            .get(target_group_arn)
            .cloned()
            .unwrap_or_default()
    }

    pub fn classic_registrations(&self, load_balancer_name: &str) -> Vec<String> {
        self.state()
            .classic_registrations
            .get(load_balancer_name)
            .cloned()
            .unwrap_or_default()
    }
}

fn tag_values(tags: &[Tag], filter_name: &str) -> Vec<String> {
    filter_name
        .strip_prefix("tag:")
        .and_then(|key| tag_value(tags, key))
        .map(|v| vec![v.to_string()])
        .unwrap_or_default()
}

/// Every filter must match one of its values.
fn matches<F>(filters: &[Filter], field: F) -> bool
where
    F: Fn(&str) -> Vec<String>,
{
    filters.iter().all(|f| {
        let actual = field(&f.name);
        f.values.iter().any(|v| actual.contains(v))
    })
}

fn opt(value: &Option<String>) -> Vec<String> {
    value.iter().cloned().collect()
}

fn not_found(operation: &str, code: &str, id: &str) -> CloudError {
    CloudError::NotFound {
        operation: operation.to_string(),
        code: code.to_string(),
        message: format!("The ID '{}' does not exist", id),
    }
}

/// Returns the items named by `ids`, or a not-found error for the first unknown one.
fn select_by_id<T: Clone>(
    items: &[T],
    ids: &[String],
    id_of: impl Fn(&T) -> &str,
    operation: &str,
    code: &str,
) -> Result<Vec<T>> {
    if ids.is_empty() {
        return Ok(items.to_vec());
    }
    ids.iter()
        .map(|id| {
            items
                .iter()
                .find(|item| id_of(item) == id)
                .cloned()
                .ok_or_else(|| not_found(operation, code, id))
        })
        .collect()
}

#[async_trait]
impl CloudClient for FakeCloud {
    async fn describe_images(&self, image_ids: &[String], filters: &[Filter]) -> Result<Vec<Image>> {
        let mut state = self.state();
        state.enter("DescribeImages")?;
        let images = select_by_id(
            &state.images,
            image_ids,
            |i| i.image_id.as_str(),
            "DescribeImages",
            "InvalidAMIID.NotFound",
        )?;
        Ok(images
            .into_iter()
            .filter(|i| {
                matches(filters, |name| match name {
                    "image-id" => vec![i.image_id.clone()],
                    "name" => opt(&i.name),
                    _ => Vec::new(),
                })
            })
            .collect())
    }

    async fn describe_subnets(&self, subnet_ids: &[String], filters: &[Filter]) -> Result<Vec<Subnet>> {
        let mut state = self.state();
        state.enter("DescribeSubnets")?;
        let subnets = select_by_id(
            &state.subnets,
            subnet_ids,
            |s| s.subnet_id.as_str(),
            "DescribeSubnets",
            "InvalidSubnetID.NotFound",
        )?;
        Ok(subnets
            .into_iter()
            .filter(|s| {
                matches(filters, |name| match name {
                    "subnet-id" => vec![s.subnet_id.clone()],
                    "availability-zone" | "availabilityZone" => opt(&s.availability_zone),
                    "vpc-id" => opt(&s.vpc_id),
                    other => tag_values(&s.tags, other),
                })
            })
            .collect())
    }

    async fn describe_security_groups(
        &self,
        group_ids: &[String],
        filters: &[Filter],
    ) -> Result<Vec<SecurityGroup>> {
        let mut state = self.state();
        state.enter("DescribeSecurityGroups")?;
        let groups = select_by_id(
            &state.security_groups,
            group_ids,
            |g| g.group_id.as_str(),
            "DescribeSecurityGroups",
            "InvalidGroup.NotFound",
        )?;
        Ok(groups
            .into_iter()
            .filter(|g| {
                matches(filters, |name| match name {
                    "group-id" => vec![g.group_id.clone()],
                    "group-name" => opt(&g.group_name),
                    other => tag_values(&g.tags, other),
                })
            })
            .collect())
    }

    async fn describe_availability_zones(&self, zone_names: &[String]) -> Result<Vec<AvailabilityZone>> {
        let mut state = self.state();
        state.enter("DescribeAvailabilityZones")?;
        select_by_id(
            &state.zones,
            zone_names,
            |z| z.zone_name.as_str(),
            "DescribeAvailabilityZones",
            "InvalidParameterValue",
        )
        .map_err(|_| CloudError::Client {
            operation: "DescribeAvailabilityZones".to_string(),
            code: "InvalidParameterValue".to_string(),
            message: format!("Invalid availability zone: {:?}", zone_names),
            status: Some(400),
        })
    }

    async fn describe_vpcs(&self, vpc_ids: &[String]) -> Result<Vec<Vpc>> {
        let mut state = self.state();
        state.enter("DescribeVpcs")?;
        select_by_id(&state.vpcs, vpc_ids, |v| v.vpc_id.as_str(), "DescribeVpcs", "InvalidVpcID.NotFound")
    }

    async fn describe_dhcp_options(&self, dhcp_options_ids: &[String]) -> Result<Vec<DhcpOptions>> {
        let mut state = self.state();
        state.enter("DescribeDhcpOptions")?;
        select_by_id(
            &state.dhcp_options,
            dhcp_options_ids,
            |d| d.dhcp_options_id.as_str(),
            "DescribeDhcpOptions",
            "InvalidDhcpOptionID.NotFound",
        )
    }

    async fn describe_placement_groups(&self, group_names: &[String]) -> Result<Vec<PlacementGroupInfo>> {
        let mut state = self.state();
        state.enter("DescribePlacementGroups")?;
        select_by_id(
            &state.placement_groups,
            group_names,
            |g| g.group_name.as_str(),
            "DescribePlacementGroups",
            "InvalidPlacementGroup.Unknown",
        )
    }

    async fn create_placement_group(&self, request: CreatePlacementGroupRequest) -> Result<PlacementGroupInfo> {
        let mut state = self.state();
        state.enter("CreatePlacementGroup")?;
        state.create_placement_group_requests.push(request.clone());
        if state
            .placement_groups
            .iter()
            .any(|g| g.group_name == request.group_name)
        {
            return Err(CloudError::Client {
                operation: "CreatePlacementGroup".to_string(),
                code: "InvalidPlacementGroup.Duplicate".to_string(),
                message: format!("The placement group '{}' already exists.", request.group_name),
                status: Some(400),
            });
        }
        let id = state.next_id();
        let group = PlacementGroupInfo {
            group_name: request.group_name,
            group_id: Some(format!("pg-{:017x}", id)),
            strategy: Some(request.strategy),
            partition_count: request.partition_count,
            state: Some("available".to_string()),
            tags: request.tags,
        };
        state.placement_groups.push(group.clone());
        Ok(group)
    }

    async fn delete_placement_group(&self, group_name: &str) -> Result<()> {
        let mut state = self.state();
        state.enter("DeletePlacementGroup")?;
        let before = state.placement_groups.len();
        state.placement_groups.retain(|g| g.group_name != group_name);
        if state.placement_groups.len() == before {
            return Err(not_found(
                "DeletePlacementGroup",
                "InvalidPlacementGroup.Unknown",
                group_name,
            ));
        }
        Ok(())
    }

    async fn describe_instance_types(&self, next_token: Option<String>) -> Result<InstanceTypesPage> {
        let mut state = self.state();
        state.enter("DescribeInstanceTypes")?;
        let index = next_token
            .as_deref()
            .and_then(|t| t.parse::<usize>().ok())
            .unwrap_or(0);
        let instance_types = state.instance_type_pages.get(index).cloned().unwrap_or_default();
        let next_token = (index + 1 < state.instance_type_pages.len()).then(|| (index + 1).to_string());
        Ok(InstanceTypesPage {
            instance_types,
            next_token,
        })
    }

    async fn run_instances(&self, request: RunInstancesRequest) -> Result<Vec<Instance>> {
        let mut state = self.state();
        state.enter("RunInstances")?;
        state.run_requests.push(request.clone());

        let id = state.next_id();
        let instance_id = format!("i-{:017x}", id);
        let interface = request.network_interfaces.first();
        let subnet_id = interface.and_then(|ni| ni.subnet_id.clone());
        let subnet = subnet_id
            .as_ref()
            .and_then(|sid| state.subnets.iter().find(|s| &s.subnet_id == sid).cloned());
        let placement = request.placement.clone().unwrap_or_default();
        let availability_zone = placement
            .availability_zone
            .clone()
            .or_else(|| subnet.as_ref().and_then(|s| s.availability_zone.clone()));
        let tags = request
            .tag_specifications
            .iter()
            .find(|spec| spec.resource_type == TaggedResourceType::Instance)
            .map(|spec| spec.tags.clone())
            .unwrap_or_default();
        let octet = id % 250 + 2;
        let private_ip = format!("10.0.0.{}", octet);

        let instance = Instance {
            instance_id: instance_id.clone(),
            image_id: Some(request.image_id.clone()),
            instance_type: Some(request.instance_type.clone()),
            state: Some(state.launch_state.clone().unwrap_or(InstanceStateName::Pending)),
            launch_time: DateTime::from_timestamp(1_700_000_000 + id as i64, 0),
            private_ip_address: Some(private_ip.clone()),
            public_ip_address: interface
                .and_then(|ni| ni.associate_public_ip_address)
                .filter(|public| *public)
                .map(|_| format!("54.10.0.{}", octet)),
            private_dns_name: Some(format!("ip-10-0-0-{}.ec2.internal", octet)),
            public_dns_name: None,
            subnet_id,
            vpc_id: subnet.and_then(|s| s.vpc_id),
            availability_zone,
            placement_group_name: placement.group_name.clone(),
            host_id: placement.host_id.clone(),
            tags,
            network_interfaces: vec![InstanceNetworkInterface {
                status: Some("in-use".to_string()),
                private_ip_addresses: vec![private_ip],
                ipv6_addresses: Vec::new(),
            }],
        };
        state.instances.push(instance.clone());
        state.volumes.push((
            instance_id,
            Volume {
                volume_id: format!("vol-{:017x}", id),
            },
        ));
        Ok(vec![instance])
    }

    async fn describe_instances(&self, instance_ids: &[String], filters: &[Filter]) -> Result<Vec<Instance>> {
        let mut state = self.state();
        state.enter("DescribeInstances")?;
        let instances = select_by_id(
            &state.instances,
            instance_ids,
            |i| i.instance_id.as_str(),
            "DescribeInstances",
            "InvalidInstanceID.NotFound",
        )?;
        Ok(instances
            .into_iter()
            .filter(|i| {
                matches(filters, |name| match name {
                    "instance-id" => vec![i.instance_id.clone()],
                    "instance-state-name" => vec![i.state_name().to_string()],
                    "placement-group-name" => opt(&i.placement_group_name),
                    "vpc-id" => opt(&i.vpc_id),
                    other => tag_values(&i.tags, other),
                })
            })
            .collect())
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<Vec<InstanceStateChange>> {
        let mut state = self.state();
        state.enter("TerminateInstances")?;
        let mut changes = Vec::new();
        for id in instance_ids {
            let instance = state
                .instances
                .iter_mut()
                .find(|i| &i.instance_id == id)
                .ok_or_else(|| not_found("TerminateInstances", "InvalidInstanceID.NotFound", id))?;
            let previous = instance.state.replace(InstanceStateName::Terminated);
            changes.push(InstanceStateChange {
                instance_id: id.clone(),
                previous_state: previous,
                current_state: Some(InstanceStateName::Terminated),
            });
        }
        Ok(changes)
    }

    async fn describe_volumes(&self, filters: &[Filter]) -> Result<Vec<Volume>> {
        let mut state = self.state();
        state.enter("DescribeVolumes")?;
        Ok(state
            .volumes
            .iter()
            .filter(|(attached, volume)| {
                matches(filters, |name| match name {
                    "attachment.instance-id" => vec![attached.clone()],
                    "volume-id" => vec![volume.volume_id.clone()],
                    _ => Vec::new(),
                })
            })
            .map(|(_, volume)| volume.clone())
            .collect())
    }

    async fn create_tags(&self, resource_ids: &[String], tags: &[Tag]) -> Result<()> {
        let mut state = self.state();
        state.enter("CreateTags")?;
        state
            .create_tags_calls
            .push((resource_ids.to_vec(), tags.to_vec()));
        for instance in state
            .instances
            .iter_mut()
            .filter(|i| resource_ids.contains(&i.instance_id))
        {
            for tag in tags {
                match instance.tags.iter_mut().find(|t| t.key == tag.key) {
                    Some(existing) => existing.value = tag.value.clone(),
                    None => instance.tags.push(tag.clone()),
                }
            }
        }
        Ok(())
    }

    async fn allocate_hosts(&self, request: AllocateHostsRequest) -> Result<Vec<String>> {
        let mut state = self.state();
        state.enter("AllocateHosts")?;
        state.allocate_requests.push(request.clone());
        let mut ids = Vec::new();
        for _ in 0..request.quantity {
            let id = state.next_id();
            let host_id = format!("h-{:017x}", id);
            state.hosts.push(Host {
                host_id: host_id.clone(),
                state: Some("available".to_string()),
                availability_zone: Some(request.availability_zone.clone()),
                instance_ids: Vec::new(),
            });
            ids.push(host_id);
        }
        Ok(ids)
    }

    async fn release_hosts(&self, host_ids: &[String]) -> Result<ReleaseHostsOutput> {
        let mut state = self.state();
        state.enter("ReleaseHosts")?;
        let mut output = ReleaseHostsOutput::default();
        for id in host_ids {
            if let Some(message) = state.release_failures.get(id).cloned() {
                output.unsuccessful.push(UnsuccessfulItem {
                    resource_id: Some(id.clone()),
                    code: Some("Client.InvalidHost.Occupied".to_string()),
                    message: Some(message),
                });
                continue;
            }
            match state.hosts.iter_mut().find(|h| &h.host_id == id) {
                Some(host) => {
                    host.state = Some("released".to_string());
                    output.successful.push(id.clone());
                }
                None => output.unsuccessful.push(UnsuccessfulItem {
                    resource_id: Some(id.clone()),
                    code: Some("Client.InvalidHostID.NotFound".to_string()),
                    message: Some(format!("Host '{}' not found", id)),
                }),
            }
        }
        Ok(output)
    }

    async fn describe_hosts(&self, host_ids: &[String]) -> Result<Vec<Host>> {
        let mut state = self.state();
        state.enter("DescribeHosts")?;
        select_by_id(
            &state.hosts,
            host_ids,
            |h| h.host_id.as_str(),
            "DescribeHosts",
            "InvalidHostID.NotFound",
        )
    }

    async fn register_instances_with_load_balancer(
        &self,
        load_balancer_name: &str,
        instance_ids: &[String],
    ) -> Result<()> {
        let mut state = self.state();
        state.enter("RegisterInstancesWithLoadBalancer")?;
        let registered = state
            .classic_registrations
            .entry(load_balancer_name.to_string())
            .or_default();
        for id in instance_ids {
            if !registered.contains(id) {
                registered.push(id.clone());
            }
        }
        Ok(())
    }

    async fn describe_load_balancers(&self, names: &[String]) -> Result<Vec<LoadBalancerInfo>> {
        let mut state = self.state();
        state.enter("DescribeLoadBalancers")?;
        select_by_id(
            &state.load_balancers,
            names,
            |lb| lb.name.as_str(),
            "DescribeLoadBalancers",
            "LoadBalancerNotFound",
        )
    }

    async fn describe_target_groups(&self, load_balancer_arn: &str) -> Result<Vec<TargetGroup>> {
        let mut state = self.state();
        state.enter("DescribeTargetGroups")?;
        Ok(state
            .target_groups
            .get(load_balancer_arn)
            .cloned()
            .unwrap_or_default())
    }

    async fn register_targets(&self, target_group_arn: &str, target_ids: &[String]) -> Result<()> {
        let mut state = self.state();
        state.enter("RegisterTargets")?;
        let registered = state.targets.entry(target_group_arn.to_string()).or_default();
        for id in target_ids {
            if !registered.contains(id) {
                registered.push(id.clone());
            }
        }
        Ok(())
    }

    async fn deregister_targets(&self, target_group_arn: &str, target_ids: &[String]) -> Result<()> {
        let mut state = self.state();
        state.enter("DeregisterTargets")?;
        if let Some(registered) = state.targets.get_mut(target_group_arn) {
            registered.retain(|id| !target_ids.contains(id));
        }
        Ok(())
    }
}

/// Hands out the same [`FakeCloud`] for every build and remembers the options.
pub struct FakeClientBuilder {
    cloud: Arc<FakeCloud>,
    requests: Mutex<Vec<ClientOptions>>,
}

impl FakeClientBuilder {
    pub fn new(cloud: Arc<FakeCloud>) -> Self {
        Self {
            cloud,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ClientOptions> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ClientBuilder for FakeClientBuilder {
    async fn build(&self, options: ClientOptions) -> Result<Arc<dyn CloudClient>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(options);
        Ok(self.cloud.clone())
    }
}
