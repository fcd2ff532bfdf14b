//! `CloudClient` over the AWS SDK

use crate::convert::{self, non_empty};
use crate::error::{build_error, sdk_error};
use async_trait::async_trait;
use aws_sdk_ec2::types as ec2;
use aws_sdk_elasticloadbalancingv2::types::TargetDescription;
use machina_cloud::types::*;
use machina_cloud::{CloudClient, Result};
use std::collections::BTreeMap;

/// Service keys accepted in endpoint overrides.
pub const EC2_SERVICE: &str = "ec2";
pub const ELB_SERVICE: &str = "elasticloadbalancing";

pub struct AwsCloudClient {
    ec2: aws_sdk_ec2::Client,
    elb: aws_sdk_elasticloadbalancing::Client,
    elbv2: aws_sdk_elasticloadbalancingv2::Client,
}

impl AwsCloudClient {
    /// Creates the three service clients from a shared SDK config, applying
    /// per-service endpoint overrides.
    pub fn new(sdk_config: &aws_config::SdkConfig, endpoints: &BTreeMap<String, String>) -> Self {
        let mut ec2_config = aws_sdk_ec2::config::Builder::from(sdk_config);
        if let Some(url) = endpoints.get(EC2_SERVICE) {
            ec2_config = ec2_config.endpoint_url(url);
        }
        let mut elb_config = aws_sdk_elasticloadbalancing::config::Builder::from(sdk_config);
        let mut elbv2_config = aws_sdk_elasticloadbalancingv2::config::Builder::from(sdk_config);
        if let Some(url) = endpoints.get(ELB_SERVICE) {
            elb_config = elb_config.endpoint_url(url);
            elbv2_config = elbv2_config.endpoint_url(url);
        }

        Self {
            ec2: aws_sdk_ec2::Client::from_conf(ec2_config.build()),
            elb: aws_sdk_elasticloadbalancing::Client::from_conf(elb_config.build()),
            elbv2: aws_sdk_elasticloadbalancingv2::Client::from_conf(elbv2_config.build()),
        }
    }

    /// All regions visible to the account, with their opt-in status.
    pub async fn describe_regions(&self) -> Result<Vec<crate::RegionInfo>> {
        let output = self
            .ec2
            .describe_regions()
            .all_regions(true)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeRegions", e))?;
        Ok(output
            .regions()
            .iter()
            .map(|r| crate::RegionInfo {
                name: r.region_name().unwrap_or_default().to_string(),
                opt_in_status: r.opt_in_status().map(str::to_string),
            })
            .collect())
    }
}

#[async_trait]
impl CloudClient for AwsCloudClient {
    async fn describe_images(&self, image_ids: &[String], filters: &[Filter]) -> Result<Vec<Image>> {
        let output = self
            .ec2
            .describe_images()
            .set_image_ids(non_empty(image_ids))
            .set_filters(convert::filters(filters))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeImages", e))?;
        Ok(output.images().iter().map(convert::image).collect())
    }

    async fn describe_subnets(&self, subnet_ids: &[String], filters: &[Filter]) -> Result<Vec<Subnet>> {
        let output = self
            .ec2
            .describe_subnets()
            .set_subnet_ids(non_empty(subnet_ids))
            .set_filters(convert::filters(filters))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeSubnets", e))?;
        Ok(output.subnets().iter().map(convert::subnet).collect())
    }

    async fn describe_security_groups(
        &self,
        group_ids: &[String],
        filters: &[Filter],
    ) -> Result<Vec<SecurityGroup>> {
        let output = self
            .ec2
            .describe_security_groups()
            .set_group_ids(non_empty(group_ids))
            .set_filters(convert::filters(filters))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeSecurityGroups", e))?;
        Ok(output
            .security_groups()
            .iter()
            .map(convert::security_group)
            .collect())
    }

    async fn describe_availability_zones(&self, zone_names: &[String]) -> Result<Vec<AvailabilityZone>> {
        let output = self
            .ec2
            .describe_availability_zones()
            .set_zone_names(non_empty(zone_names))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeAvailabilityZones", e))?;
        Ok(output
            .availability_zones()
            .iter()
            .map(convert::availability_zone)
            .collect())
    }

    async fn describe_vpcs(&self, vpc_ids: &[String]) -> Result<Vec<Vpc>> {
        let output = self
            .ec2
            .describe_vpcs()
            .set_vpc_ids(non_empty(vpc_ids))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeVpcs", e))?;
        Ok(output.vpcs().iter().map(convert::vpc).collect())
    }

    async fn describe_dhcp_options(&self, dhcp_options_ids: &[String]) -> Result<Vec<DhcpOptions>> {
        let output = self
            .ec2
            .describe_dhcp_options()
            .set_dhcp_options_ids(non_empty(dhcp_options_ids))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeDhcpOptions", e))?;
        Ok(output.dhcp_options().iter().map(convert::dhcp_options).collect())
    }

    async fn describe_placement_groups(&self, group_names: &[String]) -> Result<Vec<PlacementGroupInfo>> {
        let output = self
            .ec2
            .describe_placement_groups()
            .set_group_names(non_empty(group_names))
            .send()
            .await
            .map_err(|e| sdk_error("DescribePlacementGroups", e))?;
        Ok(output
            .placement_groups()
            .iter()
            .map(convert::placement_group)
            .collect())
    }

    async fn create_placement_group(&self, request: CreatePlacementGroupRequest) -> Result<PlacementGroupInfo> {
        let output = self
            .ec2
            .create_placement_group()
            .group_name(&request.group_name)
            .strategy(ec2::PlacementStrategy::from(request.strategy.as_str()))
            .set_partition_count(request.partition_count)
            .tag_specifications(convert::tag_specification(
                TaggedResourceType::PlacementGroup,
                &request.tags,
            ))
            .send()
            .await
            .map_err(|e| sdk_error("CreatePlacementGroup", e))?;
        Ok(output
            .placement_group()
            .map(convert::placement_group)
            .unwrap_or_else(|| PlacementGroupInfo {
                group_name: request.group_name,
                strategy: Some(request.strategy),
                partition_count: request.partition_count,
                tags: request.tags,
                ..Default::default()
            }))
    }

    async fn delete_placement_group(&self, group_name: &str) -> Result<()> {
        self.ec2
            .delete_placement_group()
            .group_name(group_name)
            .send()
            .await
            .map_err(|e| sdk_error("DeletePlacementGroup", e))?;
        Ok(())
    }

    async fn describe_instance_types(&self, next_token: Option<String>) -> Result<InstanceTypesPage> {
        let output = self
            .ec2
            .describe_instance_types()
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeInstanceTypes", e))?;
        Ok(InstanceTypesPage {
            instance_types: output
                .instance_types()
                .iter()
                .map(convert::instance_type)
                .collect(),
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn run_instances(&self, request: RunInstancesRequest) -> Result<Vec<Instance>> {
        let tag_specifications = request
            .tag_specifications
            .iter()
            .map(|spec| convert::tag_specification(spec.resource_type, &spec.tags))
            .collect::<Vec<_>>();
        let network_interfaces = request
            .network_interfaces
            .iter()
            .map(convert::network_interface)
            .collect::<Vec<_>>();
        let block_devices = request
            .block_device_mappings
            .iter()
            .map(convert::block_device_mapping)
            .collect::<Vec<_>>();

        let output = self
            .ec2
            .run_instances()
            .image_id(&request.image_id)
            .instance_type(ec2::InstanceType::from(request.instance_type.as_str()))
            .min_count(request.min_count)
            .max_count(request.max_count)
            .set_key_name(request.key_name.clone())
            .set_iam_instance_profile(request.iam_instance_profile_name.as_ref().map(|name| {
                ec2::IamInstanceProfileSpecification::builder()
                    .name(name)
                    .build()
            }))
            .set_tag_specifications((!tag_specifications.is_empty()).then_some(tag_specifications))
            .set_network_interfaces((!network_interfaces.is_empty()).then_some(network_interfaces))
            .set_user_data(request.user_data.clone())
            .set_placement(request.placement.as_ref().map(convert::placement))
            .set_block_device_mappings((!block_devices.is_empty()).then_some(block_devices))
            .set_instance_market_options(request.market_options.as_ref().map(convert::market_options))
            .set_capacity_reservation_specification(
                request
                    .capacity_reservation
                    .as_ref()
                    .map(convert::capacity_reservation),
            )
            .set_metadata_options(request.metadata_options.as_ref().map(convert::metadata_options))
            .send()
            .await
            .map_err(|e| sdk_error("RunInstances", e))?;
        Ok(output.instances().iter().map(convert::instance).collect())
    }

    async fn describe_instances(&self, instance_ids: &[String], filters: &[Filter]) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .ec2
                .describe_instances()
                .set_instance_ids(non_empty(instance_ids))
                .set_filters(convert::filters(filters))
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| sdk_error("DescribeInstances", e))?;
            for reservation in output.reservations() {
                instances.extend(reservation.instances().iter().map(convert::instance));
            }
            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(instances)
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<Vec<InstanceStateChange>> {
        let output = self
            .ec2
            .terminate_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|e| sdk_error("TerminateInstances", e))?;
        Ok(output
            .terminating_instances()
            .iter()
            .map(convert::state_change)
            .collect())
    }

    async fn describe_volumes(&self, filters: &[Filter]) -> Result<Vec<Volume>> {
        let output = self
            .ec2
            .describe_volumes()
            .set_filters(convert::filters(filters))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeVolumes", e))?;
        Ok(output
            .volumes()
            .iter()
            .map(|v| Volume {
                volume_id: v.volume_id().unwrap_or_default().to_string(),
            })
            .collect())
    }

    async fn create_tags(&self, resource_ids: &[String], tags: &[Tag]) -> Result<()> {
        self.ec2
            .create_tags()
            .set_resources(Some(resource_ids.to_vec()))
            .set_tags(Some(convert::tags_to_sdk(tags)))
            .send()
            .await
            .map_err(|e| sdk_error("CreateTags", e))?;
        Ok(())
    }

    async fn allocate_hosts(&self, request: AllocateHostsRequest) -> Result<Vec<String>> {
        let auto_placement = if request.auto_placement {
            ec2::AutoPlacement::On
        } else {
            ec2::AutoPlacement::Off
        };
        let output = self
            .ec2
            .allocate_hosts()
            .instance_type(&request.instance_type)
            .availability_zone(&request.availability_zone)
            .quantity(request.quantity)
            .auto_placement(auto_placement)
            .tag_specifications(convert::tag_specification(
                TaggedResourceType::DedicatedHost,
                &request.tags,
            ))
            .send()
            .await
            .map_err(|e| sdk_error("AllocateHosts", e))?;
        Ok(output.host_ids().to_vec())
    }

    async fn release_hosts(&self, host_ids: &[String]) -> Result<ReleaseHostsOutput> {
        let output = self
            .ec2
            .release_hosts()
            .set_host_ids(Some(host_ids.to_vec()))
            .send()
            .await
            .map_err(|e| sdk_error("ReleaseHosts", e))?;
        Ok(ReleaseHostsOutput {
            successful: output.successful().to_vec(),
            unsuccessful: output
                .unsuccessful()
                .iter()
                .map(convert::unsuccessful)
                .collect(),
        })
    }

    async fn describe_hosts(&self, host_ids: &[String]) -> Result<Vec<Host>> {
        let output = self
            .ec2
            .describe_hosts()
            .set_host_ids(non_empty(host_ids))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeHosts", e))?;
        Ok(output.hosts().iter().map(convert::host).collect())
    }

    async fn register_instances_with_load_balancer(
        &self,
        load_balancer_name: &str,
        instance_ids: &[String],
    ) -> Result<()> {
        let instances = instance_ids
            .iter()
            .map(|id| {
                aws_sdk_elasticloadbalancing::types::Instance::builder()
                    .instance_id(id)
                    .build()
            })
            .collect::<Vec<_>>();
        self.elb
            .register_instances_with_load_balancer()
            .load_balancer_name(load_balancer_name)
            .set_instances(Some(instances))
            .send()
            .await
            .map_err(|e| sdk_error("RegisterInstancesWithLoadBalancer", e))?;
        Ok(())
    }

    async fn describe_load_balancers(&self, names: &[String]) -> Result<Vec<LoadBalancerInfo>> {
        let output = self
            .elbv2
            .describe_load_balancers()
            .set_names(non_empty(names))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeLoadBalancers", e))?;
        Ok(output
            .load_balancers()
            .iter()
            .map(|lb| LoadBalancerInfo {
                name: lb.load_balancer_name().unwrap_or_default().to_string(),
                arn: lb.load_balancer_arn().unwrap_or_default().to_string(),
            })
            .collect())
    }

    async fn describe_target_groups(&self, load_balancer_arn: &str) -> Result<Vec<TargetGroup>> {
        let output = self
            .elbv2
            .describe_target_groups()
            .load_balancer_arn(load_balancer_arn)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeTargetGroups", e))?;
        Ok(output
            .target_groups()
            .iter()
            .map(|tg| TargetGroup {
                arn: tg.target_group_arn().unwrap_or_default().to_string(),
                target_type: tg
                    .target_type()
                    .map(|t| TargetType::from(t.as_str()))
                    .unwrap_or(TargetType::Instance),
            })
            .collect())
    }

    async fn register_targets(&self, target_group_arn: &str, target_ids: &[String]) -> Result<()> {
        let targets = target_descriptions("RegisterTargets", target_ids)?;
        self.elbv2
            .register_targets()
            .target_group_arn(target_group_arn)
            .set_targets(Some(targets))
            .send()
            .await
            .map_err(|e| sdk_error("RegisterTargets", e))?;
        Ok(())
    }

    async fn deregister_targets(&self, target_group_arn: &str, target_ids: &[String]) -> Result<()> {
        let targets = target_descriptions("DeregisterTargets", target_ids)?;
        self.elbv2
            .deregister_targets()
            .target_group_arn(target_group_arn)
            .set_targets(Some(targets))
            .send()
            .await
            .map_err(|e| sdk_error("DeregisterTargets", e))?;
        Ok(())
    }
}

fn target_descriptions(operation: &str, target_ids: &[String]) -> Result<Vec<TargetDescription>> {
    target_ids
        .iter()
        .map(|id| {
            TargetDescription::builder()
                .id(id)
                .build()
                .map_err(|e| build_error(operation, e))
        })
        .collect()
}
