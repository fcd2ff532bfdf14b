//! Conversions between SDK shapes and facade types

use aws_sdk_ec2::types as ec2;
use chrono::{DateTime, Utc};
use machina_cloud::types::*;

fn owned(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

/// `None` for an empty slice so the SDK omits the parameter.
pub fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

pub fn filters(filters: &[Filter]) -> Option<Vec<ec2::Filter>> {
    if filters.is_empty() {
        return None;
    }
    Some(
        filters
            .iter()
            .map(|f| {
                ec2::Filter::builder()
                    .name(&f.name)
                    .set_values(Some(f.values.clone()))
                    .build()
            })
            .collect(),
    )
}

pub fn tags_to_sdk(tags: &[Tag]) -> Vec<ec2::Tag> {
    tags.iter()
        .map(|t| ec2::Tag::builder().key(&t.key).value(&t.value).build())
        .collect()
}

pub fn tags_from_sdk(tags: &[ec2::Tag]) -> Vec<Tag> {
    tags.iter()
        .map(|t| Tag::new(t.key().unwrap_or_default(), t.value().unwrap_or_default()))
        .collect()
}

pub fn tag_specification(resource_type: TaggedResourceType, tags: &[Tag]) -> ec2::TagSpecification {
    ec2::TagSpecification::builder()
        .resource_type(ec2::ResourceType::from(resource_type.as_str()))
        .set_tags(Some(tags_to_sdk(tags)))
        .build()
}

fn timestamp(value: &aws_sdk_ec2::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

pub fn image(image: &ec2::Image) -> Image {
    Image {
        image_id: image.image_id().unwrap_or_default().to_string(),
        name: owned(image.name()),
        creation_date: owned(image.creation_date()),
        root_device_name: owned(image.root_device_name()),
    }
}

pub fn subnet(subnet: &ec2::Subnet) -> Subnet {
    Subnet {
        subnet_id: subnet.subnet_id().unwrap_or_default().to_string(),
        availability_zone: owned(subnet.availability_zone()),
        vpc_id: owned(subnet.vpc_id()),
        tags: tags_from_sdk(subnet.tags()),
    }
}

pub fn security_group(group: &ec2::SecurityGroup) -> SecurityGroup {
    SecurityGroup {
        group_id: group.group_id().unwrap_or_default().to_string(),
        group_name: owned(group.group_name()),
        tags: tags_from_sdk(group.tags()),
    }
}

pub fn availability_zone(zone: &ec2::AvailabilityZone) -> AvailabilityZone {
    AvailabilityZone {
        zone_name: zone.zone_name().unwrap_or_default().to_string(),
        zone_type: owned(zone.zone_type()),
    }
}

pub fn vpc(vpc: &ec2::Vpc) -> Vpc {
    Vpc {
        vpc_id: vpc.vpc_id().unwrap_or_default().to_string(),
        dhcp_options_id: owned(vpc.dhcp_options_id()),
    }
}

pub fn dhcp_options(options: &ec2::DhcpOptions) -> DhcpOptions {
    DhcpOptions {
        dhcp_options_id: options.dhcp_options_id().unwrap_or_default().to_string(),
        configurations: options
            .dhcp_configurations()
            .iter()
            .map(|c| DhcpConfiguration {
                key: c.key().unwrap_or_default().to_string(),
                values: c
                    .values()
                    .iter()
                    .filter_map(|v| v.value())
                    .map(str::to_string)
                    .collect(),
            })
            .collect(),
    }
}

pub fn placement_group(group: &ec2::PlacementGroup) -> PlacementGroupInfo {
    PlacementGroupInfo {
        group_name: group.group_name().unwrap_or_default().to_string(),
        group_id: owned(group.group_id()),
        strategy: group.strategy().map(|s| s.as_str().to_string()),
        partition_count: group.partition_count(),
        state: group.state().map(|s| s.as_str().to_string()),
        tags: tags_from_sdk(group.tags()),
    }
}

pub fn instance_type(info: &ec2::InstanceTypeInfo) -> InstanceTypeInfo {
    InstanceTypeInfo {
        instance_type: info
            .instance_type()
            .map(|t| t.as_str().to_string())
            .unwrap_or_default(),
        default_vcpus: info
            .v_cpu_info()
            .and_then(|v| v.default_v_cpus())
            .map(i64::from),
        memory_mib: info.memory_info().and_then(|m| m.size_in_mib()),
        gpu_counts: info
            .gpu_info()
            .map(|g| g.gpus().iter().filter_map(|d| d.count()).map(i64::from).collect())
            .unwrap_or_default(),
        supported_architectures: info
            .processor_info()
            .map(|p| {
                p.supported_architectures()
                    .iter()
                    .map(|a| a.as_str().to_string())
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn state_name(state: Option<&ec2::InstanceState>) -> Option<InstanceStateName> {
    state
        .and_then(|s| s.name())
        .map(|n| InstanceStateName::from(n.as_str()))
}

pub fn instance(instance: &ec2::Instance) -> Instance {
    let placement = instance.placement();
    Instance {
        instance_id: instance.instance_id().unwrap_or_default().to_string(),
        image_id: owned(instance.image_id()),
        instance_type: instance.instance_type().map(|t| t.as_str().to_string()),
        state: state_name(instance.state()),
        launch_time: instance.launch_time().and_then(timestamp),
        private_ip_address: owned(instance.private_ip_address()),
        public_ip_address: owned(instance.public_ip_address()),
        private_dns_name: owned(instance.private_dns_name()).filter(|s| !s.is_empty()),
        public_dns_name: owned(instance.public_dns_name()).filter(|s| !s.is_empty()),
        subnet_id: owned(instance.subnet_id()),
        vpc_id: owned(instance.vpc_id()),
        availability_zone: owned(placement.and_then(|p| p.availability_zone())),
        placement_group_name: owned(placement.and_then(|p| p.group_name()))
            .filter(|s| !s.is_empty()),
        host_id: owned(placement.and_then(|p| p.host_id())),
        tags: tags_from_sdk(instance.tags()),
        network_interfaces: instance
            .network_interfaces()
            .iter()
            .map(|ni| InstanceNetworkInterface {
                status: ni.status().map(|s| s.as_str().to_string()),
                private_ip_addresses: ni
                    .private_ip_addresses()
                    .iter()
                    .filter_map(|a| a.private_ip_address())
                    .map(str::to_string)
                    .collect(),
                ipv6_addresses: ni
                    .ipv6_addresses()
                    .iter()
                    .filter_map(|a| a.ipv6_address())
                    .map(str::to_string)
                    .collect(),
            })
            .collect(),
    }
}

pub fn state_change(change: &ec2::InstanceStateChange) -> InstanceStateChange {
    InstanceStateChange {
        instance_id: change.instance_id().unwrap_or_default().to_string(),
        previous_state: state_name(change.previous_state()),
        current_state: state_name(change.current_state()),
    }
}

pub fn host(host: &ec2::Host) -> Host {
    Host {
        host_id: host.host_id().unwrap_or_default().to_string(),
        state: host.state().map(|s| s.as_str().to_string()),
        availability_zone: owned(host.availability_zone()),
        instance_ids: host
            .instances()
            .iter()
            .filter_map(|i| i.instance_id())
            .map(str::to_string)
            .collect(),
    }
}

pub fn unsuccessful(item: &ec2::UnsuccessfulItem) -> UnsuccessfulItem {
    UnsuccessfulItem {
        resource_id: owned(item.resource_id()),
        code: owned(item.error().and_then(|e| e.code())),
        message: owned(item.error().and_then(|e| e.message())),
    }
}

// ---------------------------------------------------------------------------
// RunInstances request pieces
// ---------------------------------------------------------------------------

pub fn network_interface(spec: &NetworkInterfaceSpec) -> ec2::InstanceNetworkInterfaceSpecification {
    ec2::InstanceNetworkInterfaceSpecification::builder()
        .device_index(spec.device_index)
        .set_subnet_id(spec.subnet_id.clone())
        .set_groups(non_empty(&spec.groups))
        .set_associate_public_ip_address(spec.associate_public_ip_address)
        .set_associate_carrier_ip_address(spec.associate_carrier_ip_address)
        .set_interface_type(spec.interface_type.clone())
        .build()
}

pub fn placement(placement: &Placement) -> ec2::Placement {
    ec2::Placement::builder()
        .set_availability_zone(placement.availability_zone.clone())
        .set_tenancy(placement.tenancy.as_deref().map(ec2::Tenancy::from))
        .set_group_name(placement.group_name.clone())
        .set_partition_number(placement.partition_number)
        .set_host_id(placement.host_id.clone())
        .set_affinity(placement.affinity.clone())
        .build()
}

pub fn block_device_mapping(mapping: &BlockDeviceMapping) -> ec2::BlockDeviceMapping {
    let ebs = &mapping.ebs;
    ec2::BlockDeviceMapping::builder()
        .device_name(&mapping.device_name)
        .ebs(
            ec2::EbsBlockDevice::builder()
                .set_volume_size(ebs.volume_size)
                .set_volume_type(ebs.volume_type.as_deref().map(ec2::VolumeType::from))
                .set_iops(ebs.iops)
                .set_throughput(ebs.throughput)
                .set_encrypted(ebs.encrypted)
                .set_kms_key_id(ebs.kms_key_id.clone())
                .delete_on_termination(ebs.delete_on_termination)
                .build(),
        )
        .build()
}

pub fn market_options(options: &InstanceMarketOptions) -> ec2::InstanceMarketOptionsRequest {
    let market_type = match options.market_type {
        MarketType::Spot => "spot",
        MarketType::CapacityBlock => "capacity-block",
    };
    let spot = options.spot_options.as_ref().map(|spot| {
        let behavior = match spot.instance_interruption_behavior {
            InterruptionBehavior::Terminate => "terminate",
            InterruptionBehavior::Stop => "stop",
            InterruptionBehavior::Hibernate => "hibernate",
        };
        let spot_type = match spot.spot_instance_type {
            SpotInstanceType::OneTime => "one-time",
            SpotInstanceType::Persistent => "persistent",
        };
        ec2::SpotMarketOptions::builder()
            .instance_interruption_behavior(ec2::InstanceInterruptionBehavior::from(behavior))
            .spot_instance_type(ec2::SpotInstanceType::from(spot_type))
            .set_max_price(spot.max_price.clone())
            .build()
    });
    ec2::InstanceMarketOptionsRequest::builder()
        .market_type(ec2::MarketType::from(market_type))
        .set_spot_options(spot)
        .build()
}

pub fn capacity_reservation(spec: &CapacityReservationSpec) -> ec2::CapacityReservationSpecification {
    ec2::CapacityReservationSpecification::builder()
        .capacity_reservation_target(
            ec2::CapacityReservationTarget::builder()
                .capacity_reservation_id(&spec.capacity_reservation_id)
                .build(),
        )
        .build()
}

pub fn metadata_options(options: &MetadataOptions) -> ec2::InstanceMetadataOptionsRequest {
    let tokens = match options.http_tokens {
        HttpTokens::Optional => "optional",
        HttpTokens::Required => "required",
    };
    ec2::InstanceMetadataOptionsRequest::builder()
        .http_tokens(ec2::HttpTokensState::from(tokens))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_empty_is_omitted() {
        assert!(filters(&[]).is_none());
        let converted = filters(&[Filter::tag("Name", "worker")]).unwrap();
        assert_eq!(converted[0].name(), Some("tag:Name"));
        assert_eq!(converted[0].values(), ["worker".to_string()]);
    }

    #[test]
    fn test_instance_conversion() {
        let sdk = ec2::Instance::builder()
            .instance_id("i-0123456789abcdef0")
            .state(
                ec2::InstanceState::builder()
                    .name(ec2::InstanceStateName::Running)
                    .build(),
            )
            .placement(
                ec2::Placement::builder()
                    .availability_zone("us-east-1a")
                    .group_name("")
                    .build(),
            )
            .private_dns_name("ip-10-0-0-1.ec2.internal")
            .public_dns_name("")
            .tags(ec2::Tag::builder().key("Name").value("worker-0").build())
            .network_interfaces(
                ec2::InstanceNetworkInterface::builder()
                    .status(ec2::NetworkInterfaceStatus::InUse)
                    .private_ip_addresses(
                        ec2::InstancePrivateIpAddress::builder()
                            .private_ip_address("10.0.0.1")
                            .build(),
                    )
                    .build(),
            )
            .build();

        let converted = instance(&sdk);
        assert_eq!(converted.instance_id, "i-0123456789abcdef0");
        assert!(converted.is_running());
        assert_eq!(converted.availability_zone.as_deref(), Some("us-east-1a"));
        assert!(converted.placement_group_name.is_none());
        assert!(converted.public_dns_name.is_none());
        assert_eq!(converted.tags, vec![Tag::new("Name", "worker-0")]);
        assert_eq!(converted.network_interfaces[0].status.as_deref(), Some("in-use"));
        assert_eq!(
            converted.network_interfaces[0].private_ip_addresses,
            vec!["10.0.0.1".to_string()]
        );
    }

    #[test]
    fn test_spot_market_options() {
        let request = market_options(&InstanceMarketOptions {
            market_type: MarketType::Spot,
            spot_options: Some(SpotOptions {
                instance_interruption_behavior: InterruptionBehavior::Terminate,
                spot_instance_type: SpotInstanceType::OneTime,
                max_price: None,
            }),
        });
        assert_eq!(request.market_type(), Some(&ec2::MarketType::Spot));
        let spot = request.spot_options().unwrap();
        assert_eq!(
            spot.instance_interruption_behavior(),
            Some(&ec2::InstanceInterruptionBehavior::Terminate)
        );
        assert_eq!(spot.spot_instance_type(), Some(&ec2::SpotInstanceType::OneTime));
        assert!(spot.max_price().is_none());
    }

    #[test]
    fn test_instance_type_conversion() {
        let sdk = ec2::InstanceTypeInfo::builder()
            .instance_type(ec2::InstanceType::from("p2.16xlarge"))
            .v_cpu_info(ec2::VCpuInfo::builder().default_v_cpus(64).build())
            .memory_info(ec2::MemoryInfo::builder().size_in_mib(749568).build())
            .gpu_info(
                ec2::GpuInfo::builder()
                    .gpus(ec2::GpuDeviceInfo::builder().count(16).build())
                    .build(),
            )
            .processor_info(
                ec2::ProcessorInfo::builder()
                    .supported_architectures(ec2::ArchitectureType::X8664)
                    .build(),
            )
            .build();

        let converted = instance_type(&sdk);
        assert_eq!(converted.instance_type, "p2.16xlarge");
        assert_eq!(converted.default_vcpus, Some(64));
        assert_eq!(converted.memory_mib, Some(749568));
        assert_eq!(converted.gpu_counts, vec![16]);
        assert_eq!(converted.supported_architectures, vec!["x86_64".to_string()]);
    }
}
