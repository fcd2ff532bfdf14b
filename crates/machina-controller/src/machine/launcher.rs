//! Builds and issues the instance launch request

use super::resolver;
use crate::api::{
    AwsMachineProviderConfig, BlockDeviceMappingSpec, MARKET_TYPE_CAPACITY_BLOCK, MARKET_TYPE_ON_DEMAND,
    MARKET_TYPE_SPOT, NETWORK_INTERFACE_TYPE_EFA, NETWORK_INTERFACE_TYPE_ENA,
};
use crate::error::{ReconcileError, Result};
use machina_cloud::{
    self as cloud, BlockDeviceMapping, CapacityReservationSpec, CloudClient, EbsBlockDevice, HttpTokens,
    Instance, InstanceMarketOptions, InterruptionBehavior, LookupExt, MarketType, MetadataOptions, NetworkInterfaceSpec,
    RunInstancesRequest, SpotInstanceType, SpotOptions, Tag, TaggedResourceType, WAVELENGTH_ZONE_TYPE,
};
use regex::Regex;

const CAPACITY_RESERVATION_ID_PATTERN: &str = r"^cr-[0-9a-f]{17}$";

const IOPS_VOLUME_TYPES: &[&str] = &["io1", "io2", "gp3"];

/// Everything the launcher needs beyond the provider config.
#[derive(Debug, Clone)]
pub struct LaunchInput<'a> {
    pub machine_name: &'a str,
    pub config: &'a AwsMachineProviderConfig,
    /// Final tag list, ownership tags included.
    pub tags: Vec<Tag>,
    /// Base64-encoded user data.
    pub user_data: Option<String>,
    /// Dedicated host to launch on, allocated or user-provided.
    pub host_id: Option<String>,
}

/// Resolves references, builds the request and launches exactly one instance.
pub async fn launch(client: &dyn CloudClient, input: LaunchInput<'_>) -> Result<Instance> {
    let request = build_request(client, &input).await?;

    tracing::info!(
        "{}: launching {} instance from {}",
        input.machine_name,
        request.instance_type,
        request.image_id
    );
    let mut instances = client.run_instances(request).await.map_err(|e| {
        ReconcileError::from_cloud(e, ReconcileError::CreateFailed, "error launching instance")
    })?;

    if instances.len() != 1 {
        return Err(ReconcileError::CreateFailed(format!(
            "unexpected reservation creating instance: got {} instances",
            instances.len()
        )));
    }
    let instance = instances.remove(0);
    tracing::info!("{}: launched instance {}", input.machine_name, instance.instance_id);
    Ok(instance)
}

pub async fn build_request(client: &dyn CloudClient, input: &LaunchInput<'_>) -> Result<RunInstancesRequest> {
    let config = input.config;

    // Local validation first so a bad spec costs no API calls.
    let market_options = market_options(config)?;
    let capacity_reservation = capacity_reservation(&config.capacity_reservation_id)?;
    let metadata_options = metadata_options(&config.metadata_service_options.authentication)?;
    let interface_type = interface_type(&config.network_interface_type)?;
    validate_tenancy(&config.placement.tenancy)?;
    validate_partition(client, config).await?;

    let image_id = resolver::resolve_ami(client, &config.ami).await?;
    let security_groups = resolver::resolve_security_groups(client, &config.security_groups).await?;
    let subnets = resolver::resolve_subnets(
        client,
        input.machine_name,
        &config.subnet,
        &config.placement.availability_zone,
    )
    .await?;
    if subnets.len() > 1 {
        tracing::warn!(
            "{}: more than one subnet id returned, only first one will be used",
            input.machine_name
        );
    }
    let subnet_id = subnets[0].clone();

    let mut interface = NetworkInterfaceSpec {
        device_index: config.device_index,
        subnet_id: Some(subnet_id.clone()),
        groups: security_groups,
        interface_type,
        ..Default::default()
    };
    if let Some(public_ip) = config.public_ip {
        let zone = resolver::subnet_zone(client, &subnet_id).await?;
        if resolver::zone_type(client, &zone).await? == WAVELENGTH_ZONE_TYPE {
            interface.associate_carrier_ip_address = Some(public_ip);
        } else {
            interface.associate_public_ip_address = Some(public_ip);
        }
    }

    let block_device_mappings = block_device_mappings(client, &image_id, &config.block_devices).await?;

    Ok(RunInstancesRequest {
        image_id,
        instance_type: config.instance_type.clone(),
        min_count: 1,
        max_count: 1,
        key_name: config.key_name.clone(),
        iam_instance_profile_name: config.iam_instance_profile.as_ref().and_then(|r| r.id.clone()),
        tag_specifications: vec![
            cloud::TagSpecification {
                resource_type: TaggedResourceType::Instance,
                tags: input.tags.clone(),
            },
            cloud::TagSpecification {
                resource_type: TaggedResourceType::Volume,
                tags: input.tags.clone(),
            },
        ],
        network_interfaces: vec![interface],
        user_data: input.user_data.clone(),
        placement: placement(config, input.host_id.as_deref()),
        block_device_mappings,
        market_options,
        capacity_reservation,
        metadata_options,
    })
}

/// `ENA` maps to a plain interface, `EFA` to an EFA one; empty sends nothing.
pub fn interface_type(value: &str) -> Result<Option<String>> {
    match value {
        "" => Ok(None),
        NETWORK_INTERFACE_TYPE_ENA => Ok(Some("interface".to_string())),
        NETWORK_INTERFACE_TYPE_EFA => Ok(Some("efa".to_string())),
        other => Err(ReconcileError::invalid(format!(
            "invalid value for networkInterfaceType {:?}, valid values are \"\", \"ENA\" and \"EFA\"",
            other
        ))),
    }
}

fn validate_tenancy(tenancy: &str) -> Result<()> {
    match tenancy {
        "" | "default" | "dedicated" | "host" => Ok(()),
        other => Err(ReconcileError::invalid(format!(
            "invalid instance tenancy: {}. Allowed options are: default,dedicated,host",
            other
        ))),
    }
}

/// A partition number needs a partition placement group with at least that
/// many partitions.
pub async fn validate_partition(client: &dyn CloudClient, config: &AwsMachineProviderConfig) -> Result<()> {
    let Some(partition) = config.placement_group_partition else {
        return Ok(());
    };
    let name = &config.placement_group_name;
    if name.is_empty() {
        return Err(ReconcileError::invalid(
            "placementGroupPartition is set but placementGroupName is empty",
        ));
    }

    let groups = client
        .describe_placement_groups(&[name.clone()])
        .await
        .into_lookup()
        .map_err(|e| {
            ReconcileError::from_cloud(e, ReconcileError::RetrievalFailed, "error describing placement group")
        })?;
    let group = groups
        .found()
        .and_then(|g| g.into_iter().next())
        .ok_or_else(|| ReconcileError::invalid(format!("placement group {} not found", name)))?;

    if group.strategy.as_deref() != Some("partition") {
        return Err(ReconcileError::invalid(format!(
            "placement group {} is not a partition placement group, placementGroupPartition must be unset",
            name
        )));
    }
    let count = group.partition_count.unwrap_or_default();
    if partition < 1 || partition > count {
        return Err(ReconcileError::invalid(format!(
            "placementGroupPartition {} is out of range for placement group {} with {} partitions",
            partition, name, count
        )));
    }
    Ok(())
}

fn placement(config: &AwsMachineProviderConfig, host_id: Option<&str>) -> Option<cloud::Placement> {
    let spec = &config.placement;
    let mut placement = cloud::Placement::default();

    if !spec.availability_zone.is_empty() && config.subnet.id.is_none() {
        placement.availability_zone = Some(spec.availability_zone.clone());
    }
    if !spec.tenancy.is_empty() {
        placement.tenancy = Some(spec.tenancy.clone());
    }
    if !config.placement_group_name.is_empty() {
        placement.group_name = Some(config.placement_group_name.clone());
        placement.partition_number = config.placement_group_partition;
    }
    if let Some(host_id) = host_id {
        placement.host_id = Some(host_id.to_string());
        placement.tenancy = Some("host".to_string());
        placement.affinity = match spec.host.as_ref().and_then(|h| h.affinity.as_deref()) {
            Some("AnyAvailable") => Some("default".to_string()),
            _ => Some("host".to_string()),
        };
    }

    (!placement.is_empty()).then_some(placement)
}

/// Market options for the request, inferring the market type when unset.
pub fn market_options(config: &AwsMachineProviderConfig) -> Result<Option<InstanceMarketOptions>> {
    let spot = config.spot_market_options.as_ref();
    if config.market_type == MARKET_TYPE_CAPACITY_BLOCK && spot.is_some() {
        return Err(ReconcileError::invalid(
            "can't create spot capacity-blocks, remove spot market request",
        ));
    }

    let market_type = match config.market_type.as_str() {
        "" if spot.is_some() => MARKET_TYPE_SPOT,
        "" => MARKET_TYPE_ON_DEMAND,
        other => other,
    };

    match market_type {
        MARKET_TYPE_CAPACITY_BLOCK => {
            if config.capacity_reservation_id.is_empty() {
                return Err(ReconcileError::invalid(
                    "capacityReservationID is required when CapacityBlock is provided",
                ));
            }
            Ok(Some(InstanceMarketOptions {
                market_type: MarketType::CapacityBlock,
                spot_options: None,
            }))
        }
        // Persistent requests or stop/hibernate would let the cloud replace the
        // instance behind the machine's back.
        MARKET_TYPE_SPOT => Ok(Some(InstanceMarketOptions {
            market_type: MarketType::Spot,
            spot_options: Some(SpotOptions {
                instance_interruption_behavior: InterruptionBehavior::Terminate,
                spot_instance_type: SpotInstanceType::OneTime,
                max_price: spot
                    .and_then(|s| s.max_price.clone())
                    .filter(|p| !p.is_empty()),
            }),
        })),
        MARKET_TYPE_ON_DEMAND => Ok(None),
        other => Err(ReconcileError::invalid(format!(
            "invalid MarketType {:?}",
            other
        ))),
    }
}

/// Validates the reservation ID shape (`cr-` plus 17 lowercase hex digits).
pub fn capacity_reservation(id: &str) -> Result<Option<CapacityReservationSpec>> {
    if id.is_empty() {
        return Ok(None);
    }
    let pattern = Regex::new(CAPACITY_RESERVATION_ID_PATTERN)
        .map_err(|e| ReconcileError::invalid(format!("capacity reservation pattern: {}", e)))?;
    if !pattern.is_match(id) {
        return Err(ReconcileError::invalid(format!(
            "invalid value for capacityReservationId: {:?}, it must start with 'cr-' and be exactly 20 characters long with 17 hexadecimal characters",
            id
        )));
    }
    Ok(Some(CapacityReservationSpec {
        capacity_reservation_id: id.to_string(),
    }))
}

pub fn metadata_options(authentication: &str) -> Result<Option<MetadataOptions>> {
    let http_tokens = match authentication {
        "" => return Ok(None),
        "Optional" => HttpTokens::Optional,
        "Required" => HttpTokens::Required,
        other => {
            return Err(ReconcileError::invalid(format!(
                "invalid value for metadataServiceOptions.authentication: {:?}",
                other
            )));
        }
    };
    Ok(Some(MetadataOptions { http_tokens }))
}

async fn root_device_name(client: &dyn CloudClient, image_id: &str) -> Result<String> {
    let images = client
        .describe_images(&[image_id.to_string()], &[])
        .await
        .map_err(|e| {
            ReconcileError::from_cloud(e, ReconcileError::RetrievalFailed, "error describing AMI")
        })?;
    images
        .into_iter()
        .next()
        .and_then(|i| i.root_device_name)
        .ok_or_else(|| ReconcileError::invalid(format!("no root device name found for AMI {}", image_id)))
}

fn to_i32(field: &str, value: i64) -> Result<i32> {
    i32::try_from(value).map_err(|_| ReconcileError::invalid(format!("{} {} is out of range", field, value)))
}

/// Block device mappings. A spec without a device name targets the AMI's
/// root device; only one such spec is allowed.
pub async fn block_device_mappings(
    client: &dyn CloudClient,
    image_id: &str,
    specs: &[BlockDeviceMappingSpec],
) -> Result<Vec<BlockDeviceMapping>> {
    if specs.is_empty() {
        return Ok(Vec::new());
    }
    let root = root_device_name(client, image_id).await?;

    let mut mappings = Vec::new();
    let mut root_used = false;
    for spec in specs {
        let Some(ebs) = &spec.ebs else {
            continue;
        };
        let device_name = match &spec.device_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ if root_used => return Err(ReconcileError::invalid("non root device must have name")),
            _ => {
                root_used = true;
                root.clone()
            }
        };

        let volume_type = ebs.volume_type.clone();
        let iops = match (volume_type.as_deref(), ebs.iops) {
            (Some(t), Some(iops)) if IOPS_VOLUME_TYPES.contains(&t) && iops > 0 => Some(to_i32("iops", iops)?),
            _ => None,
        };

        mappings.push(BlockDeviceMapping {
            device_name,
            ebs: EbsBlockDevice {
                volume_size: ebs.volume_size.map(|v| to_i32("volumeSize", v)).transpose()?,
                volume_type,
                iops,
                throughput: ebs.throughput.map(|v| to_i32("throughput", v)).transpose()?,
                encrypted: ebs.encrypted,
                kms_key_id: non_empty(&ebs.kms_key.id).or_else(|| non_empty(&ebs.kms_key.arn)),
                delete_on_termination: true,
            },
        });
    }
    Ok(mappings)
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AwsResourceReference, EbsBlockDeviceSpec, HostPlacement, SpotMarketOptions};
    use machina_cloud::FakeCloud;
    use machina_cloud::fake::stub;

    fn config() -> AwsMachineProviderConfig {
        AwsMachineProviderConfig {
            ami: AwsResourceReference::by_id(stub::AMI_ID),
            instance_type: stub::INSTANCE_TYPE.into(),
            subnet: AwsResourceReference::by_id(stub::SUBNET_ID),
            security_groups: vec![AwsResourceReference::by_id(stub::SECURITY_GROUP_ID)],
            ..Default::default()
        }
    }

    fn input(config: &AwsMachineProviderConfig) -> LaunchInput<'_> {
        LaunchInput {
            machine_name: stub::MACHINE_NAME,
            config,
            tags: vec![Tag::new("Name", stub::MACHINE_NAME)],
            user_data: None,
            host_id: None,
        }
    }

    #[test]
    fn test_spot_inferred_from_options() {
        let mut config = config();
        config.spot_market_options = Some(SpotMarketOptions::default());
        let options = market_options(&config).unwrap().unwrap();
        assert_eq!(options.market_type, MarketType::Spot);
        let spot = options.spot_options.unwrap();
        assert_eq!(spot.instance_interruption_behavior, InterruptionBehavior::Terminate);
        assert_eq!(spot.spot_instance_type, SpotInstanceType::OneTime);
        assert_eq!(spot.max_price, None);
    }

    #[test]
    fn test_market_type_rules() {
        let mut config = config();
        assert_eq!(market_options(&config).unwrap(), None);

        config.spot_market_options = Some(SpotMarketOptions {
            max_price: Some("0.25".into()),
        });
        let spot = market_options(&config).unwrap().unwrap().spot_options.unwrap();
        assert_eq!(spot.max_price.as_deref(), Some("0.25"));

        config.market_type = MARKET_TYPE_CAPACITY_BLOCK.into();
        assert!(!market_options(&config).unwrap_err().is_retryable());

        config.spot_market_options = None;
        assert!(market_options(&config).is_err());
        config.capacity_reservation_id = "cr-1234a6789d234f6f4".into();
        let options = market_options(&config).unwrap().unwrap();
        assert_eq!(options.market_type, MarketType::CapacityBlock);
        assert!(options.spot_options.is_none());

        config.market_type = "Reserved".into();
        assert!(market_options(&config).is_err());
    }

    #[test]
    fn test_capacity_reservation_id_shape() {
        for bad in ["cr-1234", "cr-B234a67891234567A", "xx-1234a6789d234f6f4"] {
            let err = capacity_reservation(bad).unwrap_err();
            assert!(matches!(err, ReconcileError::InvalidConfiguration(_)), "{}", bad);
        }
        let spec = capacity_reservation("cr-1234a6789d234f6f4").unwrap().unwrap();
        assert_eq!(spec.capacity_reservation_id, "cr-1234a6789d234f6f4");
        assert_eq!(capacity_reservation("").unwrap(), None);
    }

    #[test]
    fn test_interface_and_metadata_values() {
        assert_eq!(interface_type("").unwrap(), None);
        assert_eq!(interface_type("ENA").unwrap().as_deref(), Some("interface"));
        assert_eq!(interface_type("EFA").unwrap().as_deref(), Some("efa"));
        assert!(interface_type("SRIOV").is_err());

        assert_eq!(metadata_options("").unwrap(), None);
        assert_eq!(
            metadata_options("Required").unwrap().unwrap().http_tokens,
            HttpTokens::Required
        );
        assert!(metadata_options("Sometimes").is_err());
    }

    #[tokio::test]
    async fn test_wavelength_uses_carrier_ip() {
        let cloud = FakeCloud::with_defaults();
        let mut config = config();
        config.subnet = AwsResourceReference::by_id(stub::WAVELENGTH_SUBNET_ID);
        config.public_ip = Some(true);

        let request = build_request(&cloud, &input(&config)).await.unwrap();
        let interface = &request.network_interfaces[0];
        assert_eq!(interface.associate_carrier_ip_address, Some(true));
        assert_eq!(interface.associate_public_ip_address, None);
    }

    #[tokio::test]
    async fn test_standard_zone_uses_public_ip() {
        let cloud = FakeCloud::with_defaults();
        let mut config = config();
        config.public_ip = Some(false);

        let request = build_request(&cloud, &input(&config)).await.unwrap();
        let interface = &request.network_interfaces[0];
        assert_eq!(interface.associate_public_ip_address, Some(false));
        assert_eq!(interface.associate_carrier_ip_address, None);
    }

    #[tokio::test]
    async fn test_request_shape() {
        let cloud = FakeCloud::with_defaults();
        let mut config = config();
        config.iam_instance_profile = Some(AwsResourceReference::by_id("worker-profile"));
        config.placement.availability_zone = stub::AVAILABILITY_ZONE.into();
        config.placement_group_name = "pg-partition".into();
        config.placement_group_partition = Some(2);
        cloud.add_placement_group(cloud::PlacementGroupInfo {
            group_name: "pg-partition".into(),
            strategy: Some("partition".into()),
            partition_count: Some(3),
            ..Default::default()
        });

        let mut launch_input = input(&config);
        launch_input.user_data = Some("dXNlci1kYXRh".into());
        let request = build_request(&cloud, &launch_input).await.unwrap();

        assert_eq!(request.image_id, stub::AMI_ID);
        assert_eq!((request.min_count, request.max_count), (1, 1));
        assert_eq!(request.iam_instance_profile_name.as_deref(), Some("worker-profile"));
        assert_eq!(request.tag_specifications.len(), 2);
        assert_eq!(request.user_data.as_deref(), Some("dXNlci1kYXRh"));
        assert!(request.block_device_mappings.is_empty());

        let placement = request.placement.unwrap();
        // The subnet ID already pins the zone.
        assert_eq!(placement.availability_zone, None);
        assert_eq!(placement.group_name.as_deref(), Some("pg-partition"));
        assert_eq!(placement.partition_number, Some(2));
        assert_eq!(cloud.call_count("DescribeImages"), 0);
    }

    #[tokio::test]
    async fn test_dedicated_host_placement() {
        let cloud = FakeCloud::with_defaults();
        let mut config = config();
        config.placement.host = Some(HostPlacement::default());
        let mut launch_input = input(&config);
        launch_input.host_id = Some("h-0123456789abcdef0".into());

        let placement = build_request(&cloud, &launch_input).await.unwrap().placement.unwrap();
        assert_eq!(placement.host_id.as_deref(), Some("h-0123456789abcdef0"));
        assert_eq!(placement.tenancy.as_deref(), Some("host"));
        assert_eq!(placement.affinity.as_deref(), Some("host"));
    }

    #[tokio::test]
    async fn test_invalid_tenancy_makes_no_calls() {
        let cloud = FakeCloud::with_defaults();
        let mut config = config();
        config.placement.tenancy = "shared".into();
        let err = build_request(&cloud, &input(&config)).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_partition_validation() {
        let cloud = FakeCloud::new();
        cloud.add_placement_group(cloud::PlacementGroupInfo {
            group_name: "pg-spread".into(),
            strategy: Some("spread".into()),
            ..Default::default()
        });
        cloud.add_placement_group(cloud::PlacementGroupInfo {
            group_name: "pg-partition".into(),
            strategy: Some("partition".into()),
            partition_count: Some(3),
            ..Default::default()
        });

        let mut config = config();
        validate_partition(&cloud, &config).await.unwrap();
        assert_eq!(cloud.call_count("DescribePlacementGroups"), 0);

        config.placement_group_partition = Some(1);
        assert!(validate_partition(&cloud, &config).await.is_err());

        config.placement_group_name = "pg-spread".into();
        assert!(validate_partition(&cloud, &config).await.is_err());

        config.placement_group_name = "pg-missing".into();
        assert!(!validate_partition(&cloud, &config).await.unwrap_err().is_retryable());

        config.placement_group_name = "pg-partition".into();
        validate_partition(&cloud, &config).await.unwrap();
        config.placement_group_partition = Some(4);
        assert!(validate_partition(&cloud, &config).await.is_err());
    }

    #[tokio::test]
    async fn test_block_devices() {
        let cloud = FakeCloud::with_defaults();
        let ebs = |volume_type: &str, iops: i64| EbsBlockDeviceSpec {
            volume_size: Some(120),
            volume_type: Some(volume_type.into()),
            iops: Some(iops),
            kms_key: AwsResourceReference {
                id: Some("kms-id".into()),
                arn: Some("arn:aws:kms:key".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let specs = vec![
            BlockDeviceMappingSpec {
                device_name: None,
                ebs: Some(ebs("gp3", 3000)),
            },
            BlockDeviceMappingSpec {
                device_name: Some("/dev/sdb".into()),
                ebs: Some(ebs("gp2", 100)),
            },
            BlockDeviceMappingSpec {
                device_name: Some("/dev/sdc".into()),
                ebs: Some(ebs("io1", 0)),
            },
            BlockDeviceMappingSpec {
                device_name: Some("/dev/sdd".into()),
                ebs: None,
            },
        ];

        let mappings = block_device_mappings(&cloud, stub::AMI_ID, &specs).await.unwrap();
        assert_eq!(mappings.len(), 3);
        assert_eq!(mappings[0].device_name, stub::ROOT_DEVICE_NAME);
        assert_eq!(mappings[0].ebs.iops, Some(3000));
        assert_eq!(mappings[0].ebs.kms_key_id.as_deref(), Some("kms-id"));
        assert!(mappings[0].ebs.delete_on_termination);
        assert_eq!(mappings[1].ebs.iops, None);
        assert_eq!(mappings[2].ebs.iops, None);
    }

    #[tokio::test]
    async fn test_empty_kms_key_id_falls_back_to_arn() {
        let cloud = FakeCloud::with_defaults();
        let device = |id: Option<&str>, arn: Option<&str>| BlockDeviceMappingSpec {
            device_name: Some("/dev/sdb".into()),
            ebs: Some(EbsBlockDeviceSpec {
                kms_key: AwsResourceReference {
                    id: id.map(Into::into),
                    arn: arn.map(Into::into),
                    ..Default::default()
                },
                ..Default::default()
            }),
        };
        let specs = vec![
            device(Some(""), Some("arn:aws:kms:key")),
            device(Some(""), Some("")),
            device(None, None),
        ];

        let mappings = block_device_mappings(&cloud, stub::AMI_ID, &specs).await.unwrap();
        assert_eq!(mappings[0].ebs.kms_key_id.as_deref(), Some("arn:aws:kms:key"));
        assert_eq!(mappings[1].ebs.kms_key_id, None);
        assert_eq!(mappings[2].ebs.kms_key_id, None);
    }

    #[tokio::test]
    async fn test_two_unnamed_block_devices_rejected() {
        let cloud = FakeCloud::with_defaults();
        let unnamed = BlockDeviceMappingSpec {
            device_name: None,
            ebs: Some(EbsBlockDeviceSpec::default()),
        };
        let err = block_device_mappings(&cloud, stub::AMI_ID, &[unnamed.clone(), unnamed])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non root device must have name"));
    }

    #[tokio::test]
    async fn test_launch_client_error_is_invalid_configuration() {
        let cloud = FakeCloud::with_defaults();
        cloud.fail_next(
            "RunInstances",
            cloud::CloudError::classify("RunInstances", Some(400), Some("InvalidParameterValue"), "bad type"),
        );
        let config = config();
        let err = launch(&cloud, input(&config)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidConfiguration(_)));

        cloud.fail_next(
            "RunInstances",
            cloud::CloudError::classify("RunInstances", Some(500), Some("InternalError"), "oops"),
        );
        let err = launch(&cloud, input(&config)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::CreateFailed(_)));

        let instance = launch(&cloud, input(&config)).await.unwrap();
        assert!(instance.instance_id.starts_with("i-"));
    }
}
