//! Launch request policy as seen through full reconcile cycles.

use machina_cloud::fake::stub;
use machina_cloud::{InterruptionBehavior, MarketType, SpotInstanceType};
use machina_controller::api::{
    AwsMachineProviderConfig, AwsResourceReference, MachinePhase, SpotMarketOptions,
};
use machina_controller::events::REASON_FAILED_CREATE;
use machina_controller::machine::reconcile;
use machina_controller::testing::TestEnv;
use machina_controller::Action;

async fn launch(env: &TestEnv, name: &str, config: AwsMachineProviderConfig) -> anyhow::Result<Action> {
    let key = env.create_machine(name, config).await;
    reconcile(&env.ctx, &key).await?;
    Ok(reconcile(&env.ctx, &key).await?)
}

#[tokio::test]
async fn test_spot_inferred_from_empty_options() -> anyhow::Result<()> {
    let env = TestEnv::new().await;
    let mut config = env.provider_config();
    config.spot_market_options = Some(SpotMarketOptions::default());
    launch(&env, "spot-0", config).await?;

    let request = &env.cloud.run_requests()[0];
    let market = request.market_options.as_ref().unwrap();
    assert_eq!(market.market_type, MarketType::Spot);
    let spot = market.spot_options.as_ref().unwrap();
    assert_eq!(spot.instance_interruption_behavior, InterruptionBehavior::Terminate);
    assert_eq!(spot.spot_instance_type, SpotInstanceType::OneTime);
    assert_eq!(spot.max_price, None);
    assert_eq!(request.capacity_reservation, None);
    Ok(())
}

#[tokio::test]
async fn test_capacity_block_reservation_ids() -> anyhow::Result<()> {
    let env = TestEnv::new().await;
    for (i, bad) in ["cr-1234", "cr-B234a67891234567A"].iter().enumerate() {
        let mut config = env.provider_config();
        config.market_type = "CapacityBlock".into();
        config.capacity_reservation_id = bad.to_string();
        let name = format!("capacity-bad-{}", i);
        assert_eq!(launch(&env, &name, config).await?, Action::await_change());

        let key = machina_controller::api::ObjectKey::new(machina_controller::testing::NAMESPACE, name);
        let machine = env.machine(&key).await.unwrap();
        assert_eq!(machine.status.phase, Some(MachinePhase::Failed));
        assert_eq!(machine.status.error_reason.as_deref(), Some("InvalidConfiguration"));
    }
    assert_eq!(env.cloud.call_count("RunInstances"), 0);
    assert_eq!(env.recorder.count(REASON_FAILED_CREATE), 2);

    let mut config = env.provider_config();
    config.market_type = "CapacityBlock".into();
    config.capacity_reservation_id = "cr-1234a6789d234f6f4".into();
    launch(&env, "capacity-good", config).await?;

    let request = &env.cloud.run_requests()[0];
    assert_eq!(
        request.capacity_reservation.as_ref().map(|c| c.capacity_reservation_id.as_str()),
        Some("cr-1234a6789d234f6f4")
    );
    assert_eq!(
        request.market_options.as_ref().map(|m| m.market_type),
        Some(MarketType::CapacityBlock)
    );
    Ok(())
}

#[tokio::test]
async fn test_wavelength_subnet_gets_carrier_ip() -> anyhow::Result<()> {
    let env = TestEnv::new().await;
    let mut config = env.provider_config();
    config.subnet = AwsResourceReference::by_id(stub::WAVELENGTH_SUBNET_ID);
    config.public_ip = Some(true);
    launch(&env, "edge-0", config).await?;

    let mut config = env.provider_config();
    config.public_ip = Some(false);
    launch(&env, "core-0", config).await?;

    let requests = env.cloud.run_requests();
    let edge = &requests[0].network_interfaces[0];
    assert_eq!(edge.associate_carrier_ip_address, Some(true));
    assert_eq!(edge.associate_public_ip_address, None);
    let core = &requests[1].network_interfaces[0];
    assert_eq!(core.associate_public_ip_address, Some(false));
    assert_eq!(core.associate_carrier_ip_address, None);
    Ok(())
}

#[tokio::test]
async fn test_ami_by_filter_picks_newest() -> anyhow::Result<()> {
    let env = TestEnv::new().await;
    env.cloud.add_image(machina_cloud::Image {
        image_id: "ami-0newer".into(),
        name: Some("rhcos-next".into()),
        creation_date: Some("2024-06-01T00:00:00.000Z".into()),
        root_device_name: Some(stub::ROOT_DEVICE_NAME.into()),
    });
    let mut config = env.provider_config();
    config.ami = AwsResourceReference::by_filter("name", vec!["rhcos-stub".into(), "rhcos-next".into()]);
    launch(&env, "filtered-0", config).await?;

    assert_eq!(env.cloud.run_requests()[0].image_id, "ami-0newer");
    Ok(())
}
