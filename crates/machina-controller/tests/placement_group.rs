//! Placement groups and the machines placed into them.

use machina_controller::api::{
    MachinePhase, ObjectKey, PLACEMENT_GROUP_FINALIZER, PlacementGroupType,
};
use machina_controller::testing::TestEnv;
use machina_controller::{Action, machine, placementgroup};
use tokio_test::assert_ok;

async fn ready_group(env: &TestEnv, name: &str, partitions: i32) -> anyhow::Result<ObjectKey> {
    let key = env
        .create_placement_group(name, PlacementGroupType::Partition, Some(partitions))
        .await;
    placementgroup::reconcile(&env.ctx, &key).await?;
    placementgroup::reconcile(&env.ctx, &key).await?;
    Ok(key)
}

#[tokio::test]
async fn test_machine_launches_into_managed_partition_group() -> anyhow::Result<()> {
    let env = TestEnv::new().await;
    ready_group(&env, "pg-workers", 3).await?;

    let mut config = env.provider_config();
    config.placement_group_name = "pg-workers".into();
    config.placement_group_partition = Some(2);
    let key = env.create_machine("worker-0", config).await;
    assert_ok!(machine::reconcile(&env.ctx, &key).await);
    assert_ok!(machine::reconcile(&env.ctx, &key).await);

    let placement = env.cloud.run_requests()[0].placement.clone().unwrap();
    assert_eq!(placement.group_name.as_deref(), Some("pg-workers"));
    assert_eq!(placement.partition_number, Some(2));
    Ok(())
}

#[tokio::test]
async fn test_partition_out_of_range_is_not_launched() -> anyhow::Result<()> {
    let env = TestEnv::new().await;
    ready_group(&env, "pg-small", 2).await?;

    let mut config = env.provider_config();
    config.placement_group_name = "pg-small".into();
    config.placement_group_partition = Some(3);
    let key = env.create_machine("worker-0", config).await;
    machine::reconcile(&env.ctx, &key).await?;
    assert_eq!(machine::reconcile(&env.ctx, &key).await?, Action::await_change());

    let machine = env.machine(&key).await.unwrap();
    assert_eq!(machine.status.phase, Some(MachinePhase::Failed));
    assert_eq!(env.cloud.call_count("RunInstances"), 0);
    Ok(())
}

#[tokio::test]
async fn test_group_outlives_its_machines() -> anyhow::Result<()> {
    let env = TestEnv::new().await;
    let group_key = ready_group(&env, "pg-workers", 3).await?;

    let mut config = env.provider_config();
    config.placement_group_name = "pg-workers".into();
    let machine_key = env.create_machine("worker-0", config).await;
    machine::reconcile(&env.ctx, &machine_key).await?;
    machine::reconcile(&env.ctx, &machine_key).await?;

    env.ctx.placement_groups.delete(&group_key).await?;
    let err = placementgroup::reconcile(&env.ctx, &group_key).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(env.cloud.call_count("DeletePlacementGroup"), 0);
    let group = env.placement_group(&group_key).await.unwrap();
    assert!(group.metadata.has_finalizer(PLACEMENT_GROUP_FINALIZER));

    env.delete_machine(&machine_key).await;
    machine::reconcile(&env.ctx, &machine_key).await?;
    machine::reconcile(&env.ctx, &machine_key).await?;
    assert!(env.machine(&machine_key).await.is_none());

    assert_eq!(
        placementgroup::reconcile(&env.ctx, &group_key).await?,
        Action::await_change()
    );
    assert_eq!(env.cloud.call_count("DeletePlacementGroup"), 1);
    assert!(env.cloud.placement_group("pg-workers").is_none());
    assert!(env.placement_group(&group_key).await.is_none());
    Ok(())
}
