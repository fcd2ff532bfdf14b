//! AWSPlacementGroup reconciler
//!
//! Keeps a cloud placement group in step with its declarative object. The
//! group's configuration is observed at most once per TTL window and copied
//! into status. Configuration drift is reported, never corrected, since the
//! cloud does not allow a group's strategy to change.

use crate::action::Action;
use crate::api::{
    AwsPlacementGroup, Condition, ConditionStatus, DELETING_CONDITION, Infrastructure,
    ManagedPlacementGroup, ManagementState, ObjectKey, ObservedConfiguration,
    PLACEMENT_GROUP_FINALIZER, PartitionSpec, PlacementGroupType, READY_CONDITION,
    REASON_CONFIGURATION_IN_SYNC, REASON_CONFIGURATION_MISMATCH, REASON_CREATION_FAILED,
    REASON_CREATION_SUCCEEDED, REASON_DELETION_FAILED, set_condition,
};
use crate::context::Context;
use crate::error::{ReconcileError, Result};
use crate::events::{ObjectReference, REASON_RECONCILE_ERROR};
use crate::tags;
use chrono::{DateTime, TimeDelta, Utc};
use machina_cloud::{
    CloudClient, CreatePlacementGroupRequest, Filter, Instance, InstanceStateName, LookupExt,
    PlacementGroupInfo,
};
use std::time::Duration;

const MIN_PARTITIONS: i32 = 1;
const MAX_PARTITIONS: i32 = 7;

/// Reconciles one placement group.
pub async fn reconcile(ctx: &Context, key: &ObjectKey) -> Result<Action> {
    let Some(mut group) = ctx.placement_groups.get(key).await? else {
        tracing::debug!("AWSPlacementGroup {} is gone", key);
        return Ok(Action::await_change());
    };
    let object = ObjectReference::of(&group);

    if let Err(err) = validate(&group) {
        // Nothing to do until the object is edited.
        tracing::warn!("{}: {}", key, err);
        ctx.recorder.warning(&object, REASON_RECONCILE_ERROR, &err.to_string());
        return Ok(Action::await_change());
    }

    let infra = ctx.infrastructure().await?;
    let credentials = group.spec.credentials_secret.as_ref().map(|s| s.name.as_str());
    let client = ctx
        .cloud_client(&group.metadata.namespace, &infra.status.region, credentials)
        .await?;

    let original = group.clone();
    let ttl = ctx.config.placement_group.observed_ttl();
    let outcome = reconcile_group(client.as_ref(), &infra, &mut group, ttl).await;

    let outcome = match outcome {
        Ok(action) => Ok(action),
        Err(err) => {
            tracing::warn!("{}: failed to reconcile placement group: {}", key, err);
            ctx.recorder.warning(&object, REASON_RECONCILE_ERROR, &err.to_string());
            if err.is_retryable() { Err(err) } else { Ok(Action::await_change()) }
        }
    };

    if group.metadata != original.metadata || group.spec != original.spec {
        match ctx.placement_groups.patch(&group).await? {
            Some(updated) => group.metadata.resource_version = updated.metadata.resource_version,
            None => return outcome,
        }
    }
    if group.status != original.status {
        ctx.placement_groups.patch_status(&group).await?;
    }
    outcome
}

/// Rejects objects that cannot be acted on.
pub fn validate(group: &AwsPlacementGroup) -> Result<()> {
    let management = &group.spec.management_spec;
    if management.management_state == ManagementState::Managed {
        if management.managed.is_none() {
            return Err(ReconcileError::invalid(
                "spec.managementSpec.managed must be set when the management state is Managed",
            ));
        }
        if group.status.management_state == Some(ManagementState::Unmanaged) {
            return Err(ReconcileError::invalid(
                "spec.managementSpec.managementState cannot be set to Managed once it has been Unmanaged",
            ));
        }
    }
    if let Some(count) = management
        .managed
        .as_ref()
        .and_then(|m| m.partition.as_ref())
        .and_then(|p| p.count)
        && !(MIN_PARTITIONS..=MAX_PARTITIONS).contains(&count)
    {
        return Err(ReconcileError::invalid(format!(
            "spec.managementSpec.managed.partition.count must be between {} and {}, got {}",
            MIN_PARTITIONS, MAX_PARTITIONS, count
        )));
    }
    Ok(())
}

async fn reconcile_group(
    client: &dyn CloudClient,
    infra: &Infrastructure,
    group: &mut AwsPlacementGroup,
    ttl: Duration,
) -> Result<Action> {
    let now = Utc::now();
    if group.status.expires_at.is_none_or(|at| at < now) {
        observe(client, group, ttl).await?;
    }

    let state = group.spec.management_spec.management_state;
    group.status.management_state = Some(state);

    if state == ManagementState::Unmanaged {
        if group.metadata.remove_finalizer(PLACEMENT_GROUP_FINALIZER) {
            tracing::info!("{}: unmanaged, removing finalizer", group.name());
            return Ok(Action::requeue_now());
        }
        tracing::debug!("{}: ignoring unmanaged placement group", group.name());
        return Ok(Action::requeue(requeue_at(group.status.expires_at)));
    }

    if !group.metadata.is_deleting() {
        if group.metadata.add_finalizer(PLACEMENT_GROUP_FINALIZER) {
            tracing::info!("{}: adding finalizer", group.name());
            return Ok(Action::requeue_now());
        }
    } else {
        if !group.metadata.has_finalizer(PLACEMENT_GROUP_FINALIZER) {
            return Ok(Action::await_change());
        }
        if let Err(err) = delete(client, infra, group).await {
            set_condition(
                &mut group.status.conditions,
                Condition::new(
                    DELETING_CONDITION,
                    ConditionStatus::True,
                    REASON_DELETION_FAILED,
                    err.to_string(),
                ),
            );
            return Err(err);
        }
        group.metadata.remove_finalizer(PLACEMENT_GROUP_FINALIZER);
        tracing::info!("{}: deleted, removing finalizer", group.name());
        return Ok(Action::await_change());
    }

    check_or_create(client, infra, group).await?;
    Ok(Action::requeue(requeue_at(group.status.expires_at)))
}

/// Time left until `expires_at`; zero when it has passed or is unset.
fn requeue_at(expires_at: Option<DateTime<Utc>>) -> Duration {
    expires_at
        .and_then(|at| (at - Utc::now()).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

/// The group with the object's name, if the cloud knows it.
async fn describe(client: &dyn CloudClient, name: &str) -> Result<Option<PlacementGroupInfo>> {
    let groups = client
        .describe_placement_groups(&[name.to_string()])
        .await
        .into_lookup()
        .map_err(|e| {
            ReconcileError::from_cloud(e, ReconcileError::RetrievalFailed, "could not describe placement groups")
        })?;
    let groups = groups.found().unwrap_or_default();
    if groups.len() > 1 {
        return Err(ReconcileError::RetrievalFailed(format!(
            "expected 1 placement group named {}, got {}",
            name,
            groups.len()
        )));
    }
    Ok(groups.into_iter().next())
}

/// Refreshes the observed configuration and its expiry.
async fn observe(client: &dyn CloudClient, group: &mut AwsPlacementGroup, ttl: Duration) -> Result<()> {
    match describe(client, group.name()).await? {
        Some(info) => {
            tracing::info!(
                "{}: observed placement group {}",
                group.name(),
                info.group_id.as_deref().unwrap_or("<unknown id>")
            );
            set_observed_configuration(group, &info);
        }
        None => tracing::info!("{}: no placement group found", group.name()),
    }
    let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::minutes(2));
    group.status.expires_at = Some(Utc::now() + ttl);
    Ok(())
}

fn observed_configuration(info: &PlacementGroupInfo) -> Option<ObservedConfiguration> {
    let group_type = PlacementGroupType::from_strategy(info.strategy.as_deref()?)?;
    let partition = (group_type == PlacementGroupType::Partition).then(|| PartitionSpec {
        count: info.partition_count,
    });
    Some(ObservedConfiguration {
        group_type,
        partition,
    })
}

fn in_sync(observed: &ObservedConfiguration, desired: &ManagedPlacementGroup) -> bool {
    if observed.group_type != desired.group_type {
        return false;
    }
    match desired.partition.as_ref().and_then(|p| p.count) {
        Some(count) => observed.partition.as_ref().and_then(|p| p.count) == Some(count),
        None => true,
    }
}

fn set_observed_configuration(group: &mut AwsPlacementGroup, info: &PlacementGroupInfo) {
    let observed = observed_configuration(info);
    let synced = match (&observed, &group.spec.management_spec.managed) {
        (Some(observed), Some(desired)) => in_sync(observed, desired),
        _ => false,
    };
    group.status.observed_configuration = observed;

    let condition = if synced {
        Condition::new(READY_CONDITION, ConditionStatus::True, REASON_CONFIGURATION_IN_SYNC, "")
    } else {
        Condition::new(READY_CONDITION, ConditionStatus::False, REASON_CONFIGURATION_MISMATCH, "")
    };
    set_condition(&mut group.status.conditions, condition);
}

/// Checks an existing group against the desired configuration, or creates it.
async fn check_or_create(client: &dyn CloudClient, infra: &Infrastructure, group: &mut AwsPlacementGroup) -> Result<()> {
    let Some(desired) = group.spec.management_spec.managed.clone() else {
        return Err(ReconcileError::invalid("managed placement group has no configuration"));
    };

    if let Some(existing) = describe(client, group.name()).await? {
        if let Err(mismatch) = check_existing(group.name(), &desired, &existing) {
            let message = format!("invalid configuration for existing placement group: {}", mismatch);
            set_condition(
                &mut group.status.conditions,
                Condition::new(
                    READY_CONDITION,
                    ConditionStatus::False,
                    REASON_CONFIGURATION_MISMATCH,
                    &message,
                ),
            );
            return Err(ReconcileError::UpdateFailed(message));
        }
        set_observed_configuration(group, &existing);
        return Ok(());
    }

    let infra_tags = tags::infrastructure_tags(infra);
    let merged = tags::merge_infrastructure_tags(&[], &infra_tags);
    let request = CreatePlacementGroupRequest {
        group_name: group.name().to_string(),
        strategy: desired.group_type.strategy().to_string(),
        partition_count: match desired.group_type {
            PlacementGroupType::Partition => desired
                .partition
                .as_ref()
                .and_then(|p| p.count)
                .filter(|c| *c != 0),
            _ => None,
        },
        tags: tags::build_tag_list(group.name(), &infra.status.infrastructure_name, &merged),
    };

    match client.create_placement_group(request).await {
        Ok(created) => {
            tracing::info!(
                "{}: created placement group {}",
                group.name(),
                created.group_id.as_deref().unwrap_or("<unknown id>")
            );
            set_condition(
                &mut group.status.conditions,
                Condition::new(READY_CONDITION, ConditionStatus::True, REASON_CREATION_SUCCEEDED, ""),
            );
            Ok(())
        }
        Err(e) => {
            let err = ReconcileError::from_cloud(e, ReconcileError::CreateFailed, "failed to create placement group");
            set_condition(
                &mut group.status.conditions,
                Condition::new(
                    READY_CONDITION,
                    ConditionStatus::False,
                    REASON_CREATION_FAILED,
                    err.to_string(),
                ),
            );
            Err(err)
        }
    }
}

fn check_existing(
    name: &str,
    desired: &ManagedPlacementGroup,
    existing: &PlacementGroupInfo,
) -> std::result::Result<(), String> {
    if existing.group_name != name {
        return Err(format!(
            "name mismatch: wanted {:?}, got {:?}",
            name, existing.group_name
        ));
    }
    let strategy = existing.strategy.as_deref().unwrap_or_default();
    if strategy != desired.group_type.strategy() {
        return Err(format!(
            "type mismatch: wanted {:?}, got {:?}",
            desired.group_type.strategy(),
            strategy
        ));
    }
    if desired.group_type == PlacementGroupType::Partition
        && let Some(count) = desired.partition.as_ref().and_then(|p| p.count).filter(|c| *c != 0)
        && existing.partition_count != Some(count)
    {
        return Err(format!(
            "partition count mismatch: wanted {}, got {}",
            count,
            existing.partition_count.unwrap_or_default()
        ));
    }
    Ok(())
}

/// Deletes the cloud group, refusing when it is not ours or still has
/// instances in it. A group that is already gone counts as deleted.
async fn delete(client: &dyn CloudClient, infra: &Infrastructure, group: &AwsPlacementGroup) -> Result<()> {
    let Some(existing) = describe(client, group.name()).await? else {
        return Ok(());
    };

    let cluster_id = &infra.status.infrastructure_name;
    if !tags::is_owned(&existing.tags, cluster_id) {
        return Err(ReconcileError::OwnershipViolation(format!(
            "placement group {} is not tagged as owned by cluster {}",
            group.name(),
            cluster_id
        )));
    }

    let members = client
        .describe_instances(&[], &[Filter::single("placement-group-name", group.name())])
        .await
        .map_err(|e| {
            ReconcileError::from_cloud(
                e,
                ReconcileError::RetrievalFailed,
                "could not count instances in placement group",
            )
        })?;
    let active = members.iter().filter(|i: &&Instance| !i.is_terminated()).count();
    if active > 0 {
        return Err(ReconcileError::DeleteFailed(format!(
            "placement group {} still contains {} instances",
            group.name(),
            active
        )));
    }

    client
        .delete_placement_group(group.name())
        .await
        .map_err(|e| ReconcileError::from_cloud(e, ReconcileError::DeleteFailed, "could not delete placement group"))?;
    tracing::info!("{}: deleted placement group", group.name());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::find_condition;
    use crate::testing::TestEnv;
    use machina_cloud::Tag;
    use machina_cloud::fake::stub;

    fn owned_group(name: &str, strategy: &str, partitions: Option<i32>) -> PlacementGroupInfo {
        PlacementGroupInfo {
            group_name: name.into(),
            group_id: Some("pg-0123".into()),
            strategy: Some(strategy.into()),
            partition_count: partitions,
            state: Some("available".into()),
            tags: tags::build_tag_list(name, stub::CLUSTER_ID, &[]),
        }
    }

    #[test]
    fn test_validate() {
        let mut group = AwsPlacementGroup::new("ns", "pg");
        assert!(validate(&group).is_err());

        group.spec.management_spec.managed = Some(ManagedPlacementGroup {
            group_type: PlacementGroupType::Partition,
            partition: Some(PartitionSpec { count: Some(8) }),
        });
        assert!(validate(&group).is_err());

        group.spec.management_spec.managed = Some(ManagedPlacementGroup {
            group_type: PlacementGroupType::Partition,
            partition: Some(PartitionSpec { count: Some(7) }),
        });
        validate(&group).unwrap();

        group.status.management_state = Some(ManagementState::Unmanaged);
        let err = validate(&group).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_requeue_at() {
        assert_eq!(requeue_at(None), Duration::ZERO);
        assert_eq!(requeue_at(Some(Utc::now() - TimeDelta::seconds(5))), Duration::ZERO);
        let left = requeue_at(Some(Utc::now() + TimeDelta::seconds(60)));
        assert!(left > Duration::from_secs(58) && left <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_create_partition_group() {
        let env = TestEnv::new().await;
        let key = env
            .create_placement_group("pg-workers", PlacementGroupType::Partition, Some(3))
            .await;

        assert_eq!(reconcile(&env.ctx, &key).await.unwrap(), Action::requeue_now());
        let group = env.placement_group(&key).await.unwrap();
        assert!(group.metadata.has_finalizer(PLACEMENT_GROUP_FINALIZER));
        assert!(group.status.expires_at.is_some());

        let action = reconcile(&env.ctx, &key).await.unwrap();
        assert!(action.is_requeue());
        let requests = env.cloud.create_placement_group_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].strategy, "partition");
        assert_eq!(requests[0].partition_count, Some(3));
        assert_eq!(
            requests[0].tags,
            vec![
                Tag::new(tags::cluster_tag_key(stub::CLUSTER_ID), "owned"),
                Tag::new("Name", "pg-workers"),
            ]
        );

        let group = env.placement_group(&key).await.unwrap();
        let ready = find_condition(&group.status.conditions, READY_CONDITION).unwrap();
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.reason, REASON_CREATION_SUCCEEDED);
    }

    #[tokio::test]
    async fn test_observed_configuration_is_cached() {
        let env = TestEnv::new().await;
        env.cloud.add_placement_group(owned_group("pg-spread", "spread", None));
        let key = env
            .create_placement_group("pg-spread", PlacementGroupType::Spread, None)
            .await;

        reconcile(&env.ctx, &key).await.unwrap();
        reconcile(&env.ctx, &key).await.unwrap();
        // One observation, one existence check.
        assert_eq!(env.cloud.call_count("DescribePlacementGroups"), 2);

        let group = env.placement_group(&key).await.unwrap();
        assert_eq!(
            group.status.observed_configuration,
            Some(ObservedConfiguration {
                group_type: PlacementGroupType::Spread,
                partition: None,
            })
        );
        let ready = find_condition(&group.status.conditions, READY_CONDITION).unwrap();
        assert_eq!(ready.reason, REASON_CONFIGURATION_IN_SYNC);
        assert_eq!(env.cloud.call_count("CreatePlacementGroup"), 0);
    }

    #[tokio::test]
    async fn test_drift_is_reported_and_retried() {
        let env = TestEnv::new().await;
        env.cloud.add_placement_group(owned_group("pg-a", "cluster", None));
        let key = env
            .create_placement_group("pg-a", PlacementGroupType::Spread, None)
            .await;
        reconcile(&env.ctx, &key).await.unwrap();

        let err = reconcile(&env.ctx, &key).await.unwrap_err();
        assert!(err.is_retryable());
        let group = env.placement_group(&key).await.unwrap();
        let ready = find_condition(&group.status.conditions, READY_CONDITION).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, REASON_CONFIGURATION_MISMATCH);
        assert_eq!(env.recorder.count(REASON_RECONCILE_ERROR), 1);
    }

    #[tokio::test]
    async fn test_unmanaged_is_one_way() {
        let env = TestEnv::new().await;
        let key = env
            .create_placement_group("pg-b", PlacementGroupType::Cluster, None)
            .await;
        reconcile(&env.ctx, &key).await.unwrap();

        let mut group = env.placement_group(&key).await.unwrap();
        group.spec.management_spec.management_state = ManagementState::Unmanaged;
        env.ctx.placement_groups.patch(&group).await.unwrap();
        reconcile(&env.ctx, &key).await.unwrap();

        let mut group = env.placement_group(&key).await.unwrap();
        assert!(!group.metadata.has_finalizer(PLACEMENT_GROUP_FINALIZER));
        assert_eq!(group.status.management_state, Some(ManagementState::Unmanaged));

        group.spec.management_spec.management_state = ManagementState::Managed;
        env.ctx.placement_groups.patch(&group).await.unwrap();
        env.cloud.clear_calls();
        assert_eq!(reconcile(&env.ctx, &key).await.unwrap(), Action::await_change());
        let group = env.placement_group(&key).await.unwrap();
        assert!(!group.metadata.has_finalizer(PLACEMENT_GROUP_FINALIZER));
        assert_eq!(group.status.management_state, Some(ManagementState::Unmanaged));
        assert!(env.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_deletion_guard() {
        let env = TestEnv::new().await;
        let mut foreign = owned_group("pg-c", "cluster", None);
        foreign.tags = vec![Tag::new("Name", "pg-c")];
        env.cloud.add_placement_group(foreign);
        let key = env
            .create_placement_group("pg-c", PlacementGroupType::Cluster, None)
            .await;
        reconcile(&env.ctx, &key).await.unwrap();
        env.ctx.placement_groups.delete(&key).await.unwrap();

        // Not ours: recorded, not retried, not deleted.
        assert_eq!(reconcile(&env.ctx, &key).await.unwrap(), Action::await_change());
        assert_eq!(env.cloud.call_count("DeletePlacementGroup"), 0);
        let group = env.placement_group(&key).await.unwrap();
        let deleting = find_condition(&group.status.conditions, DELETING_CONDITION).unwrap();
        assert_eq!(deleting.reason, REASON_DELETION_FAILED);
        assert!(group.metadata.has_finalizer(PLACEMENT_GROUP_FINALIZER));
    }

    #[tokio::test]
    async fn test_delete_waits_for_empty_group() {
        let env = TestEnv::new().await;
        env.cloud.add_placement_group(owned_group("pg-d", "cluster", None));
        env.cloud.add_instance(Instance {
            instance_id: "i-member".into(),
            state: Some(InstanceStateName::Running),
            placement_group_name: Some("pg-d".into()),
            ..Default::default()
        });
        env.cloud.add_instance(Instance {
            instance_id: "i-old".into(),
            state: Some(InstanceStateName::Terminated),
            placement_group_name: Some("pg-d".into()),
            ..Default::default()
        });
        let key = env
            .create_placement_group("pg-d", PlacementGroupType::Cluster, None)
            .await;
        reconcile(&env.ctx, &key).await.unwrap();
        env.ctx.placement_groups.delete(&key).await.unwrap();

        let err = reconcile(&env.ctx, &key).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(env.cloud.call_count("DeletePlacementGroup"), 0);

        env.cloud.set_instance_state("i-member", InstanceStateName::Terminated);
        assert_eq!(reconcile(&env.ctx, &key).await.unwrap(), Action::await_change());
        assert_eq!(env.cloud.call_count("DeletePlacementGroup"), 1);
        assert!(env.cloud.placement_group("pg-d").is_none());
        assert!(env.placement_group(&key).await.is_none());
    }
}
