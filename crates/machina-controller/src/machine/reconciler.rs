//! Machine reconciliation state machine
//!
//! Every cycle re-derives the instance's state from the cloud. The recorded
//! instance ID is only a hint: it is tried first, then the ownership tags are
//! searched, and a launch happens only when both come up empty. The status
//! patch at the end of the cycle runs whether or not the cycle succeeded.

use super::scope::MachineScope;
use super::{addresses, dedicated_hosts, instances, launcher, load_balancers};
use crate::action::Action;
use crate::api::{ConditionStatus, MACHINE_FINALIZER, MachinePhase, ObjectKey};
use crate::context::Context;
use crate::error::{ReconcileError, Result};
use crate::events::{
    ObjectReference, REASON_CREATED, REASON_DELETED, REASON_FAILED_CREATE, REASON_FAILED_DELETE,
    REASON_FAILED_UPDATE, REASON_UPDATED,
};
use machina_cloud::{Instance, InstanceStateName, Lookup};

/// Reason recorded when the machine's instance was terminated outside our control.
pub const REASON_INSTANCE_TERMINATED: &str = "InstanceTerminated";
/// Reason recorded when a provisioned machine's instance can no longer be found.
pub const REASON_INSTANCE_MISSING: &str = "InstanceMissing";

/// Which branch of the cycle failed, for event reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Create,
    Update,
    Delete,
}

impl Stage {
    fn event_reason(self) -> &'static str {
        match self {
            Stage::Create => REASON_FAILED_CREATE,
            Stage::Update => REASON_FAILED_UPDATE,
            Stage::Delete => REASON_FAILED_DELETE,
        }
    }
}

/// Reconciles one machine.
///
/// Configuration errors are recorded on the machine and end the cycle
/// without a requeue; other errors are returned for the caller to retry
/// with backoff.
pub async fn reconcile(ctx: &Context, key: &ObjectKey) -> Result<Action> {
    let Some(mut machine) = ctx.machines.get(key).await? else {
        tracing::debug!("Machine {} is gone", key);
        return Ok(Action::await_change());
    };

    if machine.metadata.is_deleting() {
        if !machine.metadata.has_finalizer(MACHINE_FINALIZER) {
            return Ok(Action::await_change());
        }
    } else if machine.metadata.add_finalizer(MACHINE_FINALIZER) {
        // The finalizer must be in place before anything is created.
        ctx.machines.patch(&machine).await?;
        tracing::debug!("{}: added finalizer", key);
        return Ok(Action::requeue_now());
    }

    let object = ObjectReference::of(&machine);
    let deleting = machine.metadata.is_deleting();
    let mut scope = match MachineScope::new(ctx, machine).await {
        Ok(scope) => scope,
        Err(err) => {
            let reason = if deleting { REASON_FAILED_DELETE } else { REASON_FAILED_UPDATE };
            ctx.recorder.warning(&object, reason, &err.to_string());
            return if err.is_retryable() { Err(err) } else { Ok(Action::await_change()) };
        }
    };

    let mut stage = if deleting { Stage::Delete } else { Stage::Update };
    let outcome = if deleting {
        delete(&mut scope).await
    } else {
        reconcile_normal(&mut scope, &mut stage).await
    };

    let outcome = match outcome {
        Ok(action) => Ok(action),
        Err(err) => {
            ctx.recorder.warning(&object, stage.event_reason(), &err.to_string());
            if stage == Stage::Create {
                scope.set_instance_created(ConditionStatus::False, err.reason(), err.to_string());
            }
            if err.is_retryable() {
                Err(err)
            } else {
                scope.set_error(err.reason(), err.to_string());
                if stage == Stage::Create {
                    scope.set_phase(MachinePhase::Failed);
                }
                Ok(Action::await_change())
            }
        }
    };

    if let Err(patch_err) = scope.patch().await {
        tracing::warn!("{}: failed to patch machine: {}", key, patch_err);
        return match outcome {
            Ok(_) => Err(patch_err),
            Err(err) => Err(err),
        };
    }
    outcome
}

/// Finds the instance through the recorded ID, ignoring instances that are
/// not ours or that are stopped. Returns the instance and whether the
/// recorded ID pointed at nothing.
async fn find_recorded(scope: &MachineScope<'_>) -> Result<(Option<Instance>, bool)> {
    let Some(id) = scope.provider_status.instance_id.clone() else {
        return Ok((None, false));
    };
    match instances::find_by_id(scope.client.as_ref(), &id).await? {
        Lookup::Found(instance) if !crate::tags::is_owned(&instance.tags, &scope.cluster_id) => {
            tracing::warn!(
                "{}: instance {} is not tagged for cluster {}, ignoring it",
                scope.name(),
                id,
                scope.cluster_id
            );
            Ok((None, false))
        }
        Lookup::Found(instance) if instance.state == Some(InstanceStateName::Stopped) => {
            tracing::info!("{}: instance {} is stopped and will be replaced", scope.name(), id);
            Ok((None, false))
        }
        Lookup::Found(instance) => Ok((Some(instance), false)),
        Lookup::NotFound => Ok((None, true)),
    }
}

async fn reconcile_normal(scope: &mut MachineScope<'_>, stage: &mut Stage) -> Result<Action> {
    let client = scope.client.clone();
    let config = &scope.ctx_config().requeue;
    let (provisioning_delay, consistency_delay, visibility_timeout) = (
        config.provisioning_delay(),
        config.eventual_consistency_delay(),
        config.instance_visibility_timeout(),
    );

    let (recorded, recorded_missing) = find_recorded(scope).await?;
    let instance = match recorded {
        Some(instance) => Some(instance),
        None => instances::newest_by_tags(client.as_ref(), scope.name(), &scope.cluster_id).await?,
    };

    let Some(instance) = instance else {
        if recorded_missing {
            if scope.phase() == Some(MachinePhase::Failed) {
                return Ok(Action::await_change());
            }
            if scope.is_provisioned() {
                let id = scope.provider_status.instance_id.clone().unwrap_or_default();
                tracing::warn!("{}: instance {} disappeared", scope.name(), id);
                scope.set_phase(MachinePhase::Failed);
                scope.set_error(REASON_INSTANCE_MISSING, format!("can't find created instance {}", id));
                return Ok(Action::await_change());
            }
            // The cloud may not list a just-launched instance yet.
            if scope.launched_within(visibility_timeout) {
                tracing::info!(
                    "{}: recorded instance not visible yet, checking again later",
                    scope.name()
                );
                return Ok(Action::requeue(consistency_delay));
            }
            tracing::warn!(
                "{}: instance {} never became visible, launching a replacement",
                scope.name(),
                scope.provider_status.instance_id.as_deref().unwrap_or_default()
            );
            scope.provider_status.instance_id = None;
            scope.provider_status.instance_state = None;
            scope.set_instance_created(
                ConditionStatus::False,
                REASON_INSTANCE_MISSING,
                "instance never became visible",
            );
        }
        *stage = Stage::Create;
        create(scope).await?;
        return Ok(Action::requeue(provisioning_delay));
    };

    scope.provider_status.instance_id = Some(instance.instance_id.clone());
    scope.provider_status.instance_state = Some(instance.state_name().to_string());

    if instance.is_terminated() {
        tracing::warn!("{}: instance {} was terminated", scope.name(), instance.instance_id);
        scope.set_phase(MachinePhase::Failed);
        scope.set_error(
            REASON_INSTANCE_TERMINATED,
            format!("instance {} was terminated", instance.instance_id),
        );
        return Ok(Action::await_change());
    }

    if dedicated_hosts::allocated_id(&scope.provider_status).is_none()
        && let Some(host_id) = dedicated_hosts::dynamically_allocated_id(&instance, &scope.provider_config)
    {
        let host_id = host_id.to_string();
        dedicated_hosts::set_allocated_id(&mut scope.provider_status, &host_id);
    }

    if !instance.is_running() {
        tracing::info!(
            "{}: instance {} is {}, waiting for it to run",
            scope.name(),
            instance.instance_id,
            instance.state_name()
        );
        if scope.phase().is_none() {
            scope.set_phase(MachinePhase::Provisioning);
        }
        return Ok(Action::requeue(provisioning_delay));
    }

    update(scope, &instance).await?;
    Ok(Action::await_change())
}

/// Brings a running instance in line: tags, load balancers, addresses.
async fn update(scope: &mut MachineScope<'_>, instance: &Instance) -> Result<()> {
    let client = scope.client.clone();
    let expected = scope.tags();
    instances::reconcile_tags(client.as_ref(), instance, &expected).await?;
    load_balancers::register(
        client.as_ref(),
        instance,
        &scope.provider_config.load_balancers,
        scope.name(),
    )
    .await?;

    let domains = addresses::dhcp_domains(client.as_ref(), instance.vpc_id.as_deref()).await?;
    scope.machine.status.addresses = addresses::node_addresses(instance, &domains);
    if let Some(provider_id) = addresses::provider_id(instance) {
        scope.machine.spec.provider_id = Some(provider_id);
    }

    scope.clear_error();
    if scope.phase() != Some(MachinePhase::Provisioned) {
        scope.set_phase(MachinePhase::Provisioned);
        let message = format!("Updated machine {}", scope.name());
        scope.event_normal(REASON_UPDATED, &message);
    }
    Ok(())
}

/// Launches the machine's instance and records it.
async fn create(scope: &mut MachineScope<'_>) -> Result<()> {
    let client = scope.client.clone();
    let removed = instances::terminate_stopped(client.as_ref(), scope.name(), &scope.cluster_id).await?;
    if removed > 0 {
        tracing::info!("{}: terminated {} stopped instances before launch", scope.name(), removed);
    }

    let placement = &scope.provider_config.placement;
    let host_id = if dedicated_hosts::should_allocate(placement) {
        match dedicated_hosts::allocated_id(&scope.provider_status) {
            Some(id) => Some(id.to_string()),
            None => {
                if placement.availability_zone.is_empty() {
                    return Err(ReconcileError::invalid(
                        "availabilityZone is required for dynamic dedicated host allocation",
                    ));
                }
                let id = dedicated_hosts::allocate(
                    client.as_ref(),
                    &scope.provider_config.instance_type,
                    &placement.availability_zone,
                    dedicated_hosts::dynamic_tags(placement),
                    scope.name(),
                )
                .await?;
                dedicated_hosts::set_allocated_id(&mut scope.provider_status, &id);
                Some(id)
            }
        }
    } else {
        dedicated_hosts::user_provided_id(placement).map(String::from)
    };

    let user_data = scope.user_data().await?;
    let input = launcher::LaunchInput {
        machine_name: scope.name(),
        config: &scope.provider_config,
        tags: scope.tags(),
        user_data,
        host_id,
    };
    let instance = launcher::launch(client.as_ref(), input).await?;

    scope.provider_status.instance_id = Some(instance.instance_id.clone());
    scope.provider_status.instance_state = Some(instance.state_name().to_string());
    scope.set_phase(MachinePhase::Provisioning);
    scope.clear_error();
    scope.set_instance_created(ConditionStatus::True, "InstanceCreated", "");
    let message = format!("Created machine {}", scope.name());
    scope.event_normal(REASON_CREATED, &message);
    Ok(())
}

/// Terminates the machine's instances and, once they are gone, releases the
/// dedicated host and drops the finalizer.
async fn delete(scope: &mut MachineScope<'_>) -> Result<Action> {
    let client = scope.client.clone();
    let deletion_delay = scope.ctx_config().requeue.deletion_delay();
    scope.set_phase(MachinePhase::Deleting);

    let mut targets = Vec::new();
    if let Some(id) = scope.provider_status.instance_id.clone()
        && let Lookup::Found(instance) = instances::find_by_id(client.as_ref(), &id).await?
        && crate::tags::is_owned(&instance.tags, &scope.cluster_id)
        && !instance.is_terminated()
    {
        targets.push(instance);
    }
    let tagged = instances::find_by_tags(
        client.as_ref(),
        scope.name(),
        &scope.cluster_id,
        InstanceStateName::live_states(),
    )
    .await?;
    for instance in tagged {
        if !targets.iter().any(|t| t.instance_id == instance.instance_id) {
            targets.push(instance);
        }
    }

    if !targets.is_empty() {
        for instance in &targets {
            if dedicated_hosts::allocated_id(&scope.provider_status).is_none()
                && let Some(host_id) = dedicated_hosts::dynamically_allocated_id(instance, &scope.provider_config)
            {
                let host_id = host_id.to_string();
                dedicated_hosts::set_allocated_id(&mut scope.provider_status, &host_id);
            }
            load_balancers::deregister_ip_targets(
                client.as_ref(),
                instance,
                &scope.provider_config.load_balancers,
                scope.name(),
            )
            .await?;
            tracing::info!("{}: terminating instance {}", scope.name(), instance.instance_id);
            instances::terminate(client.as_ref(), &instance.instance_id).await?;
        }
        scope.provider_status.instance_state = Some(InstanceStateName::ShuttingDown.as_str().to_string());

        // The cloud refuses to release a host that still has an instance on
        // it, so this attempt may fail until termination completes.
        if let Some(host_id) = dedicated_hosts::allocated_id(&scope.provider_status).map(String::from) {
            match dedicated_hosts::release(client.as_ref(), &host_id, scope.name()).await {
                Ok(()) => dedicated_hosts::clear_allocated_id(&mut scope.provider_status),
                Err(err) => tracing::info!("{}: host {} not released yet: {}", scope.name(), host_id, err),
            }
        }
        return Ok(Action::requeue(deletion_delay));
    }

    if let Some(host_id) = dedicated_hosts::allocated_id(&scope.provider_status).map(String::from) {
        dedicated_hosts::release(client.as_ref(), &host_id, scope.name()).await?;
        dedicated_hosts::clear_allocated_id(&mut scope.provider_status);
    }

    scope.provider_status.instance_id = None;
    scope.provider_status.instance_state = None;
    scope.remove_finalizer(MACHINE_FINALIZER);
    let message = format!("Deleted machine {}", scope.name());
    scope.event_normal(REASON_DELETED, &message);
    Ok(Action::await_change())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{find_condition, CLUSTER_ID_LABEL};
    use crate::testing::TestEnv;
    use machina_cloud::fake::stub;

    #[tokio::test]
    async fn test_first_cycle_only_adds_finalizer() {
        let env = TestEnv::new().await;
        let key = env.create_machine(stub::MACHINE_NAME, env.provider_config()).await;

        let action = reconcile(&env.ctx, &key).await.unwrap();
        assert_eq!(action, Action::requeue_now());
        assert!(env.cloud.calls().is_empty());
        let machine = env.machine(&key).await.unwrap();
        assert!(machine.metadata.has_finalizer(MACHINE_FINALIZER));
    }

    #[tokio::test]
    async fn test_create_then_provision() {
        let env = TestEnv::new().await;
        let key = env.create_machine(stub::MACHINE_NAME, env.provider_config()).await;
        reconcile(&env.ctx, &key).await.unwrap();

        let action = reconcile(&env.ctx, &key).await.unwrap();
        assert!(action.is_requeue());
        assert_eq!(env.cloud.call_count("RunInstances"), 1);
        let machine = env.machine(&key).await.unwrap();
        assert_eq!(machine.status.phase, Some(MachinePhase::Provisioning));
        let status = env.provider_status(&key).await;
        let instance_id = status.instance_id.clone().unwrap();
        let created = find_condition(&status.conditions, "InstanceCreated").unwrap();
        assert_eq!(created.status, ConditionStatus::True);
        assert_eq!(env.recorder.count(REASON_CREATED), 1);

        // Still pending: wait, never relaunch.
        let action = reconcile(&env.ctx, &key).await.unwrap();
        assert!(action.is_requeue());
        assert_eq!(env.cloud.call_count("RunInstances"), 1);

        env.cloud.set_instance_state(&instance_id, InstanceStateName::Running);
        let action = reconcile(&env.ctx, &key).await.unwrap();
        assert_eq!(action, Action::await_change());
        let machine = env.machine(&key).await.unwrap();
        assert_eq!(machine.status.phase, Some(MachinePhase::Provisioned));
        assert_eq!(
            machine.spec.provider_id,
            Some(format!("aws:///{}/{}", stub::AVAILABILITY_ZONE, instance_id))
        );
        assert!(!machine.status.addresses.is_empty());
        assert_eq!(env.cloud.call_count("RunInstances"), 1);
        assert_eq!(env.cloud.call_count("CreateTags"), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_without_requeue() {
        let env = TestEnv::new().await;
        let mut config = env.provider_config();
        config.market_type = "CapacityBlock".into();
        config.capacity_reservation_id = "cr-1234".into();
        let key = env.create_machine(stub::MACHINE_NAME, config).await;
        reconcile(&env.ctx, &key).await.unwrap();

        let action = reconcile(&env.ctx, &key).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(env.cloud.call_count("RunInstances"), 0);

        let machine = env.machine(&key).await.unwrap();
        assert_eq!(machine.status.phase, Some(MachinePhase::Failed));
        assert_eq!(machine.status.error_reason.as_deref(), Some("InvalidConfiguration"));
        let status = env.provider_status(&key).await;
        let created = find_condition(&status.conditions, "InstanceCreated").unwrap();
        assert_eq!(created.status, ConditionStatus::False);
        assert_eq!(env.recorder.count(REASON_FAILED_CREATE), 1);
    }

    #[tokio::test]
    async fn test_transient_launch_error_is_returned_and_patched() {
        let env = TestEnv::new().await;
        let key = env.create_machine(stub::MACHINE_NAME, env.provider_config()).await;
        reconcile(&env.ctx, &key).await.unwrap();

        env.cloud.fail_next(
            "RunInstances",
            machina_cloud::CloudError::classify("RunInstances", Some(503), Some("Unavailable"), "busy"),
        );
        let err = reconcile(&env.ctx, &key).await.unwrap_err();
        assert!(err.is_retryable());
        let status = env.provider_status(&key).await;
        let created = find_condition(&status.conditions, "InstanceCreated").unwrap();
        assert_eq!(created.status, ConditionStatus::False);
        let machine = env.machine(&key).await.unwrap();
        assert_ne!(machine.status.phase, Some(MachinePhase::Failed));

        reconcile(&env.ctx, &key).await.unwrap();
        assert_eq!(env.cloud.instances().len(), 1);
    }

    #[tokio::test]
    async fn test_terminated_instance_marks_failed() {
        let env = TestEnv::new().await;
        let key = env.create_machine(stub::MACHINE_NAME, env.provider_config()).await;
        reconcile(&env.ctx, &key).await.unwrap();
        reconcile(&env.ctx, &key).await.unwrap();
        let id = env.provider_status(&key).await.instance_id.unwrap();

        env.cloud.set_instance_state(&id, InstanceStateName::Terminated);
        let action = reconcile(&env.ctx, &key).await.unwrap();
        assert_eq!(action, Action::await_change());
        let machine = env.machine(&key).await.unwrap();
        assert_eq!(machine.status.phase, Some(MachinePhase::Failed));
        assert_eq!(machine.status.error_reason.as_deref(), Some(REASON_INSTANCE_TERMINATED));
        assert_eq!(env.cloud.call_count("RunInstances"), 1);
    }

    #[tokio::test]
    async fn test_stopped_instance_is_replaced() {
        let env = TestEnv::new().await;
        let key = env.create_machine(stub::MACHINE_NAME, env.provider_config()).await;
        reconcile(&env.ctx, &key).await.unwrap();
        reconcile(&env.ctx, &key).await.unwrap();
        let first = env.provider_status(&key).await.instance_id.unwrap();

        env.cloud.set_instance_state(&first, InstanceStateName::Stopped);
        reconcile(&env.ctx, &key).await.unwrap();
        assert!(env.cloud.instance(&first).unwrap().is_terminated());
        assert_eq!(env.cloud.call_count("RunInstances"), 2);
        assert_ne!(env.provider_status(&key).await.instance_id.unwrap(), first);
    }

    #[tokio::test]
    async fn test_missing_cluster_id_is_not_retried() {
        let env = TestEnv::without_infrastructure();
        let key = env.create_machine(stub::MACHINE_NAME, env.provider_config()).await;
        let mut machine = env.machine(&key).await.unwrap();
        machine.metadata.labels.remove(CLUSTER_ID_LABEL);
        env.ctx.machines.patch(&machine).await.unwrap();
        reconcile(&env.ctx, &key).await.unwrap();

        let action = reconcile(&env.ctx, &key).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(env.recorder.count(REASON_FAILED_UPDATE), 1);
        assert!(env.cloud.calls().is_empty());
    }
}
