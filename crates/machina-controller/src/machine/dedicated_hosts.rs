//! Dedicated host allocation
//!
//! A machine whose placement asks for `Dynamic` allocation gets a host of its
//! own right before launch. The host ID is recorded in the provider status and
//! the host is released once the instance is gone.

use crate::api::{
    ALLOCATION_STRATEGY_DYNAMIC, ALLOCATION_STRATEGY_USER_PROVIDED, AwsMachineProviderConfig,
    AwsMachineProviderStatus, DedicatedHost, DedicatedHostStatus, Placement,
};
use crate::error::{ReconcileError, Result};
use machina_cloud::{AllocateHostsRequest, CloudClient, Instance, Tag};
use std::collections::BTreeMap;

fn dedicated_host(placement: &Placement) -> Option<&DedicatedHost> {
    placement.host.as_ref()?.dedicated_host.as_ref()
}

/// True only when the policy explicitly asks for dynamic allocation.
pub fn should_allocate(placement: &Placement) -> bool {
    dedicated_host(placement)
        .and_then(|h| h.allocation_strategy.as_deref())
        .is_some_and(|s| s == ALLOCATION_STRATEGY_DYNAMIC)
}

/// The host ID to launch on when the strategy is user-provided (the default).
pub fn user_provided_id(placement: &Placement) -> Option<&str> {
    let host = dedicated_host(placement)?;
    match host.allocation_strategy.as_deref() {
        None | Some(ALLOCATION_STRATEGY_USER_PROVIDED) if !host.id.is_empty() => Some(&host.id),
        _ => None,
    }
}

/// Tags for a dynamically allocated host.
pub fn dynamic_tags(placement: &Placement) -> Option<&BTreeMap<String, String>> {
    dedicated_host(placement)?
        .dynamic_host_allocation
        .as_ref()
        .map(|d| &d.tags)
}

/// The host an instance runs on, if the config asked for dynamic allocation.
pub fn dynamically_allocated_id<'a>(
    instance: &'a Instance,
    config: &AwsMachineProviderConfig,
) -> Option<&'a str> {
    if !should_allocate(&config.placement) {
        return None;
    }
    instance.host_id.as_deref().filter(|id| !id.is_empty())
}

pub fn allocated_id(status: &AwsMachineProviderStatus) -> Option<&str> {
    status
        .dedicated_host
        .as_ref()
        .map(|h| h.id.as_str())
        .filter(|id| !id.is_empty())
}

pub fn set_allocated_id(status: &mut AwsMachineProviderStatus, host_id: &str) {
    status.dedicated_host = Some(DedicatedHostStatus {
        id: host_id.to_string(),
    });
}

pub fn clear_allocated_id(status: &mut AwsMachineProviderStatus) {
    status.dedicated_host = None;
}

/// Allocates one host with auto-placement off.
pub async fn allocate(
    client: &dyn CloudClient,
    instance_type: &str,
    availability_zone: &str,
    tags: Option<&BTreeMap<String, String>>,
    machine_name: &str,
) -> Result<String> {
    tracing::info!(
        "{}: allocating dedicated host for {} in {}",
        machine_name,
        instance_type,
        availability_zone
    );
    let request = AllocateHostsRequest {
        instance_type: instance_type.to_string(),
        availability_zone: availability_zone.to_string(),
        quantity: 1,
        auto_placement: false,
        tags: tags
            .into_iter()
            .flatten()
            .map(|(k, v)| Tag::new(k, v))
            .collect(),
    };

    let host_ids = client.allocate_hosts(request).await.map_err(|e| {
        ReconcileError::from_cloud(e, ReconcileError::CreateFailed, "failed to allocate dedicated host")
    })?;
    let host_id = host_ids
        .into_iter()
        .next()
        .ok_or_else(|| ReconcileError::CreateFailed("no host IDs returned from AllocateHosts".into()))?;

    tracing::info!("{}: allocated dedicated host {}", machine_name, host_id);
    Ok(host_id)
}

/// Releases a host. A per-host failure in the response is an error.
pub async fn release(client: &dyn CloudClient, host_id: &str, machine_name: &str) -> Result<()> {
    tracing::info!("{}: releasing dedicated host {}", machine_name, host_id);
    let output = client
        .release_hosts(&[host_id.to_string()])
        .await
        .map_err(|e| ReconcileError::DeleteFailed(format!("failed to release dedicated host {}: {}", host_id, e)))?;

    if let Some(failure) = output.unsuccessful.first() {
        let message = failure.message.as_deref().unwrap_or("unknown error");
        return Err(ReconcileError::DeleteFailed(format!(
            "failed to release dedicated host {}: {}",
            host_id, message
        )));
    }
    tracing::info!("{}: released dedicated host {}", machine_name, host_id);
    Ok(())
}
