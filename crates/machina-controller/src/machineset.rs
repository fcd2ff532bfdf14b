//! MachineSet autoscaling hints
//!
//! Copies the capacity of the template's instance type onto the MachineSet
//! as annotations, so the cluster autoscaler can scale the set up from zero.

use crate::action::Action;
use crate::api::{
    ARCH_LABEL, AwsMachineProviderConfig, CPU_ANNOTATION, GPU_ANNOTATION, GPU_TYPE_ANNOTATION,
    GPU_TYPE_NVIDIA, LABELS_ANNOTATION, MEMORY_ANNOTATION, MachineSet, ObjectKey,
};
use crate::context::Context;
use crate::error::{ReconcileError, Result};
use crate::events::{ObjectReference, REASON_FAILED_UPDATE, REASON_RECONCILE_ERROR};
use std::collections::BTreeMap;

pub const UNKNOWN_INSTANCE_TYPE_MESSAGE: &str =
    "Failed to set autoscaling from zero annotations, instance type unknown";

/// Reconciles one MachineSet.
pub async fn reconcile(ctx: &Context, key: &ObjectKey) -> Result<Action> {
    let Some(mut machine_set) = ctx.machine_sets.get(key).await? else {
        return Ok(Action::await_change());
    };
    if machine_set.metadata.is_deleting() {
        return Ok(Action::await_change());
    }
    let object = ObjectReference::of(&machine_set);

    let original = machine_set.metadata.annotations.clone();
    let outcome = set_annotations(ctx, &mut machine_set, &object).await;

    if machine_set.metadata.annotations != original {
        ctx.machine_sets.patch(&machine_set).await?;
    }

    match outcome {
        Ok(()) => Ok(Action::await_change()),
        Err(err) => {
            tracing::warn!("{}: failed to reconcile MachineSet: {}", key, err);
            ctx.recorder.warning(&object, REASON_RECONCILE_ERROR, &err.to_string());
            if err.is_retryable() { Err(err) } else { Ok(Action::await_change()) }
        }
    }
}

async fn set_annotations(ctx: &Context, machine_set: &mut MachineSet, object: &ObjectReference) -> Result<()> {
    let name = machine_set.metadata.name.clone();
    tracing::debug!("{}: reconciling MachineSet", name);

    let config: AwsMachineProviderConfig = match &machine_set.spec.template.spec.provider_spec.value {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| ReconcileError::invalid(format!("failed to decode provider spec: {}", e)))?,
        None => return Err(ReconcileError::invalid("MachineSet template has no provider spec")),
    };

    let region = if config.placement.region.is_empty() {
        ctx.infrastructure().await?.status.region
    } else {
        config.placement.region.clone()
    };

    let credentials = config.credentials_secret.as_ref().map(|s| s.name.as_str());
    let client = ctx
        .cloud_client(&machine_set.metadata.namespace, &region, credentials)
        .await?;

    let instance_type = match ctx
        .instance_types
        .get_instance_type(&region, &config.instance_type, client.as_ref())
        .await
    {
        Ok(instance_type) => instance_type,
        Err(err) => {
            tracing::error!(
                "{}: unable to set scale from zero annotations, unknown instance type {}: {}",
                name,
                config.instance_type,
                err
            );
            tracing::error!(
                "{}: autoscaling from zero will not work; set {}, {} and {} manually",
                name,
                CPU_ANNOTATION,
                MEMORY_ANNOTATION,
                GPU_ANNOTATION
            );
            ctx.recorder
                .warning(object, REASON_FAILED_UPDATE, UNKNOWN_INSTANCE_TYPE_MESSAGE);
            return Ok(());
        }
    };

    let annotations = &mut machine_set.metadata.annotations;
    annotations.insert(CPU_ANNOTATION.into(), instance_type.vcpu.to_string());
    annotations.insert(MEMORY_ANNOTATION.into(), instance_type.memory_mb.to_string());
    annotations.insert(GPU_ANNOTATION.into(), instance_type.gpu.to_string());
    if instance_type.gpu > 0 {
        annotations.insert(GPU_TYPE_ANNOTATION.into(), GPU_TYPE_NVIDIA.into());
    }

    let arch = format!("{}={}", ARCH_LABEL, instance_type.cpu_architecture);
    let labels = merge_labels(
        &arch,
        annotations.get(LABELS_ANNOTATION).map(String::as_str).unwrap_or_default(),
    );
    annotations.insert(LABELS_ANNOTATION.into(), labels);
    Ok(())
}

/// Merges comma-separated `key=value` lists. Entries in `existing` win on key
/// collision; malformed entries are dropped and the result is sorted by key.
pub fn merge_labels(new: &str, existing: &str) -> String {
    let mut merged = BTreeMap::new();
    for list in [new, existing] {
        for pair in list.split(',') {
            if let Some((key, value)) = pair.trim().split_once('=')
                && !key.trim().is_empty()
            {
                merged.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }
    merged
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
