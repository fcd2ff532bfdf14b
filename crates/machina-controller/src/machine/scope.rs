//! Per-cycle machine context
//!
//! A scope is built once per reconcile cycle. It decodes the provider config
//! and status, picks the cluster ID, builds the cloud client, and collects
//! every change to the machine until [`MachineScope::patch`] writes them back.

use crate::api::{
    AwsMachineProviderConfig, AwsMachineProviderStatus, CLUSTER_ID_LABEL, Condition, ConditionStatus,
    INFRASTRUCTURE_NAME, Machine, MachinePhase, ObjectKey, ResourceTag, find_condition, set_condition,
};
use crate::context::Context;
use crate::error::{ReconcileError, Result};
use crate::events::ObjectReference;
use crate::store::StoreError;
use crate::tags;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use machina_cloud::{CloudClient, Tag};
use machina_config::ControllerConfig;
use std::sync::Arc;
use std::time::Duration;

/// Secret key holding the instance user data.
pub const USER_DATA_KEY: &str = "userData";

/// Condition reporting whether the instance was launched.
pub const INSTANCE_CREATED_CONDITION: &str = "InstanceCreated";

pub struct MachineScope<'a> {
    ctx: &'a Context,
    pub machine: Machine,
    original: Machine,
    pub provider_config: AwsMachineProviderConfig,
    pub provider_status: AwsMachineProviderStatus,
    pub client: Arc<dyn CloudClient>,
    pub cluster_id: String,
    pub region: String,
    infra_tags: Vec<ResourceTag>,
    removed: bool,
}

impl<'a> MachineScope<'a> {
    pub async fn new(ctx: &'a Context, machine: Machine) -> Result<Self> {
        let provider_config: AwsMachineProviderConfig = match &machine.spec.provider_spec.value {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                ReconcileError::invalid(format!("failed to decode provider spec: {}", e))
            })?,
            None => return Err(ReconcileError::invalid("machine has no provider spec")),
        };
        let provider_status: AwsMachineProviderStatus = match &machine.status.provider_status {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                ReconcileError::invalid(format!("failed to decode provider status: {}", e))
            })?,
            None => AwsMachineProviderStatus::default(),
        };

        let infra = ctx
            .infrastructures
            .get(&ObjectKey::new("", INFRASTRUCTURE_NAME))
            .await?;
        let cluster_id = match machine.metadata.labels.get(CLUSTER_ID_LABEL) {
            Some(id) if !id.is_empty() => id.clone(),
            _ => infra
                .as_ref()
                .map(|i| i.status.infrastructure_name.clone())
                .filter(|n| !n.is_empty())
                .ok_or_else(|| {
                    ReconcileError::invalid(format!(
                        "machine is missing the {} label and no infrastructure name is set",
                        CLUSTER_ID_LABEL
                    ))
                })?,
        };

        let region = if provider_config.placement.region.is_empty() {
            infra.as_ref().map(|i| i.status.region.clone()).unwrap_or_default()
        } else {
            provider_config.placement.region.clone()
        };
        if region.is_empty() {
            return Err(ReconcileError::invalid("no region set in placement or infrastructure"));
        }

        let credentials = provider_config.credentials_secret.as_ref().map(|s| s.name.as_str());
        let client = ctx
            .cloud_client(&machine.metadata.namespace, &region, credentials)
            .await?;

        Ok(Self {
            ctx,
            original: machine.clone(),
            machine,
            provider_config,
            provider_status,
            client,
            cluster_id,
            region,
            infra_tags: infra.as_ref().map(tags::infrastructure_tags).unwrap_or_default(),
            removed: false,
        })
    }

    pub fn name(&self) -> &str {
        self.machine.name()
    }

    pub fn namespace(&self) -> &str {
        &self.machine.metadata.namespace
    }

    pub fn ctx_config(&self) -> &'a ControllerConfig {
        &self.ctx.config
    }

    pub fn event_normal(&self, reason: &str, message: &str) {
        self.ctx
            .recorder
            .normal(&ObjectReference::of(&self.machine), reason, message);
    }

    /// The full tag list for the machine's cloud resources.
    pub fn tags(&self) -> Vec<Tag> {
        let merged = tags::merge_infrastructure_tags(&self.provider_config.tags, &self.infra_tags);
        tags::build_tag_list(self.name(), &self.cluster_id, &merged)
    }

    /// Base64 user data from the configured secret, if any.
    pub async fn user_data(&self) -> Result<Option<String>> {
        let Some(reference) = &self.provider_config.user_data_secret else {
            return Ok(None);
        };
        let secret = self
            .ctx
            .secrets
            .get(&ObjectKey::new(self.namespace(), &reference.name))
            .await?
            .ok_or_else(|| {
                ReconcileError::RetrievalFailed(format!(
                    "user data secret {}/{} not found",
                    self.namespace(),
                    reference.name
                ))
            })?;
        let data = secret.get(USER_DATA_KEY).ok_or_else(|| {
            ReconcileError::RetrievalFailed(format!(
                "user data secret {}/{} has no {} key",
                self.namespace(),
                reference.name,
                USER_DATA_KEY
            ))
        })?;
        Ok(Some(STANDARD.encode(data)))
    }

    pub fn phase(&self) -> Option<MachinePhase> {
        self.machine.status.phase
    }

    /// A machine counts as provisioned once it reported a provider ID or
    /// addresses, whatever its phase says.
    pub fn is_provisioned(&self) -> bool {
        self.phase() == Some(MachinePhase::Provisioned)
            || self.machine.spec.provider_id.as_deref().is_some_and(|id| !id.is_empty())
            || !self.machine.status.addresses.is_empty()
    }

    pub fn set_phase(&mut self, phase: MachinePhase) {
        self.machine.status.phase = Some(phase);
    }

    pub fn set_error(&mut self, reason: &str, message: impl Into<String>) {
        self.machine.status.error_reason = Some(reason.to_string());
        self.machine.status.error_message = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.machine.status.error_reason = None;
        self.machine.status.error_message = None;
    }

    pub fn set_instance_created(&mut self, status: ConditionStatus, reason: &str, message: impl Into<String>) {
        set_condition(
            &mut self.provider_status.conditions,
            Condition::new(INSTANCE_CREATED_CONDITION, status, reason, message),
        );
    }

    /// Whether the last successful launch happened less than `window` ago.
    pub fn launched_within(&self, window: Duration) -> bool {
        let Some(created) = find_condition(&self.provider_status.conditions, INSTANCE_CREATED_CONDITION)
            .filter(|c| c.status == ConditionStatus::True)
            .and_then(|c| c.last_transition_time)
        else {
            return false;
        };
        let elapsed = Utc::now().signed_duration_since(created);
        elapsed.to_std().map_or(true, |elapsed| elapsed < window)
    }

    pub fn remove_finalizer(&mut self, finalizer: &str) {
        self.machine.metadata.remove_finalizer(finalizer);
    }

    /// Writes the accumulated changes: metadata and spec first, then status.
    /// Nothing is written when nothing changed.
    pub async fn patch(&mut self) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        let encoded = serde_json::to_value(&self.provider_status).map_err(StoreError::from)?;
        self.machine.status.provider_status = Some(encoded);

        let status_changed = self.machine.status != self.original.status;
        let object_changed =
            self.machine.metadata != self.original.metadata || self.machine.spec != self.original.spec;

        if object_changed {
            match self.ctx.machines.patch(&self.machine).await? {
                Some(updated) => {
                    self.machine.metadata.resource_version = updated.metadata.resource_version;
                }
                None => {
                    tracing::info!("{}: removed", self.name());
                    self.removed = true;
                    return Ok(());
                }
            }
        }
        if status_changed {
            self.machine.status.last_updated = Some(Utc::now());
            let updated = self.ctx.machines.patch_status(&self.machine).await?;
            self.machine.metadata.resource_version = updated.metadata.resource_version;
        }
        self.original = self.machine.clone();
        Ok(())
    }
}
