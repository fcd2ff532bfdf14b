//! Test harness: a [`Context`] wired to a [`FakeCloud`], in-memory stores and
//! a [`MemoryRecorder`].

use crate::api::{
    AwsMachineProviderConfig, AwsMachineProviderStatus, AwsPlacementGroup, AwsResourceReference,
    CLUSTER_ID_LABEL, Infrastructure, Machine, ManagedPlacementGroup, ManagementState, ObjectKey,
    PartitionSpec, PlacementGroupType,
};
use crate::context::Context;
use crate::events::MemoryRecorder;
use machina_cloud::fake::stub;
use machina_cloud::{FakeClientBuilder, FakeCloud};
use machina_config::ControllerConfig;
use std::sync::Arc;

pub const NAMESPACE: &str = "openshift-machine-api";

pub struct TestEnv {
    pub cloud: Arc<FakeCloud>,
    pub builder: Arc<FakeClientBuilder>,
    pub recorder: Arc<MemoryRecorder>,
    pub ctx: Context,
}

impl TestEnv {
    /// Default fake cloud plus an infrastructure object for [`stub::CLUSTER_ID`].
    pub async fn new() -> Self {
        let env = Self::without_infrastructure();
        let infra = Infrastructure::new(stub::CLUSTER_ID, stub::REGION);
        env.ctx
            .infrastructures
            .create(infra)
            .await
            .expect("seed infrastructure");
        env
    }

    pub fn without_infrastructure() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let cloud = Arc::new(FakeCloud::with_defaults());
        let builder = Arc::new(FakeClientBuilder::new(cloud.clone()));
        let recorder = Arc::new(MemoryRecorder::new());
        let ctx = Context::in_memory(builder.clone(), config).with_recorder(recorder.clone());
        Self {
            cloud,
            builder,
            recorder,
            ctx,
        }
    }

    /// A launchable config pointing at the fake cloud's stub resources.
    pub fn provider_config(&self) -> AwsMachineProviderConfig {
        let mut config = AwsMachineProviderConfig {
            ami: AwsResourceReference::by_id(stub::AMI_ID),
            instance_type: stub::INSTANCE_TYPE.into(),
            subnet: AwsResourceReference::by_id(stub::SUBNET_ID),
            security_groups: vec![AwsResourceReference::by_id(stub::SECURITY_GROUP_ID)],
            ..Default::default()
        };
        config.placement.region = stub::REGION.into();
        config
    }

    pub async fn create_machine(&self, name: &str, config: AwsMachineProviderConfig) -> ObjectKey {
        let mut machine = Machine::new(NAMESPACE, name);
        machine
            .metadata
            .labels
            .insert(CLUSTER_ID_LABEL.into(), stub::CLUSTER_ID.into());
        machine.spec.provider_spec.value =
            Some(serde_json::to_value(config).expect("encode provider config"));
        let created = self.ctx.machines.create(machine).await.expect("create machine");
        created.metadata.key()
    }

    pub async fn machine(&self, key: &ObjectKey) -> Option<Machine> {
        self.ctx.machines.get(key).await.expect("get machine")
    }

    pub async fn provider_status(&self, key: &ObjectKey) -> AwsMachineProviderStatus {
        self.machine(key)
            .await
            .and_then(|m| m.status.provider_status)
            .map(|v| serde_json::from_value(v).expect("decode provider status"))
            .unwrap_or_default()
    }

    pub async fn delete_machine(&self, key: &ObjectKey) {
        self.ctx.machines.delete(key).await.expect("delete machine");
    }

    pub async fn create_placement_group(
        &self,
        name: &str,
        group_type: PlacementGroupType,
        partition_count: Option<i32>,
    ) -> ObjectKey {
        let mut group = AwsPlacementGroup::new(NAMESPACE, name);
        group.spec.management_spec.management_state = ManagementState::Managed;
        group.spec.management_spec.managed = Some(ManagedPlacementGroup {
            group_type,
            partition: partition_count.map(|count| PartitionSpec { count: Some(count) }),
        });
        let created = self
            .ctx
            .placement_groups
            .create(group)
            .await
            .expect("create placement group");
        created.metadata.key()
    }

    pub async fn placement_group(&self, key: &ObjectKey) -> Option<AwsPlacementGroup> {
        self.ctx.placement_groups.get(key).await.expect("get placement group")
    }
}
