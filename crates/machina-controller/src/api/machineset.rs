//! MachineSet resource

use super::machine::MachineSpec;
use super::meta::ObjectMeta;
use serde::{Deserialize, Serialize};

pub const CPU_ANNOTATION: &str = "machine.openshift.io/vCPU";
pub const MEMORY_ANNOTATION: &str = "machine.openshift.io/memoryMb";
pub const GPU_ANNOTATION: &str = "machine.openshift.io/GPU";
/// Set only when the instance type has GPUs. NVIDIA is the only type reported.
pub const GPU_TYPE_ANNOTATION: &str = "capacity.cluster-autoscaler.kubernetes.io/gpu-type";
pub const GPU_TYPE_NVIDIA: &str = "nvidia.com/gpu";
/// Comma-separated `key=value` node labels the autoscaler assumes for new nodes.
pub const LABELS_ANNOTATION: &str = "capacity.cluster-autoscaler.kubernetes.io/labels";

pub const ARCH_LABEL: &str = "kubernetes.io/arch";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MachineSet {
    pub metadata: ObjectMeta,
    pub spec: MachineSetSpec,
}

impl MachineSet {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MachineSetSpec {
    pub replicas: Option<i32>,
    pub template: MachineTemplateSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineTemplateSpec {
    pub spec: MachineSpec,
}
