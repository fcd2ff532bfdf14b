//! Cluster-scoped infrastructure singleton and secrets

use super::meta::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the infrastructure singleton.
pub const INFRASTRUCTURE_NAME: &str = "cluster";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTag {
    pub key: String,
    pub value: String,
}

impl ResourceTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Infrastructure {
    pub metadata: ObjectMeta,
    pub spec: InfrastructureSpec,
    pub status: InfrastructureStatus,
}

impl Infrastructure {
    pub fn new(infrastructure_name: &str, region: &str) -> Self {
        Self {
            metadata: ObjectMeta::new("", INFRASTRUCTURE_NAME),
            spec: InfrastructureSpec::default(),
            status: InfrastructureStatus {
                infrastructure_name: infrastructure_name.to_string(),
                region: region.to_string(),
                resource_tags: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InfrastructureSpec {
    /// User edits; entries win over status entries with the same key.
    pub resource_tags: Vec<ResourceTag>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InfrastructureStatus {
    /// Cluster ID used in ownership tags.
    pub infrastructure_name: String,
    pub region: String,
    pub resource_tags: Vec<ResourceTag>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Secret {
    pub metadata: ObjectMeta,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }
}
