//! Per-region instance type catalog

use crate::error::{ReconcileError, Result};
use machina_cloud::{CloudClient, InstanceTypeInfo, TtlCache};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_INSTANCE_TYPES_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Amd64,
    Arm64,
}

impl Architecture {
    /// Maps the first supported architecture; unknown or absent is amd64.
    pub fn from_supported(supported: &[String]) -> Self {
        match supported.first().map(String::as_str) {
            Some("arm64") => Self::Arm64,
            _ => Self::Amd64,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceType {
    pub name: String,
    pub vcpu: i64,
    pub memory_mb: i64,
    /// Sum over all GPU devices.
    pub gpu: i64,
    pub cpu_architecture: Architecture,
}

impl From<&InstanceTypeInfo> for InstanceType {
    fn from(info: &InstanceTypeInfo) -> Self {
        Self {
            name: info.instance_type.clone(),
            vcpu: info.default_vcpus.unwrap_or_default(),
            memory_mb: info.memory_mib.unwrap_or_default(),
            gpu: info.gpu_counts.iter().sum(),
            cpu_architecture: Architecture::from_supported(&info.supported_architectures),
        }
    }
}

type Catalog = Arc<HashMap<String, InstanceType>>;

/// Instance types per region, refreshed once per TTL.
pub struct InstanceTypesCache {
    regions: TtlCache<String, Catalog>,
}

impl Default for InstanceTypesCache {
    fn default() -> Self {
        Self::new(DEFAULT_INSTANCE_TYPES_TTL)
    }
}

impl InstanceTypesCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            regions: TtlCache::new(ttl),
        }
    }

    pub async fn get_instance_type(
        &self,
        region: &str,
        instance_type: &str,
        client: &dyn CloudClient,
    ) -> Result<InstanceType> {
        let catalog = self
            .regions
            .get(&region.to_string(), || async move { fetch_catalog(region, client).await })
            .await?;

        catalog.get(instance_type).cloned().ok_or_else(|| {
            let mut known: Vec<&str> = catalog.keys().map(String::as_str).collect();
            known.sort_unstable();
            ReconcileError::invalid(format!(
                "instance type {} not found in region {}; known types: {}",
                instance_type,
                region,
                known.join(", ")
            ))
        })
    }
}

async fn fetch_catalog(region: &str, client: &dyn CloudClient) -> Result<Catalog> {
    tracing::debug!("Refreshing instance types for region {}", region);
    let mut catalog = HashMap::new();
    let mut next_token = None;
    loop {
        let page = client.describe_instance_types(next_token).await.map_err(|e| {
            ReconcileError::RetrievalFailed(format!("describing instance types in {}: {}", region, e))
        })?;
        for info in &page.instance_types {
            catalog.insert(info.instance_type.clone(), InstanceType::from(info));
        }
        match page.next_token {
            Some(token) if !token.is_empty() => next_token = Some(token),
            _ => break,
        }
    }

    if catalog.is_empty() {
        return Err(ReconcileError::RetrievalFailed(format!(
            "no instance types returned for region {}",
            region
        )));
    }
    tracing::info!("Cached {} instance types for region {}", catalog.len(), region);
    Ok(Arc::new(catalog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use machina_cloud::FakeCloud;

    fn info(name: &str, vcpus: i64, mem: i64, gpus: Vec<i64>, arch: &[&str]) -> InstanceTypeInfo {
        InstanceTypeInfo {
            instance_type: name.to_string(),
            default_vcpus: Some(vcpus),
            memory_mib: Some(mem),
            gpu_counts: gpus,
            supported_architectures: arch.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_architecture_mapping() {
        assert_eq!(Architecture::from_supported(&["x86_64".into()]), Architecture::Amd64);
        assert_eq!(Architecture::from_supported(&["arm64".into()]), Architecture::Arm64);
        assert_eq!(Architecture::from_supported(&["i386".into()]), Architecture::Amd64);
        assert_eq!(Architecture::from_supported(&[]), Architecture::Amd64);
    }

    #[tokio::test]
    async fn test_pages_and_caches() {
        let cloud = FakeCloud::new();
        cloud.add_instance_type_page(vec![info("a1.2xlarge", 8, 16384, vec![], &["x86_64"])]);
        cloud.add_instance_type_page(vec![info("p2.16xlarge", 64, 749568, vec![8, 8], &["x86_64"])]);
        let cache = InstanceTypesCache::default();

        let p2 = cache
            .get_instance_type("us-east-1", "p2.16xlarge", &cloud)
            .await
            .unwrap();
        assert_eq!(p2.vcpu, 64);
        assert_eq!(p2.memory_mb, 749568);
        assert_eq!(p2.gpu, 16);
        assert_eq!(p2.cpu_architecture, Architecture::Amd64);

        cache.get_instance_type("us-east-1", "a1.2xlarge", &cloud).await.unwrap();
        assert_eq!(cloud.call_count("DescribeInstanceTypes"), 2);
    }

    #[tokio::test]
    async fn test_unknown_type_lists_known() {
        let cloud = FakeCloud::new();
        cloud.add_instance_type_page(vec![info("m6g.4xlarge", 16, 65536, vec![], &["arm64"])]);
        let cache = InstanceTypesCache::default();

        let err = cache
            .get_instance_type("us-east-1", "nope.large", &cloud)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("m6g.4xlarge"));
    }

    #[tokio::test]
    async fn test_empty_listing_is_error() {
        let cloud = FakeCloud::new();
        let cache = InstanceTypesCache::default();
        let err = cache
            .get_instance_type("us-east-1", "m5.large", &cloud)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
