//! Per-cycle client construction

use crate::client::AwsCloudClient;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::config::{Credentials, Region};
use machina_cloud::{ClientBuilder, ClientOptions, CloudClient, Result, TtlCache};
use std::sync::Arc;
use std::time::Duration;

/// Default lifetime of the cached region listing.
pub const DEFAULT_REGIONS_TTL: Duration = Duration::from_secs(30 * 60);

const CREDENTIALS_PROVIDER_NAME: &str = "machina-credentials-secret";
const AMBIENT_CREDENTIALS_KEY: &str = "<ambient>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    pub name: String,
    /// `opt-in-not-required`, `opted-in` or `not-opted-in`.
    pub opt_in_status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionCheck {
    Available,
    NotOptedIn,
    Unknown,
}

/// Checks `region` against a region listing.
pub fn check_region(regions: &[RegionInfo], region: &str) -> RegionCheck {
    match regions.iter().find(|r| r.name == region) {
        None => RegionCheck::Unknown,
        Some(r) if r.opt_in_status.as_deref() == Some("not-opted-in") => RegionCheck::NotOptedIn,
        Some(_) => RegionCheck::Available,
    }
}

/// Builds [`AwsCloudClient`]s with credentials held in memory.
///
/// The region listing is cached per access key and only used to warn about
/// regions the account cannot reach; construction always proceeds.
pub struct AwsClientBuilder {
    regions: TtlCache<String, Arc<Vec<RegionInfo>>>,
}

impl Default for AwsClientBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_REGIONS_TTL)
    }
}

impl AwsClientBuilder {
    pub fn new(regions_ttl: Duration) -> Self {
        Self {
            regions: TtlCache::new(regions_ttl),
        }
    }

    async fn validate_region(&self, client: &AwsCloudClient, options: &ClientOptions) {
        let key = options
            .credentials
            .as_ref()
            .map(|c| c.access_key_id.clone())
            .unwrap_or_else(|| AMBIENT_CREDENTIALS_KEY.to_string());

        let regions = self
            .regions
            .get(&key, || async move { client.describe_regions().await.map(Arc::new) })
            .await;

        match regions {
            Ok(regions) => match check_region(&regions, &options.region) {
                RegionCheck::Available => {
                    tracing::debug!("Region {} is available", options.region);
                }
                RegionCheck::NotOptedIn => {
                    tracing::warn!(
                        "Region {} is not opted in for this account, proceeding anyway",
                        options.region
                    );
                }
                RegionCheck::Unknown => {
                    tracing::warn!(
                        "Region {} is not listed by DescribeRegions, proceeding anyway",
                        options.region
                    );
                }
            },
            Err(e) => {
                tracing::warn!("Failed to validate region {}: {}", options.region, e);
            }
        }
    }
}

#[async_trait]
impl ClientBuilder for AwsClientBuilder {
    async fn build(&self, options: ClientOptions) -> Result<Arc<dyn CloudClient>> {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(options.region.clone()));
        if let Some(creds) = &options.credentials {
            loader = loader.credentials_provider(Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                None,
                None,
                CREDENTIALS_PROVIDER_NAME,
            ));
        }
        let sdk_config = loader.load().await;
        let client = AwsCloudClient::new(&sdk_config, &options.endpoints);

        // custom endpoints point at partitions DescribeRegions may not know
        if options.endpoints.is_empty() {
            self.validate_region(&client, &options).await;
        }

        tracing::debug!("Built AWS client for region {}", options.region);
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions() -> Vec<RegionInfo> {
        vec![
            RegionInfo {
                name: "us-east-1".into(),
                opt_in_status: Some("opt-in-not-required".into()),
            },
            RegionInfo {
                name: "af-south-1".into(),
                opt_in_status: Some("not-opted-in".into()),
            },
            RegionInfo {
                name: "ap-east-1".into(),
                opt_in_status: Some("opted-in".into()),
            },
        ]
    }

    #[test]
    fn test_check_region() {
        assert_eq!(check_region(&regions(), "us-east-1"), RegionCheck::Available);
        assert_eq!(check_region(&regions(), "ap-east-1"), RegionCheck::Available);
        assert_eq!(check_region(&regions(), "af-south-1"), RegionCheck::NotOptedIn);
        assert_eq!(check_region(&regions(), "mars-north-1"), RegionCheck::Unknown);
    }

    #[test]
    fn test_default_ttl() {
        let builder = AwsClientBuilder::default();
        assert_eq!(builder.regions.ttl(), DEFAULT_REGIONS_TTL);
    }
}
