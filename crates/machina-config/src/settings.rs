//! Controller settings

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level controller configuration (YAML).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Concurrent reconciles an embedding runtime should allow.
    pub workers: usize,

    /// `tracing_subscriber::EnvFilter` directive.
    pub log: String,

    pub requeue: RequeueConfig,

    pub placement_group: PlacementGroupConfig,

    pub cache: CacheConfig,

    pub aws: AwsConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            log: "info".to_string(),
            requeue: RequeueConfig::default(),
            placement_group: PlacementGroupConfig::default(),
            cache: CacheConfig::default(),
            aws: AwsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequeueConfig {
    /// Delay after a launch and while the instance is not yet running.
    pub provisioning_delay_secs: u64,

    /// Delay while waiting for a terminate to be confirmed.
    pub deletion_delay_secs: u64,

    /// Delay when status names an instance the API cannot see yet.
    pub eventual_consistency_delay_secs: u64,

    /// How long a launched instance may stay invisible before it is
    /// considered lost and launched again.
    pub instance_visibility_timeout_secs: u64,
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            provisioning_delay_secs: 20,
            deletion_delay_secs: 5,
            eventual_consistency_delay_secs: 20,
            instance_visibility_timeout_secs: 300,
        }
    }
}

impl RequeueConfig {
    pub fn provisioning_delay(&self) -> Duration {
        Duration::from_secs(self.provisioning_delay_secs)
    }

    pub fn deletion_delay(&self) -> Duration {
        Duration::from_secs(self.deletion_delay_secs)
    }

    pub fn eventual_consistency_delay(&self) -> Duration {
        Duration::from_secs(self.eventual_consistency_delay_secs)
    }

    pub fn instance_visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.instance_visibility_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementGroupConfig {
    /// Lifetime of the observed configuration snapshot in status.
    pub observed_ttl_secs: u64,
}

impl Default for PlacementGroupConfig {
    fn default() -> Self {
        Self {
            observed_ttl_secs: 120,
        }
    }
}

impl PlacementGroupConfig {
    pub fn observed_ttl(&self) -> Duration {
        Duration::from_secs(self.observed_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub instance_types_ttl_secs: u64,
    pub regions_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            instance_types_ttl_secs: 24 * 60 * 60,
            regions_ttl_secs: 30 * 60,
        }
    }
}

impl CacheConfig {
    pub fn instance_types_ttl(&self) -> Duration {
        Duration::from_secs(self.instance_types_ttl_secs)
    }

    pub fn regions_ttl(&self) -> Duration {
        Duration::from_secs(self.regions_ttl_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Service name (`ec2`, `elasticloadbalancing`) to endpoint URL.
    pub endpoints: BTreeMap<String, String>,
}

impl ControllerConfig {
    /// Loads the discovered config file (or defaults) and applies env overrides.
    pub fn load() -> Result<Self> {
        let config = match crate::find_config_file()? {
            Some(path) => Self::from_file(&path)?,
            None => {
                tracing::debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `MACHINA_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_u64("MACHINA_PROVISIONING_DELAY_SECS")? {
            self.requeue.provisioning_delay_secs = v;
        }
        if let Some(v) = env_u64("MACHINA_INSTANCE_TYPES_TTL_SECS")? {
            self.cache.instance_types_ttl_secs = v;
        }
        if let Some(v) = env_u64("MACHINA_WORKERS")? {
            self.workers = v as usize;
        }
        if let Ok(log) = std::env::var("MACHINA_LOG") {
            self.log = log;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(invalid("workers", "must be at least 1"));
        }
        if self.placement_group.observed_ttl_secs == 0 {
            return Err(invalid("placement_group.observed_ttl_secs", "must be positive"));
        }
        if self.cache.instance_types_ttl_secs == 0 || self.cache.regions_ttl_secs == 0 {
            return Err(invalid("cache", "TTLs must be positive"));
        }
        for (service, url) in &self.aws.endpoints {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(invalid(
                    &format!("aws.endpoints.{}", service),
                    "must be an http(s) URL",
                ));
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, &format!("'{}' is not a non-negative integer", value))),
        Err(_) => Ok(None),
    }
}
