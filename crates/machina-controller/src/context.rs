//! Shared dependencies handed to every reconciler

use crate::api::{AwsPlacementGroup, Infrastructure, Machine, MachineSet, ObjectKey, Secret, INFRASTRUCTURE_NAME};
use crate::error::{ReconcileError, Result};
use crate::events::{EventRecorder, TracingRecorder};
use crate::instance_types::InstanceTypesCache;
use crate::store::{MemoryStore, Store};
use machina_cloud::{ClientBuilder, ClientOptions, CloudClient, StaticCredentials};
use machina_config::ControllerConfig;
use std::sync::Arc;

/// Secret keys holding static credentials.
pub const ACCESS_KEY_ID_KEY: &str = "aws_access_key_id";
pub const SECRET_ACCESS_KEY_KEY: &str = "aws_secret_access_key";

/// Stores, event sink, client construction and process-wide caches.
///
/// Nothing here is mutated per reconcile, so one context is shared by all
/// workers.
#[derive(Clone)]
pub struct Context {
    pub machines: Arc<dyn Store<Machine>>,
    pub placement_groups: Arc<dyn Store<AwsPlacementGroup>>,
    pub machine_sets: Arc<dyn Store<MachineSet>>,
    pub secrets: Arc<dyn Store<Secret>>,
    pub infrastructures: Arc<dyn Store<Infrastructure>>,
    pub recorder: Arc<dyn EventRecorder>,
    pub client_builder: Arc<dyn ClientBuilder>,
    pub instance_types: Arc<InstanceTypesCache>,
    pub config: ControllerConfig,
}

impl Context {
    /// A context backed by in-memory stores and a logging event recorder.
    pub fn in_memory(client_builder: Arc<dyn ClientBuilder>, config: ControllerConfig) -> Self {
        let instance_types = Arc::new(InstanceTypesCache::new(config.cache.instance_types_ttl()));
        Self {
            machines: Arc::new(MemoryStore::new()),
            placement_groups: Arc::new(MemoryStore::new()),
            machine_sets: Arc::new(MemoryStore::new()),
            secrets: Arc::new(MemoryStore::new()),
            infrastructures: Arc::new(MemoryStore::new()),
            recorder: Arc::new(TracingRecorder),
            client_builder,
            instance_types,
            config,
        }
    }

    /// A context that talks to AWS through the SDK adapter.
    #[cfg(feature = "aws-cloud")]
    pub fn aws(config: ControllerConfig) -> Self {
        let builder = machina_cloud_aws::AwsClientBuilder::new(config.cache.regions_ttl());
        Self::in_memory(Arc::new(builder), config)
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Fetches the infrastructure singleton.
    pub async fn infrastructure(&self) -> Result<Infrastructure> {
        self.infrastructures
            .get(&ObjectKey::new("", INFRASTRUCTURE_NAME))
            .await?
            .ok_or_else(|| {
                ReconcileError::RetrievalFailed(format!(
                    "infrastructure object {} not found",
                    INFRASTRUCTURE_NAME
                ))
            })
    }

    /// Reads static credentials from a secret in `namespace`.
    pub async fn credentials(&self, namespace: &str, secret_name: &str) -> Result<StaticCredentials> {
        let secret = self
            .secrets
            .get(&ObjectKey::new(namespace, secret_name))
            .await?
            .ok_or_else(|| {
                ReconcileError::RetrievalFailed(format!(
                    "credentials secret {}/{} not found",
                    namespace, secret_name
                ))
            })?;

        let field = |key: &str| -> Result<String> {
            let raw = secret.get(key).ok_or_else(|| {
                ReconcileError::RetrievalFailed(format!(
                    "credentials secret {}/{} has no {} key",
                    namespace, secret_name, key
                ))
            })?;
            String::from_utf8(raw.to_vec()).map_err(|_| {
                ReconcileError::invalid(format!(
                    "credentials secret {}/{} key {} is not UTF-8",
                    namespace, secret_name, key
                ))
            })
        };

        Ok(StaticCredentials {
            access_key_id: field(ACCESS_KEY_ID_KEY)?.trim().to_string(),
            secret_access_key: field(SECRET_ACCESS_KEY_KEY)?.trim().to_string(),
        })
    }

    /// Builds a cloud client for `region`, using the named credentials secret
    /// when given and the ambient chain otherwise.
    pub async fn cloud_client(
        &self,
        namespace: &str,
        region: &str,
        credentials_secret: Option<&str>,
    ) -> Result<Arc<dyn CloudClient>> {
        let credentials = match credentials_secret {
            Some(name) if !name.is_empty() => Some(self.credentials(namespace, name).await?),
            _ => None,
        };
        let options = ClientOptions {
            region: region.to_string(),
            credentials,
            endpoints: self.config.aws.endpoints.clone(),
        };
        self.client_builder
            .build(options)
            .await
            .map_err(|e| ReconcileError::RetrievalFailed(format!("creating cloud client: {}", e)))
    }
}
