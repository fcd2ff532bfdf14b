//! Declarative resource store
//!
//! The controllers read and write resources through [`Store`]. Writes carry the
//! `resource_version` they were based on; a stale version is rejected with
//! [`StoreError::Conflict`] and the caller must re-fetch.

use crate::api::{
    AwsPlacementGroup, AwsPlacementGroupStatus, Infrastructure, InfrastructureStatus, Machine,
    MachineSet, MachineSetSpec, MachineStatus, ObjectKey, ObjectMeta, Secret,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    #[error("{kind} {key} was modified concurrently (have version {have}, stored {stored})")]
    Conflict {
        kind: &'static str,
        key: ObjectKey,
        have: u64,
        stored: u64,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A stored resource kind.
pub trait Resource: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;

    type Status: Clone + Send + Sync;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn status(&self) -> &Self::Status;

    fn status_mut(&mut self) -> &mut Self::Status;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

macro_rules! impl_resource {
    ($ty:ty, $kind:literal, $status:ty) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;

            type Status = $status;

            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }

            fn status(&self) -> &Self::Status {
                &self.status
            }

            fn status_mut(&mut self) -> &mut Self::Status {
                &mut self.status
            }
        }
    };
}

impl_resource!(Machine, "Machine", MachineStatus);
impl_resource!(AwsPlacementGroup, "AWSPlacementGroup", AwsPlacementGroupStatus);
impl_resource!(Infrastructure, "Infrastructure", InfrastructureStatus);

// Kinds without a status subresource use their spec as the "status" slot and
// never call `patch_status`.
impl Resource for MachineSet {
    const KIND: &'static str = "MachineSet";

    type Status = MachineSetSpec;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn status(&self) -> &Self::Status {
        &self.spec
    }

    fn status_mut(&mut self) -> &mut Self::Status {
        &mut self.spec
    }
}

impl Resource for Secret {
    const KIND: &'static str = "Secret";

    type Status = BTreeMap<String, Vec<u8>>;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn status(&self) -> &Self::Status {
        &self.data
    }

    fn status_mut(&mut self) -> &mut Self::Status {
        &mut self.data
    }
}

#[async_trait]
pub trait Store<R: Resource>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<R>>;

    /// Objects in `namespace` (all namespaces when `None`) carrying every selector label.
    async fn list(&self, namespace: Option<&str>, selector: &BTreeMap<String, String>) -> Result<Vec<R>>;

    async fn create(&self, object: R) -> Result<R>;

    /// Writes metadata and spec; the stored status is kept.
    ///
    /// Removing the last finalizer from an object marked for deletion removes
    /// the object, in which case `Ok(None)` is returned.
    async fn patch(&self, object: &R) -> Result<Option<R>>;

    /// Writes the status only.
    async fn patch_status(&self, object: &R) -> Result<R>;

    /// Marks the object for deletion while finalizers remain; removes it otherwise.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}

/// In-memory [`Store`]. Objects are held in their serialized form so that every
/// read hands out an independent copy.
pub struct MemoryStore<R: Resource> {
    objects: RwLock<BTreeMap<ObjectKey, serde_json::Value>>,
    _kind: std::marker::PhantomData<fn() -> R>,
}

impl<R: Resource> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            _kind: std::marker::PhantomData,
        }
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn decode(value: &serde_json::Value) -> Result<R> {
        Ok(serde_json::from_value(value.clone())?)
    }

    fn check_version(object: &R, stored: &R) -> Result<()> {
        let have = object.meta().resource_version;
        let current = stored.meta().resource_version;
        if have != current {
            return Err(StoreError::Conflict {
                kind: R::KIND,
                key: object.key(),
                have,
                stored: current,
            });
        }
        Ok(())
    }

    fn not_found(key: ObjectKey) -> StoreError {
        StoreError::NotFound { kind: R::KIND, key }
    }
}

#[async_trait]
impl<R: Resource> Store<R> for MemoryStore<R> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<R>> {
        let objects = self.objects.read().await;
        objects.get(key).map(Self::decode).transpose()
    }

    async fn list(&self, namespace: Option<&str>, selector: &BTreeMap<String, String>) -> Result<Vec<R>> {
        let objects = self.objects.read().await;
        let mut items = Vec::new();
        for (key, value) in objects.iter() {
            if namespace.is_some_and(|ns| ns != key.namespace) {
                continue;
            }
            let object = Self::decode(value)?;
            let labels = &object.meta().labels;
            if selector.iter().all(|(k, v)| labels.get(k) == Some(v)) {
                items.push(object);
            }
        }
        Ok(items)
    }

    async fn create(&self, mut object: R) -> Result<R> {
        let key = object.key();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind: R::KIND, key });
        }
        let meta = object.meta_mut();
        meta.resource_version = 1;
        meta.creation_timestamp.get_or_insert_with(Utc::now);
        objects.insert(key, serde_json::to_value(&object)?);
        Ok(object)
    }

    async fn patch(&self, object: &R) -> Result<Option<R>> {
        let key = object.key();
        let mut objects = self.objects.write().await;
        let stored = objects
            .get(&key)
            .map(Self::decode)
            .transpose()?
            .ok_or_else(|| Self::not_found(key.clone()))?;
        Self::check_version(object, &stored)?;

        let mut next = object.clone();
        *next.status_mut() = stored.status().clone();
        let meta = next.meta_mut();
        meta.deletion_timestamp = stored.meta().deletion_timestamp;
        meta.creation_timestamp = stored.meta().creation_timestamp;
        meta.resource_version = stored.meta().resource_version + 1;

        if meta.deletion_timestamp.is_some() && meta.finalizers.is_empty() {
            objects.remove(&key);
            tracing::debug!("{} {} removed after its last finalizer", R::KIND, key);
            return Ok(None);
        }
        objects.insert(key, serde_json::to_value(&next)?);
        Ok(Some(next))
    }

    async fn patch_status(&self, object: &R) -> Result<R> {
        let key = object.key();
        let mut objects = self.objects.write().await;
        let stored = objects
            .get(&key)
            .map(Self::decode)
            .transpose()?
            .ok_or_else(|| Self::not_found(key.clone()))?;
        Self::check_version(object, &stored)?;

        let mut next = stored;
        *next.status_mut() = object.status().clone();
        next.meta_mut().resource_version += 1;
        objects.insert(key, serde_json::to_value(&next)?);
        Ok(next)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut objects = self.objects.write().await;
        let mut stored = objects
            .get(key)
            .map(Self::decode)
            .transpose()?
            .ok_or_else(|| Self::not_found(key.clone()))?;

        if stored.meta().finalizers.is_empty() {
            objects.remove(key);
            return Ok(());
        }
        let meta = stored.meta_mut();
        if meta.deletion_timestamp.is_none() {
            meta.deletion_timestamp = Some(Utc::now());
            meta.resource_version += 1;
        }
        objects.insert(key.clone(), serde_json::to_value(&stored)?);
        Ok(())
    }
}
