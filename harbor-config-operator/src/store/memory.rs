//! In-memory object store for tests and `--dev` mode.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::error::{Result, StoreError};
use super::{ObjectStore, should_collect};
use crate::resource::{HarborConfiguration, HarborConfigurationStatus, ObjectKey, ObjectMeta};

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<ObjectKey, HarborConfiguration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the declared spec of an object.
    ///
    /// Finalizers, deletion marker and status of an existing object are kept;
    /// the generation moves when the spec changed.
    pub async fn apply(&self, obj: HarborConfiguration) {
        let key = obj.key();
        let mut objects = self.objects.write().await;
        match objects.get_mut(&key) {
            Some(existing) => {
                if existing.spec != obj.spec {
                    existing.spec = obj.spec;
                    existing.metadata.generation =
                        Some(existing.metadata.generation.unwrap_or(0) + 1);
                }
            }
            None => {
                let mut obj = obj;
                obj.metadata.generation.get_or_insert(1);
                objects.insert(key, obj);
            }
        }
    }

    /// Mark an object for deletion. Objects without finalizers go away at once.
    pub async fn request_deletion(&self, key: &ObjectKey) -> Result<()> {
        let mut objects = self.objects.write().await;
        let obj = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        obj.metadata.deletion_timestamp.get_or_insert_with(Utc::now);
        if should_collect(obj) {
            objects.remove(key);
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self) -> Result<Vec<HarborConfiguration>> {
        Ok(self.objects.read().await.values().cloned().collect())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<HarborConfiguration>> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn update_metadata(&self, key: &ObjectKey, metadata: &ObjectMeta) -> Result<()> {
        let mut objects = self.objects.write().await;
        let obj = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        obj.metadata.finalizers = metadata.finalizers.clone();
        if should_collect(obj) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        status: &HarborConfigurationStatus,
    ) -> Result<()> {
        let mut objects = self.objects.write().await;
        let obj = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        obj.status = status.clone();
        Ok(())
    }
}
