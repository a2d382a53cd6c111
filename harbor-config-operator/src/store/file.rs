//! Directory-backed object store: one JSON document per declared object.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{Result, StoreError};
use super::{ObjectStore, should_collect};
use crate::resource::{HarborConfiguration, HarborConfigurationStatus, ObjectKey, ObjectMeta};

/// Object store over a directory of `*.json` manifests.
///
/// Deletion is requested by setting `metadata.deletionTimestamp` in the file.
/// Writes go through a temp file in the same directory followed by a rename.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn scan(&self) -> Result<BTreeMap<ObjectKey, (PathBuf, HarborConfiguration)>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;

        let mut objects: BTreeMap<ObjectKey, (PathBuf, HarborConfiguration)> =
            BTreeMap::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?
        {
            let path = entry.path();
            if !is_manifest(&path) {
                continue;
            }
            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                // Removed between read_dir and read.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(&path, e)),
            };
            let obj: HarborConfiguration = match serde_json::from_slice(&data) {
                Ok(obj) => obj,
                Err(e) => {
                    warn!(path = %path.display(), "Skipping invalid manifest: {}", e);
                    continue;
                }
            };
            let key = obj.key();
            if let Some((other, _)) = objects.get(&key) {
                return Err(StoreError::Conflict(format!(
                    "{} declared by both {} and {}",
                    key,
                    other.display(),
                    path.display()
                )));
            }
            objects.insert(key, (path, obj));
        }
        Ok(objects)
    }

    async fn locate(&self, key: &ObjectKey) -> Result<(PathBuf, HarborConfiguration)> {
        self.scan()
            .await?
            .remove(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn write(&self, path: &Path, obj: &HarborConfiguration) -> Result<()> {
        let data = serde_json::to_vec_pretty(obj).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, &data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::io(&tmp, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::io(path, e));
        }
        Ok(())
    }

    /// Write an object to `<namespace>_<name>.json`, replacing any file that
    /// already declares it.
    pub async fn apply(&self, obj: &HarborConfiguration) -> Result<PathBuf> {
        let _guard = self.write_lock.lock().await;
        let key = obj.key();
        let path = match self.locate(&key).await {
            Ok((path, _)) => path,
            Err(StoreError::NotFound(_)) => self
                .dir
                .join(format!("{}_{}.json", key.namespace, key.name)),
            Err(e) => return Err(e),
        };
        self.write(&path, obj).await?;
        Ok(path)
    }
}

fn is_manifest(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    !hidden && path.extension().is_some_and(|ext| ext == "json")
}

#[async_trait]
impl ObjectStore for FileStore {
    async fn list(&self) -> Result<Vec<HarborConfiguration>> {
        Ok(self.scan().await?.into_values().map(|(_, obj)| obj).collect())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<HarborConfiguration>> {
        match self.locate(key).await {
            Ok((_, obj)) => Ok(Some(obj)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update_metadata(&self, key: &ObjectKey, metadata: &ObjectMeta) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let (path, mut obj) = self.locate(key).await?;
        obj.metadata.finalizers = metadata.finalizers.clone();
        if should_collect(&obj) {
            debug!(object = %key, path = %path.display(), "Removing deleted object");
            return tokio::fs::remove_file(&path)
                .await
                .map_err(|e| StoreError::io(&path, e));
        }
        self.write(&path, &obj).await
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        status: &HarborConfigurationStatus,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let (path, mut obj) = self.locate(key).await?;
        obj.status = status.clone();
        self.write(&path, &obj).await
    }
}
