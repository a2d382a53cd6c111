//! Persistence of declared `HarborConfiguration` objects.
//!
//! The controller never deletes objects itself. It only edits finalizers and
//! status; a store drops an object once deletion was requested and the last
//! finalizer is gone.

mod error;
mod file;
mod memory;

use async_trait::async_trait;

use crate::resource::{HarborConfiguration, HarborConfigurationStatus, ObjectKey, ObjectMeta};

pub use error::{Result, StoreError};
pub use file::FileStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All declared objects, ordered by key.
    async fn list(&self) -> Result<Vec<HarborConfiguration>>;

    async fn get(&self, key: &ObjectKey) -> Result<Option<HarborConfiguration>>;

    /// Persist the finalizer list from `metadata`.
    ///
    /// Removes the object when it is being deleted and no finalizers remain.
    async fn update_metadata(&self, key: &ObjectKey, metadata: &ObjectMeta) -> Result<()>;

    async fn update_status(&self, key: &ObjectKey, status: &HarborConfigurationStatus)
    -> Result<()>;
}

/// Whether an object with these finalizers is due for removal from the store.
pub(crate) fn should_collect(obj: &HarborConfiguration) -> bool {
    obj.is_being_deleted() && obj.metadata.finalizers.is_empty()
}
