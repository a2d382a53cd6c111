//! Clients for the remote registry-management service.
//!
//! The reconcilers only talk to Harbor through [`RemoteResourceClient`], so
//! the engine can be driven by fakes in tests. [`harbor::HarborClient`] is
//! the implementation over the Harbor API v2.0.

pub mod harbor;
pub mod model;

use std::sync::Arc;

use async_trait::async_trait;

use crate::desired::{ProjectDesired, RegistryDesired};
use crate::error::RemoteError;
use crate::target::HarborEndpoint;

pub use harbor::{HarborClient, HarborClientFactory};
pub use model::{
    PolicySpec, ProjectUpdate, RegistryUpdate, RemotePolicy, RemoteProject, RemoteRegistry,
};

/// Result type for remote calls.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Capabilities the engine requires from the remote service.
#[async_trait]
pub trait RemoteResourceClient: Send + Sync {
    async fn lookup_registry_by_name(&self, name: &str) -> Result<RemoteRegistry>;
    async fn create_registry(&self, desired: &RegistryDesired) -> Result<RemoteRegistry>;
    async fn update_registry(&self, id: i64, update: &RegistryUpdate) -> Result<()>;
    async fn delete_registry(&self, id: i64) -> Result<()>;

    async fn lookup_project_by_name(&self, name: &str) -> Result<RemoteProject>;
    async fn create_project(
        &self,
        desired: &ProjectDesired,
        registry_id: i64,
    ) -> Result<RemoteProject>;
    async fn update_project(&self, project_id: i64, update: &ProjectUpdate) -> Result<()>;
    async fn set_unlimited_quota(&self, project_id: i64) -> Result<()>;
    /// Delete a project by name or by its numeric ID rendered as a string.
    async fn delete_project(&self, name_or_id: &str) -> Result<()>;

    async fn lookup_policy_by_name(&self, name: &str) -> Result<RemotePolicy>;
    async fn create_policy(&self, policy: &PolicySpec) -> Result<RemotePolicy>;
    async fn update_policy(&self, id: i64, policy: &PolicySpec) -> Result<()>;
    async fn delete_policy(&self, id: i64) -> Result<()>;

    async fn trigger_execution(&self, policy_id: i64) -> Result<()>;
}

/// Builds a client for a resolved Harbor endpoint.
pub trait ClientFactory: Send + Sync {
    fn client_for(&self, endpoint: &HarborEndpoint) -> Result<Arc<dyn RemoteResourceClient>>;
}
