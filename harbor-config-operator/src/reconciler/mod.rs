//! Reconcilers for the three Harbor resources.
//!
//! Each reconciler converges one remote resource towards the desired state
//! and knows how to remove it again. [`ReconciliationEngine`] runs them in
//! dependency order: registry, project, replication policy, then the
//! replication trigger. Nothing is cached between passes; every step
//! re-reads what it depends on from Harbor.

pub mod project;
pub mod registry;
pub mod replication;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::audit::OperatorAuditLogger;
use crate::clients::RemoteResourceClient;
use crate::context::SyncContext;
use crate::desired::{DesiredConfiguration, ResourceNames};
use crate::error::{ErrorKind, ReconcileError};
use crate::resource::HarborConfigurationStatus;

pub use project::{ProjectReconciler, ProjectStatus};
pub use registry::RegistryReconciler;
pub use replication::ReplicationReconciler;

/// Last known remote IDs, persisted on the declared object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusRecord {
    pub registry_id: i64,
    pub project_id: String,
    pub replication_id: i64,
}

impl From<&HarborConfigurationStatus> for StatusRecord {
    fn from(s: &HarborConfigurationStatus) -> Self {
        StatusRecord {
            registry_id: s.registry_id,
            project_id: s.project_id.clone(),
            replication_id: s.replication_id,
        }
    }
}

impl StatusRecord {
    pub fn apply_to(&self, status: &mut HarborConfigurationStatus) {
        status.registry_id = self.registry_id;
        status.project_id = self.project_id.clone();
        status.replication_id = self.replication_id;
    }
}

/// Trait for remote resource reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// What the reconciler reports after a successful sync.
    type Status: Send;

    /// Create or update the resource so it matches `desired`.
    async fn reconcile(
        &self,
        ctx: &SyncContext,
        client: &dyn RemoteResourceClient,
        desired: &DesiredConfiguration,
    ) -> Result<Self::Status, ReconcileError>;

    /// Delete the resource. A resource that is already gone counts as deleted.
    async fn finalize(
        &self,
        ctx: &SyncContext,
        client: &dyn RemoteResourceClient,
        names: &ResourceNames,
        recorded: &StatusRecord,
    ) -> Result<(), ReconcileError>;
}

/// Treat "already absent" as a successful deletion.
pub(crate) fn absent_ok(res: Result<(), ReconcileError>) -> Result<(), ReconcileError> {
    match res {
        Err(e) if e.is_kind(ErrorKind::NotFound) => Ok(()),
        other => other,
    }
}

/// Runs the registry, project, replication and trigger steps in order.
pub struct ReconciliationEngine {
    registry: RegistryReconciler,
    project: ProjectReconciler,
    replication: ReplicationReconciler,
}

impl ReconciliationEngine {
    pub fn new(audit: Arc<OperatorAuditLogger>) -> Self {
        Self {
            registry: RegistryReconciler::new(audit.clone()),
            project: ProjectReconciler::new(audit.clone()),
            replication: ReplicationReconciler::new(audit),
        }
    }

    /// Synchronize all three resources and request one replication execution.
    ///
    /// The first error aborts the remaining steps.
    pub async fn sync_all(
        &self,
        ctx: &SyncContext,
        client: &dyn RemoteResourceClient,
        desired: &DesiredConfiguration,
    ) -> Result<StatusRecord, ReconcileError> {
        self.registry.reconcile(ctx, client, desired).await?;
        let project = self.project.reconcile(ctx, client, desired).await?;
        self.replication.reconcile(ctx, client, desired).await?;
        let replication_id = self.replication.trigger(ctx, client, desired).await?;

        let record = StatusRecord {
            registry_id: project.registry_id,
            project_id: project.project_id.to_string(),
            replication_id,
        };
        info!(
            registry = %desired.registry.name,
            project = %desired.project.name,
            policy = %desired.replication.name,
            "Harbor resources in sync ({:?})",
            record
        );
        Ok(record)
    }
}
