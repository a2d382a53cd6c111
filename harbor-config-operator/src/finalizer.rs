//! Finalizer handling and ordered teardown of the remote resources.

use std::sync::Arc;

use tracing::{info, warn};

use crate::audit::OperatorAuditLogger;
use crate::clients::RemoteResourceClient;
use crate::config::FINALIZER;
use crate::context::SyncContext;
use crate::desired::ResourceNames;
use crate::error::{ReconcileError, Step, TeardownError};
use crate::reconciler::{
    ProjectReconciler, Reconciler, RegistryReconciler, ReplicationReconciler, StatusRecord,
};
use crate::resource::HarborConfiguration;
use crate::store::{ObjectStore, StoreError};

/// Whether the operator's finalizer is attached to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerState {
    Absent,
    Present,
}

/// Lifecycle phase of a declared object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    /// Deletion was requested; the object lingers until teardown finishes.
    Terminating,
}

impl Lifecycle {
    pub fn of(obj: &HarborConfiguration) -> Self {
        if obj.is_being_deleted() {
            Lifecycle::Terminating
        } else {
            Lifecycle::Active
        }
    }
}

/// Gates deletion of a declared object behind teardown of its remote resources.
pub struct FinalizerLifecycleManager {
    store: Arc<dyn ObjectStore>,
    audit: Arc<OperatorAuditLogger>,
    registry: RegistryReconciler,
    project: ProjectReconciler,
    replication: ReplicationReconciler,
}

impl FinalizerLifecycleManager {
    pub fn new(store: Arc<dyn ObjectStore>, audit: Arc<OperatorAuditLogger>) -> Self {
        Self {
            store,
            registry: RegistryReconciler::new(audit.clone()),
            project: ProjectReconciler::new(audit.clone()),
            replication: ReplicationReconciler::new(audit.clone()),
            audit,
        }
    }

    pub fn state(obj: &HarborConfiguration) -> FinalizerState {
        if obj.metadata.finalizers.iter().any(|f| f == FINALIZER) {
            FinalizerState::Present
        } else {
            FinalizerState::Absent
        }
    }

    /// Attach the finalizer and persist it. No-op when already present.
    pub async fn ensure_present(&self, obj: &mut HarborConfiguration) -> Result<(), StoreError> {
        if Self::state(obj) == FinalizerState::Present {
            return Ok(());
        }
        obj.metadata.finalizers.push(FINALIZER.to_string());
        self.store.update_metadata(&obj.key(), &obj.metadata).await?;
        self.audit.finalizer_added(&obj.key());
        Ok(())
    }

    /// Detach the finalizer. The store drops the object if it is terminating.
    pub async fn remove(&self, obj: &mut HarborConfiguration) -> Result<(), StoreError> {
        if Self::state(obj) == FinalizerState::Absent {
            return Ok(());
        }
        obj.metadata.finalizers.retain(|f| f != FINALIZER);
        self.store.update_metadata(&obj.key(), &obj.metadata).await?;
        self.audit.finalizer_removed(&obj.key());
        Ok(())
    }

    /// Delete the replication policy, then the project, then the registry.
    ///
    /// Every step is attempted even when an earlier one failed; the failures
    /// come back together as [`ReconcileError::Teardown`]. Cancellation stops
    /// the teardown at once.
    pub async fn teardown(
        &self,
        ctx: &SyncContext,
        client: &dyn RemoteResourceClient,
        names: &ResourceNames,
        recorded: &StatusRecord,
    ) -> Result<(), ReconcileError> {
        let mut failures = TeardownError::default();

        let res = self.replication.finalize(ctx, client, names, recorded).await;
        collect(Step::Replication, res, &mut failures)?;

        let res = self.project.finalize(ctx, client, names, recorded).await;
        collect(Step::Project, res, &mut failures)?;

        let res = self.registry.finalize(ctx, client, names, recorded).await;
        collect(Step::Registry, res, &mut failures)?;

        if failures.is_empty() {
            info!(
                registry = ?names.registry,
                project = ?names.project,
                policy = ?names.policy,
                "Remote resources torn down"
            );
            Ok(())
        } else {
            Err(ReconcileError::Teardown(failures))
        }
    }
}

fn collect(
    step: Step,
    res: Result<(), ReconcileError>,
    failures: &mut TeardownError,
) -> Result<(), ReconcileError> {
    match res {
        Ok(()) => Ok(()),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            warn!(step = %step, "Teardown step failed: {}", e);
            failures.push(step, e);
            Ok(())
        }
    }
}
