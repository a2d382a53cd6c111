//! Project reconciler - creates the project on top of the synced registry.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Reconciler, StatusRecord, absent_ok};
use crate::audit::OperatorAuditLogger;
use crate::clients::{ProjectUpdate, RemoteResourceClient};
use crate::context::SyncContext;
use crate::desired::{DesiredConfiguration, ResourceNames, StorageQuota};
use crate::error::{ErrorKind, ReconcileError, Step};

/// IDs confirmed by the project step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectStatus {
    pub registry_id: i64,
    pub project_id: i64,
}

pub struct ProjectReconciler {
    audit: Arc<OperatorAuditLogger>,
}

impl ProjectReconciler {
    pub fn new(audit: Arc<OperatorAuditLogger>) -> Self {
        Self { audit }
    }
}

#[async_trait]
impl Reconciler for ProjectReconciler {
    type Status = ProjectStatus;

    async fn reconcile(
        &self,
        ctx: &SyncContext,
        client: &dyn RemoteResourceClient,
        desired: &DesiredConfiguration,
    ) -> Result<Self::Status, ReconcileError> {
        let want = &desired.project;
        info!(project = %want.name, "Reconciling project");

        // The registry ID from the previous step is not reused.
        let registry = ctx
            .call(
                Step::Project,
                client.lookup_registry_by_name(&desired.registry.name),
            )
            .await?;

        let project_id = match ctx
            .call(Step::Project, client.create_project(want, registry.id))
            .await
        {
            Ok(created) => {
                self.audit.project_created(&created.name, created.project_id);
                created.project_id
            }
            Err(e) if e.is_kind(ErrorKind::AlreadyExists) => {
                debug!(project = %want.name, "Project exists, updating");
                let existing = ctx
                    .call(Step::Project, client.lookup_project_by_name(&want.name))
                    .await?;

                // The general update only accepts non-negative limits.
                match want.storage_quota {
                    Some(StorageQuota::Unlimited) => {
                        ctx.call(
                            Step::Project,
                            client.set_unlimited_quota(existing.project_id),
                        )
                        .await?;
                        self.audit
                            .project_updated(&existing.name, existing.project_id, true);
                    }
                    quota => {
                        let update = ProjectUpdate {
                            name: want.name.clone(),
                            public: want.public,
                            registry_id: registry.id,
                            storage_limit: quota.map(|q| q.as_limit()),
                        };
                        ctx.call(
                            Step::Project,
                            client.update_project(existing.project_id, &update),
                        )
                        .await?;
                        self.audit
                            .project_updated(&existing.name, existing.project_id, false);
                    }
                }
                existing.project_id
            }
            Err(e) => return Err(e),
        };

        Ok(ProjectStatus {
            registry_id: registry.id,
            project_id,
        })
    }

    async fn finalize(
        &self,
        ctx: &SyncContext,
        client: &dyn RemoteResourceClient,
        names: &ResourceNames,
        recorded: &StatusRecord,
    ) -> Result<(), ReconcileError> {
        info!(project = ?names.project, "Finalizing (deleting) project");

        let found = match names.project.as_deref() {
            Some(name) => {
                match ctx
                    .call(Step::Project, client.lookup_project_by_name(name))
                    .await
                {
                    Ok(found) => Some(found.project_id.to_string()),
                    Err(e) if e.is_kind(ErrorKind::NotFound) => None,
                    Err(e) => return Err(e),
                }
            }
            None => None,
        };
        let target = match found {
            Some(id) => id,
            None if !recorded.project_id.is_empty() => recorded.project_id.clone(),
            None => {
                debug!(project = ?names.project, "Project already gone");
                return Ok(());
            }
        };

        absent_ok(ctx.call(Step::Project, client.delete_project(&target)).await)?;
        let label = names.project.as_deref().unwrap_or(target.as_str());
        self.audit.resource_deleted(Step::Project, label);
        Ok(())
    }
}
