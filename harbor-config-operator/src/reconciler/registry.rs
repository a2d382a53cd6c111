//! Registry reconciler - keeps the Harbor registry entry in line with the declared one.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Reconciler, StatusRecord, absent_ok};
use crate::audit::OperatorAuditLogger;
use crate::clients::{RegistryUpdate, RemoteRegistry, RemoteResourceClient};
use crate::context::SyncContext;
use crate::desired::{DesiredConfiguration, RegistryDesired, ResourceNames};
use crate::error::{ErrorKind, ReconcileError, Step};

pub struct RegistryReconciler {
    audit: Arc<OperatorAuditLogger>,
}

impl RegistryReconciler {
    pub fn new(audit: Arc<OperatorAuditLogger>) -> Self {
        Self { audit }
    }
}

/// Field-level update. Credential fields are only sent when a credential is
/// declared, so an existing credential is never cleared.
pub fn registry_update(desired: &RegistryDesired) -> RegistryUpdate {
    let mut update = RegistryUpdate {
        name: Some(desired.name.clone()),
        url: Some(desired.url.clone()),
        description: Some(desired.description.clone()),
        ..Default::default()
    };
    if let Some(cred) = &desired.credential {
        update.credential_type = Some(cred.kind.clone());
        update.access_key = Some(cred.access_key.clone());
        update.access_secret = Some(cred.access_secret.clone());
    }
    update
}

#[async_trait]
impl Reconciler for RegistryReconciler {
    type Status = RemoteRegistry;

    async fn reconcile(
        &self,
        ctx: &SyncContext,
        client: &dyn RemoteResourceClient,
        desired: &DesiredConfiguration,
    ) -> Result<Self::Status, ReconcileError> {
        let want = &desired.registry;
        info!(registry = %want.name, "Reconciling registry");

        match ctx.call(Step::Registry, client.create_registry(want)).await {
            Ok(created) => {
                self.audit.registry_created(&created.name, created.id);
                Ok(created)
            }
            Err(e) if e.is_kind(ErrorKind::AlreadyExists) => {
                debug!(registry = %want.name, "Registry exists, updating");
                let existing = ctx
                    .call(Step::Registry, client.lookup_registry_by_name(&want.name))
                    .await?;
                let update = registry_update(want);
                ctx.call(Step::Registry, client.update_registry(existing.id, &update))
                    .await?;
                self.audit.registry_updated(&existing.name, existing.id);
                Ok(existing)
            }
            Err(e) => Err(e),
        }
    }

    async fn finalize(
        &self,
        ctx: &SyncContext,
        client: &dyn RemoteResourceClient,
        names: &ResourceNames,
        recorded: &StatusRecord,
    ) -> Result<(), ReconcileError> {
        info!(registry = ?names.registry, "Finalizing (deleting) registry");

        let found = match names.registry.as_deref() {
            Some(name) => {
                match ctx
                    .call(Step::Registry, client.lookup_registry_by_name(name))
                    .await
                {
                    Ok(found) => Some(found.id),
                    Err(e) if e.is_kind(ErrorKind::NotFound) => None,
                    Err(e) => return Err(e),
                }
            }
            None => None,
        };
        let id = match found {
            Some(id) => id,
            None if recorded.registry_id > 0 => recorded.registry_id,
            None => {
                debug!(registry = ?names.registry, "Registry already gone");
                return Ok(());
            }
        };

        absent_ok(ctx.call(Step::Registry, client.delete_registry(id)).await)?;
        let label = names.registry.clone().unwrap_or_else(|| id.to_string());
        self.audit.resource_deleted(Step::Registry, &label);
        Ok(())
    }
}
