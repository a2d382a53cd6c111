//! Replication reconciler - manages the replication policy and triggers executions.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Reconciler, StatusRecord, absent_ok};
use crate::audit::OperatorAuditLogger;
use crate::clients::model::RegistryRef;
use crate::clients::{PolicySpec, RemoteRegistry, RemoteResourceClient};
use crate::context::SyncContext;
use crate::desired::{DesiredConfiguration, ReplicationDesired, ResourceNames};
use crate::error::{ErrorKind, ReconcileError, Step};

pub struct ReplicationReconciler {
    audit: Arc<OperatorAuditLogger>,
}

/// Full policy body with `source` as the source registry.
pub fn policy_spec(desired: &ReplicationDesired, source: &RemoteRegistry) -> PolicySpec {
    PolicySpec {
        name: desired.name.clone(),
        description: desired.description.clone(),
        src_registry: RegistryRef::from(source),
        dest_registry: desired.destination_registry.clone(),
        dest_namespace: desired.destination_namespace.clone(),
        filters: desired.filters.clone(),
        trigger: desired.trigger.clone(),
        deletion: desired.replicate_deletion,
        override_existing: desired.override_existing,
        enabled: desired.enable_policy,
    }
}

impl ReplicationReconciler {
    pub fn new(audit: Arc<OperatorAuditLogger>) -> Self {
        Self { audit }
    }

    /// Request one execution of the policy. Runs on every successful pass,
    /// whether or not the policy changed. Returns the policy ID.
    pub async fn trigger(
        &self,
        ctx: &SyncContext,
        client: &dyn RemoteResourceClient,
        desired: &DesiredConfiguration,
    ) -> Result<i64, ReconcileError> {
        let name = &desired.replication.name;
        let policy = ctx
            .call(Step::Trigger, client.lookup_policy_by_name(name))
            .await?;
        ctx.call(Step::Trigger, client.trigger_execution(policy.id))
            .await?;
        self.audit.replication_triggered(&policy.name, policy.id);
        Ok(policy.id)
    }
}

#[async_trait]
impl Reconciler for ReplicationReconciler {
    type Status = ();

    async fn reconcile(
        &self,
        ctx: &SyncContext,
        client: &dyn RemoteResourceClient,
        desired: &DesiredConfiguration,
    ) -> Result<Self::Status, ReconcileError> {
        let want = &desired.replication;
        info!(policy = %want.name, "Reconciling replication policy");

        let source = ctx
            .call(
                Step::Replication,
                client.lookup_registry_by_name(&desired.registry.name),
            )
            .await?;
        let spec = policy_spec(want, &source);

        match ctx.call(Step::Replication, client.create_policy(&spec)).await {
            Ok(created) => {
                self.audit.policy_created(&created.name, created.id);
                Ok(())
            }
            Err(e) if e.is_kind(ErrorKind::AlreadyExists) => {
                debug!(policy = %want.name, "Replication policy exists, updating");
                let existing = ctx
                    .call(Step::Replication, client.lookup_policy_by_name(&want.name))
                    .await?;
                match ctx
                    .call(Step::Replication, client.update_policy(existing.id, &spec))
                    .await
                {
                    Ok(()) => {
                        self.audit.policy_updated(&existing.name, existing.id);
                        Ok(())
                    }
                    // Harbor answers an identical update with a conflict.
                    Err(e) if e.is_kind(ErrorKind::AlreadyExists) => {
                        debug!(policy = %want.name, "Replication policy unchanged");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
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
        info!(policy = ?names.policy, "Finalizing (deleting) replication policy");

        let found = match names.policy.as_deref() {
            Some(name) => {
                match ctx
                    .call(Step::Replication, client.lookup_policy_by_name(name))
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
            None if recorded.replication_id > 0 => recorded.replication_id,
            None => {
                debug!(policy = ?names.policy, "Replication policy already gone");
                return Ok(());
            }
        };

        absent_ok(ctx.call(Step::Replication, client.delete_policy(id)).await)?;
        let label = names.policy.clone().unwrap_or_else(|| id.to_string());
        self.audit.resource_deleted(Step::Replication, &label);
        Ok(())
    }
}
