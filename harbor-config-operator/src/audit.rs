//! Audit events for changes made to Harbor and to declared objects.
//!
//! Events go to the `audit` tracing target so they can be filtered and shipped
//! separately from operational logs.

use tracing::{info, warn};

use crate::error::{Step, TeardownError};
use crate::resource::ObjectKey;

/// Audit logger for operator events.
#[derive(Debug, Clone)]
pub struct OperatorAuditLogger {
    component: String,
    enabled: bool,
}

impl OperatorAuditLogger {
    pub fn new(instance: &str) -> Self {
        Self {
            component: format!("harbor-config-operator/{}", instance),
            enabled: true,
        }
    }

    /// Audit logger that drops every event (for tests).
    pub fn new_noop() -> Self {
        Self {
            component: String::new(),
            enabled: false,
        }
    }

    fn audit(&self, message: String, objects: &[&str]) {
        if self.enabled {
            info!(target: "audit", component = %self.component, objects = ?objects, "{}", message);
        }
    }

    fn audit_warn(&self, message: String, objects: &[&str]) {
        if self.enabled {
            warn!(target: "audit", component = %self.component, objects = ?objects, "{}", message);
        }
    }

    pub fn registry_created(&self, name: &str, id: i64) {
        self.audit(format!("Registry created: {} ({})", name, id), &[name]);
    }

    pub fn registry_updated(&self, name: &str, id: i64) {
        self.audit(format!("Registry updated: {} ({})", name, id), &[name]);
    }

    pub fn project_created(&self, name: &str, id: i64) {
        self.audit(format!("Project created: {} ({})", name, id), &[name]);
    }

    pub fn project_updated(&self, name: &str, id: i64, unlimited_quota: bool) {
        let msg = if unlimited_quota {
            format!("Project quota set to unlimited: {} ({})", name, id)
        } else {
            format!("Project updated: {} ({})", name, id)
        };
        self.audit(msg, &[name]);
    }

    pub fn policy_created(&self, name: &str, id: i64) {
        self.audit(format!("Replication policy created: {} ({})", name, id), &[name]);
    }

    pub fn policy_updated(&self, name: &str, id: i64) {
        self.audit(format!("Replication policy updated: {} ({})", name, id), &[name]);
    }

    pub fn replication_triggered(&self, name: &str, id: i64) {
        self.audit(format!("Replication execution triggered: {} ({})", name, id), &[name]);
    }

    pub fn resource_deleted(&self, step: Step, name: &str) {
        self.audit(format!("Deleted {}: {}", step, name), &[name]);
    }

    pub fn finalizer_added(&self, key: &ObjectKey) {
        let key = key.to_string();
        self.audit(format!("Finalizer added: {}", key), &[&key]);
    }

    pub fn finalizer_removed(&self, key: &ObjectKey) {
        let key = key.to_string();
        self.audit(format!("Finalizer removed: {}", key), &[&key]);
    }

    pub fn teardown_failed(&self, key: &ObjectKey, err: &TeardownError) {
        let key = key.to_string();
        self.audit_warn(
            format!("Teardown incomplete for {}: {:?} failed", key, err.steps()),
            &[&key],
        );
    }
}
