//! Desired state resolution.
//!
//! Turns the declared spec into an immutable [`DesiredConfiguration`] for one
//! pass. All deserialization of the free-form replication payloads happens
//! here, so a reconciliation pass never fails on a malformed filter halfway
//! through.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::clients::model::{
    FilterKind, FilterValue, RegistryCredential, RegistryRef, ReplicationFilter,
    ReplicationTrigger,
};
use crate::error::ErrorKind;
use crate::resource::HarborConfigurationSpec;

/// Sentinel quota value meaning "no storage limit".
pub const UNLIMITED_QUOTA: i64 = -1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("{0} name is required")]
    NameRequired(&'static str),

    #[error("{0} name must not start or end with whitespace")]
    NameWhitespace(&'static str),

    #[error("registry URL is required")]
    UrlRequired,

    #[error("invalid storage limit {0}: must be -1 (unlimited) or >= 0")]
    InvalidStorageLimit(i64),

    #[error("invalid replication filter #{index}: {reason}")]
    InvalidFilter { index: usize, reason: String },

    #[error("invalid replication trigger: {0}")]
    InvalidTrigger(String),

    #[error("invalid destination registry: {0}")]
    InvalidDestinationRegistry(String),
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryDesired {
    pub name: String,
    pub kind: String,
    pub url: String,
    pub description: String,
    pub credential: Option<RegistryCredential>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageQuota {
    Unlimited,
    Bytes(i64),
}

impl StorageQuota {
    pub fn from_limit(limit: i64) -> Result<Self, ResolveError> {
        match limit {
            UNLIMITED_QUOTA => Ok(StorageQuota::Unlimited),
            n if n >= 0 => Ok(StorageQuota::Bytes(n)),
            n => Err(ResolveError::InvalidStorageLimit(n)),
        }
    }

    /// Raw value as Harbor expects it in `storage_limit`.
    pub fn as_limit(&self) -> i64 {
        match self {
            StorageQuota::Unlimited => UNLIMITED_QUOTA,
            StorageQuota::Bytes(n) => *n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDesired {
    pub name: String,
    pub public: Option<bool>,
    pub storage_quota: Option<StorageQuota>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationDesired {
    pub name: String,
    pub destination_namespace: String,
    pub description: String,
    pub destination_registry: Option<RegistryRef>,
    pub filters: Vec<ReplicationFilter>,
    pub trigger: Option<ReplicationTrigger>,
    pub enable_policy: bool,
    pub replicate_deletion: bool,
    pub override_existing: bool,
}

/// Immutable desired triple for one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredConfiguration {
    pub registry: RegistryDesired,
    pub project: ProjectDesired,
    pub replication: ReplicationDesired,
}

impl DesiredConfiguration {
    pub fn names(&self) -> ResourceNames {
        ResourceNames {
            registry: Some(self.registry.name.clone()),
            project: Some(self.project.name.clone()),
            policy: Some(self.replication.name.clone()),
        }
    }
}

/// Names of the three remote resources, which is all teardown needs.
///
/// A name left blank in the declared object is `None`; teardown then falls
/// back to the ID recorded in status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceNames {
    pub registry: Option<String>,
    pub project: Option<String>,
    pub policy: Option<String>,
}

/// Extracts the desired triple from a declared spec.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesiredStateResolver;

impl DesiredStateResolver {
    pub fn resolve(&self, spec: &HarborConfigurationSpec) -> Result<DesiredConfiguration, ResolveError> {
        let registry_name = required(&spec.registry.name, "registry")?;
        let project_name = required(&spec.project_req.project_name, "project")?;
        let policy_name = required(&spec.replication.name, "replication")?;

        if spec.registry.target_registry_url.trim().is_empty() {
            return Err(ResolveError::UrlRequired);
        }

        let registry = RegistryDesired {
            name: registry_name,
            kind: spec.registry.kind.clone(),
            url: spec.registry.target_registry_url.clone(),
            description: spec.registry.description.clone(),
            credential: spec.registry.credential.clone(),
        };

        let project = ProjectDesired {
            name: project_name,
            public: spec.project_req.public,
            storage_quota: spec
                .project_req
                .storage_limit
                .map(StorageQuota::from_limit)
                .transpose()?,
        };

        let rep = &spec.replication;
        let filters = rep
            .filters
            .iter()
            .enumerate()
            .map(|(index, raw)| parse_filter(raw).map_err(|reason| ResolveError::InvalidFilter { index, reason }))
            .collect::<Result<Vec<_>, _>>()?;

        let trigger = rep
            .trigger
            .as_ref()
            .map(parse_trigger)
            .transpose()
            .map_err(ResolveError::InvalidTrigger)?;

        let destination_registry = rep
            .destination_registry
            .as_ref()
            .map(parse_registry_ref)
            .transpose()
            .map_err(ResolveError::InvalidDestinationRegistry)?;

        let replication = ReplicationDesired {
            name: policy_name,
            destination_namespace: rep.destination_namespace.clone(),
            description: rep.description.clone(),
            destination_registry,
            filters,
            trigger,
            enable_policy: rep.enable_policy,
            replicate_deletion: rep.replicate_deletion,
            override_existing: rep.override_existing,
        };

        Ok(DesiredConfiguration {
            registry,
            project,
            replication,
        })
    }

    /// Resource names only, as declared. Never fails, so an object whose
    /// spec no longer resolves can still be torn down.
    pub fn names(&self, spec: &HarborConfigurationSpec) -> ResourceNames {
        ResourceNames {
            registry: declared(&spec.registry.name),
            project: declared(&spec.project_req.project_name),
            policy: declared(&spec.replication.name),
        }
    }
}

fn declared(value: &str) -> Option<String> {
    (!value.trim().is_empty()).then(|| value.to_string())
}

/// Names go to Harbor verbatim, so they are checked rather than trimmed.
fn required(value: &str, what: &'static str) -> Result<String, ResolveError> {
    if value.trim().is_empty() {
        return Err(ResolveError::NameRequired(what));
    }
    if value.trim() != value {
        return Err(ResolveError::NameWhitespace(what));
    }
    Ok(value.to_string())
}

fn from_json<T: DeserializeOwned>(raw: &Value) -> Result<T, String> {
    serde_json::from_value(raw.clone()).map_err(|e| e.to_string())
}

fn parse_filter(raw: &Value) -> Result<ReplicationFilter, String> {
    let filter: ReplicationFilter = from_json(raw)?;
    match (&filter.kind, &filter.value) {
        (FilterKind::Label, FilterValue::Pattern(_)) => {
            Err("label filters take a list of labels".to_string())
        }
        (FilterKind::Label, FilterValue::Labels(_)) => Ok(filter),
        (_, FilterValue::Labels(_)) => Err(format!(
            "{:?} filters take a single pattern",
            filter.kind
        )),
        (_, FilterValue::Pattern(p)) if p.trim().is_empty() => {
            Err("filter pattern must not be empty".to_string())
        }
        _ => Ok(filter),
    }
}

fn parse_trigger(raw: &Value) -> Result<ReplicationTrigger, String> {
    let trigger: ReplicationTrigger = from_json(raw)?;
    if let ReplicationTrigger::Scheduled { trigger_settings } = &trigger {
        let fields = trigger_settings.cron.split_whitespace().count();
        if fields != 6 {
            return Err(format!(
                "cron expression '{}' must have 6 fields, got {}",
                trigger_settings.cron, fields
            ));
        }
    }
    Ok(trigger)
}

fn parse_registry_ref(raw: &Value) -> Result<RegistryRef, String> {
    let r: RegistryRef = from_json(raw)?;
    if r.id < 0 {
        return Err(format!("registry id must not be negative, got {}", r.id));
    }
    Ok(r)
}
