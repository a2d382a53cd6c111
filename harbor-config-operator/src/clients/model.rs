//! Harbor API v2.0 data types.
//!
//! Filter, trigger and registry-reference types double as the validated form
//! of the loosely typed JSON blobs found in the declared spec.

use serde::{Deserialize, Serialize};

/// Credential used by Harbor to access a remote registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredential {
    /// Access key, e.g. user name when the credential type is `basic`.
    #[serde(default)]
    pub access_key: String,
    /// Access secret, e.g. password when the credential type is `basic`.
    #[serde(default)]
    pub access_secret: String,
    /// Credential type, such as `basic` or `oauth`.
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Registry entry as returned by Harbor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRegistry {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
}

/// Body of `POST /registries`.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryCreate {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<RegistryCredential>,
    pub insecure: bool,
}

/// Field-level registry update. Absent fields are left untouched by Harbor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_secret: Option<String>,
}

/// Project as returned by `GET /projects/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProject {
    pub project_id: i64,
    pub name: String,
    #[serde(default)]
    pub registry_id: Option<i64>,
}

/// Project metadata; Harbor encodes booleans as strings here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public: Option<String>,
}

impl ProjectMetadata {
    pub fn from_public(public: Option<bool>) -> Option<Self> {
        public.map(|p| ProjectMetadata {
            public: Some(p.to_string()),
        })
    }
}

/// Body of `POST /projects` and `PUT /projects/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectReq {
    pub project_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ProjectMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<i64>,
}

/// General project update.
///
/// `storage_limit` only accepts non-negative values; the unlimited quota goes
/// through `set_unlimited_quota`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectUpdate {
    pub name: String,
    pub public: Option<bool>,
    pub registry_id: i64,
    pub storage_limit: Option<i64>,
}

/// Quota entry from `GET /quotas`.
#[derive(Debug, Clone, Deserialize)]
pub struct Quota {
    pub id: i64,
}

/// Body of `PUT /quotas/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaUpdate {
    pub hard: ResourceList,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceList {
    pub storage: i64,
}

/// Reference to a registry inside a replication policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryRef {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<&RemoteRegistry> for RegistryRef {
    fn from(r: &RemoteRegistry) -> Self {
        RegistryRef {
            id: r.id,
            name: Some(r.name.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Name,
    Tag,
    Label,
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterDecoration {
    Matches,
    Excludes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Pattern(String),
    Labels(Vec<String>),
}

/// Replication filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationFilter {
    #[serde(rename = "type")]
    pub kind: FilterKind,
    pub value: FilterValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoration: Option<FilterDecoration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerSettings {
    pub cron: String,
}

/// How Harbor starts executions of a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicationTrigger {
    Manual,
    Scheduled { trigger_settings: TriggerSettings },
    EventBased,
}

/// Replication policy as returned by `GET /replication/policies`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemotePolicy {
    pub id: i64,
    pub name: String,
}

/// Body of `POST /replication/policies` and `PUT /replication/policies/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySpec {
    pub name: String,
    pub description: String,
    pub src_registry: RegistryRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_registry: Option<RegistryRef>,
    pub dest_namespace: String,
    pub filters: Vec<ReplicationFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<ReplicationTrigger>,
    pub deletion: bool,
    #[serde(rename = "override")]
    pub override_existing: bool,
    pub enabled: bool,
}

/// Body of `POST /replication/executions`.
#[derive(Debug, Clone, Serialize)]
pub struct StartReplicationExecution {
    pub policy_id: i64,
}

/// Harbor error envelope: `{"errors":[{"code":"NOT_FOUND","message":"..."}]}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub errors: Vec<ErrorItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorItem {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}
