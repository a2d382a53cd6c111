//! Shared test utilities for harbor-config-operator integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use harbor_config_operator::clients::model::{FilterKind, FilterValue, ReplicationFilter};
use harbor_config_operator::clients::{
    ClientFactory, PolicySpec, ProjectUpdate, RegistryUpdate, RemotePolicy, RemoteProject,
    RemoteRegistry, RemoteResourceClient,
};
use harbor_config_operator::desired::{
    DesiredConfiguration, ProjectDesired, RegistryDesired, ReplicationDesired, StorageQuota,
};
use harbor_config_operator::error::{ErrorKind, RemoteError};
use harbor_config_operator::resource::{
    HarborConfigurationSpec, HarborTarget, ProjectReqSpec, RegistrySpec, ReplicationSpec,
};
use harbor_config_operator::target::HarborEndpoint;

// =============================================================================
// Fake remote client
// =============================================================================

/// Remote operation, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    LookupRegistry,
    CreateRegistry,
    UpdateRegistry,
    DeleteRegistry,
    LookupProject,
    CreateProject,
    UpdateProject,
    SetUnlimitedQuota,
    DeleteProject,
    LookupPolicy,
    CreatePolicy,
    UpdatePolicy,
    DeletePolicy,
    TriggerExecution,
}

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    LookupRegistry(String),
    CreateRegistry(String),
    UpdateRegistry(i64, RegistryUpdate),
    DeleteRegistry(i64),
    LookupProject(String),
    CreateProject(String, i64),
    UpdateProject(i64, ProjectUpdate),
    SetUnlimitedQuota(i64),
    DeleteProject(String),
    LookupPolicy(String),
    CreatePolicy(String, i64),
    UpdatePolicy(i64),
    DeletePolicy(i64),
    TriggerExecution(i64),
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Call::LookupRegistry(_) => Op::LookupRegistry,
            Call::CreateRegistry(_) => Op::CreateRegistry,
            Call::UpdateRegistry(..) => Op::UpdateRegistry,
            Call::DeleteRegistry(_) => Op::DeleteRegistry,
            Call::LookupProject(_) => Op::LookupProject,
            Call::CreateProject(..) => Op::CreateProject,
            Call::UpdateProject(..) => Op::UpdateProject,
            Call::SetUnlimitedQuota(_) => Op::SetUnlimitedQuota,
            Call::DeleteProject(_) => Op::DeleteProject,
            Call::LookupPolicy(_) => Op::LookupPolicy,
            Call::CreatePolicy(..) => Op::CreatePolicy,
            Call::UpdatePolicy(_) => Op::UpdatePolicy,
            Call::DeletePolicy(_) => Op::DeletePolicy,
            Call::TriggerExecution(_) => Op::TriggerExecution,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredProject {
    pub project: RemoteProject,
    pub public: Option<bool>,
    pub storage_limit: Option<i64>,
}

#[derive(Default)]
struct Backend {
    next_id: i64,
    registries: BTreeMap<String, RemoteRegistry>,
    projects: BTreeMap<String, StoredProject>,
    policies: BTreeMap<String, (RemotePolicy, PolicySpec)>,
    executions: Vec<i64>,
    calls: Vec<Call>,
    failures: HashMap<Op, (RemoteError, Option<u32>)>,
    delays: HashMap<Op, Duration>,
}

impl Backend {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Harbor refuses to delete a resource something else still points at.
    fn referenced(what: String, by: Option<String>) -> Result<(), RemoteError> {
        match by {
            Some(by) => Err(RemoteError::new(
                ErrorKind::Unknown,
                format!("412 Precondition Failed: {} is referenced by {}", what, by),
            )),
            None => Ok(()),
        }
    }
}

/// In-memory Harbor that behaves like the real API at the level the
/// reconcilers care about, and records every call.
#[derive(Default)]
pub struct FakeHarbor {
    inner: Mutex<Backend>,
}

impl FakeHarbor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every call of `op` with `err`.
    pub fn fail(&self, op: Op, err: RemoteError) {
        self.inner.lock().unwrap().failures.insert(op, (err, None));
    }

    /// Fail the next `times` calls of `op` with `err`.
    pub fn fail_times(&self, op: Op, err: RemoteError, times: u32) {
        self.inner
            .lock()
            .unwrap()
            .failures
            .insert(op, (err, Some(times)));
    }

    pub fn clear_failures(&self) {
        self.inner.lock().unwrap().failures.clear();
    }

    /// Delay every call of `op`.
    pub fn delay(&self, op: Op, by: Duration) {
        self.inner.lock().unwrap().delays.insert(op, by);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.calls().iter().map(Call::op).collect()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls().iter().filter(|c| c.op() == op).count()
    }

    pub fn registry(&self, name: &str) -> Option<RemoteRegistry> {
        self.inner.lock().unwrap().registries.get(name).cloned()
    }

    pub fn project(&self, name: &str) -> Option<StoredProject> {
        self.inner.lock().unwrap().projects.get(name).cloned()
    }

    pub fn policy(&self, name: &str) -> Option<(RemotePolicy, PolicySpec)> {
        self.inner.lock().unwrap().policies.get(name).cloned()
    }

    pub fn executions(&self) -> Vec<i64> {
        self.inner.lock().unwrap().executions.clone()
    }

    pub fn is_empty(&self) -> bool {
        let b = self.inner.lock().unwrap();
        b.registries.is_empty() && b.projects.is_empty() && b.policies.is_empty()
    }

    /// Seed a registry as if it had been created out-of-band.
    pub fn seed_registry(&self, name: &str) -> i64 {
        let mut b = self.inner.lock().unwrap();
        let id = b.id();
        b.registries.insert(
            name.to_string(),
            RemoteRegistry {
                id,
                name: name.to_string(),
                kind: "docker-hub".to_string(),
                url: "https://hub.docker.com".to_string(),
                description: String::new(),
            },
        );
        id
    }

    /// Turn the project into a plain one that no longer proxies a registry.
    pub fn unlink_project(&self, name: &str) {
        if let Some(stored) = self.inner.lock().unwrap().projects.get_mut(name) {
            stored.project.registry_id = None;
        }
    }

    /// Remove a policy behind the operator's back.
    pub fn drop_policy(&self, name: &str) {
        self.inner.lock().unwrap().policies.remove(name);
    }

    async fn enter(&self, call: Call) -> Result<(), RemoteError> {
        let op = call.op();
        let (delay, failure) = {
            let mut b = self.inner.lock().unwrap();
            b.calls.push(call);
            let delay = b.delays.get(&op).copied();
            let failure = match b.failures.get_mut(&op) {
                Some((err, None)) => Some(err.clone()),
                Some((err, Some(left))) if *left > 0 => {
                    *left -= 1;
                    Some(err.clone())
                }
                _ => None,
            };
            (delay, failure)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteResourceClient for FakeHarbor {
    async fn lookup_registry_by_name(&self, name: &str) -> Result<RemoteRegistry, RemoteError> {
        self.enter(Call::LookupRegistry(name.to_string())).await?;
        self.registry(name)
            .ok_or_else(|| RemoteError::not_found(format!("registry {}", name)))
    }

    async fn create_registry(&self, desired: &RegistryDesired) -> Result<RemoteRegistry, RemoteError> {
        self.enter(Call::CreateRegistry(desired.name.clone())).await?;
        let mut b = self.inner.lock().unwrap();
        if b.registries.contains_key(&desired.name) {
            return Err(RemoteError::already_exists(format!("registry {}", desired.name)));
        }
        let registry = RemoteRegistry {
            id: b.id(),
            name: desired.name.clone(),
            kind: desired.kind.clone(),
            url: desired.url.clone(),
            description: desired.description.clone(),
        };
        b.registries.insert(desired.name.clone(), registry.clone());
        Ok(registry)
    }

    async fn update_registry(&self, id: i64, update: &RegistryUpdate) -> Result<(), RemoteError> {
        self.enter(Call::UpdateRegistry(id, update.clone())).await?;
        let mut b = self.inner.lock().unwrap();
        let registry = b
            .registries
            .values_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| RemoteError::not_found(format!("registry {}", id)))?;
        if let Some(url) = &update.url {
            registry.url = url.clone();
        }
        if let Some(description) = &update.description {
            registry.description = description.clone();
        }
        Ok(())
    }

    async fn delete_registry(&self, id: i64) -> Result<(), RemoteError> {
        self.enter(Call::DeleteRegistry(id)).await?;
        let mut b = self.inner.lock().unwrap();
        if !b.registries.values().any(|r| r.id == id) {
            return Err(RemoteError::not_found(format!("registry {}", id)));
        }
        let by = b
            .projects
            .values()
            .find(|p| p.project.registry_id == Some(id))
            .map(|p| format!("project {}", p.project.name))
            .or_else(|| {
                b.policies
                    .values()
                    .find(|(_, spec)| spec.src_registry.id == id)
                    .map(|(p, _)| format!("policy {}", p.name))
            });
        Backend::referenced(format!("registry {}", id), by)?;
        b.registries.retain(|_, r| r.id != id);
        Ok(())
    }

    async fn lookup_project_by_name(&self, name: &str) -> Result<RemoteProject, RemoteError> {
        self.enter(Call::LookupProject(name.to_string())).await?;
        self.project(name)
            .map(|p| p.project)
            .ok_or_else(|| RemoteError::not_found(format!("project {}", name)))
    }

    async fn create_project(
        &self,
        desired: &ProjectDesired,
        registry_id: i64,
    ) -> Result<RemoteProject, RemoteError> {
        self.enter(Call::CreateProject(desired.name.clone(), registry_id))
            .await?;
        let mut b = self.inner.lock().unwrap();
        if b.projects.contains_key(&desired.name) {
            return Err(RemoteError::already_exists(format!("project {}", desired.name)));
        }
        let project = RemoteProject {
            project_id: b.id(),
            name: desired.name.clone(),
            registry_id: Some(registry_id),
        };
        b.projects.insert(
            desired.name.clone(),
            StoredProject {
                project: project.clone(),
                public: desired.public,
                storage_limit: desired.storage_quota.map(|q| q.as_limit()),
            },
        );
        Ok(project)
    }

    async fn update_project(&self, project_id: i64, update: &ProjectUpdate) -> Result<(), RemoteError> {
        self.enter(Call::UpdateProject(project_id, update.clone()))
            .await?;
        if update.storage_limit.is_some_and(|l| l < 0) {
            return Err(RemoteError::validation("negative storage limit"));
        }
        let mut b = self.inner.lock().unwrap();
        let stored = b
            .projects
            .values_mut()
            .find(|p| p.project.project_id == project_id)
            .ok_or_else(|| RemoteError::not_found(format!("project {}", project_id)))?;
        stored.public = update.public;
        stored.project.registry_id = Some(update.registry_id);
        if update.storage_limit.is_some() {
            stored.storage_limit = update.storage_limit;
        }
        Ok(())
    }

    async fn set_unlimited_quota(&self, project_id: i64) -> Result<(), RemoteError> {
        self.enter(Call::SetUnlimitedQuota(project_id)).await?;
        let mut b = self.inner.lock().unwrap();
        let stored = b
            .projects
            .values_mut()
            .find(|p| p.project.project_id == project_id)
            .ok_or_else(|| RemoteError::not_found(format!("project {}", project_id)))?;
        stored.storage_limit = Some(-1);
        Ok(())
    }

    async fn delete_project(&self, name_or_id: &str) -> Result<(), RemoteError> {
        self.enter(Call::DeleteProject(name_or_id.to_string()))
            .await?;
        let mut b = self.inner.lock().unwrap();
        let name = b
            .projects
            .iter()
            .find(|(name, p)| *name == name_or_id || p.project.project_id.to_string() == name_or_id)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| RemoteError::not_found(format!("project {}", name_or_id)))?;
        let by = b
            .policies
            .values()
            .find(|(_, spec)| spec.dest_namespace == name)
            .map(|(p, _)| format!("policy {}", p.name));
        Backend::referenced(format!("project {}", name), by)?;
        b.projects.remove(&name);
        Ok(())
    }

    async fn lookup_policy_by_name(&self, name: &str) -> Result<RemotePolicy, RemoteError> {
        self.enter(Call::LookupPolicy(name.to_string())).await?;
        self.policy(name)
            .map(|(p, _)| p)
            .ok_or_else(|| RemoteError::not_found(format!("replication policy {}", name)))
    }

    async fn create_policy(&self, policy: &PolicySpec) -> Result<RemotePolicy, RemoteError> {
        self.enter(Call::CreatePolicy(policy.name.clone(), policy.src_registry.id))
            .await?;
        let mut b = self.inner.lock().unwrap();
        if b.policies.contains_key(&policy.name) {
            return Err(RemoteError::already_exists(format!("policy {}", policy.name)));
        }
        let created = RemotePolicy {
            id: b.id(),
            name: policy.name.clone(),
        };
        b.policies
            .insert(policy.name.clone(), (created.clone(), policy.clone()));
        Ok(created)
    }

    async fn update_policy(&self, id: i64, policy: &PolicySpec) -> Result<(), RemoteError> {
        self.enter(Call::UpdatePolicy(id)).await?;
        let mut b = self.inner.lock().unwrap();
        let (_, stored) = b
            .policies
            .values_mut()
            .find(|(p, _)| p.id == id)
            .ok_or_else(|| RemoteError::not_found(format!("policy {}", id)))?;
        // Harbor rejects an update that changes nothing.
        if stored == policy {
            return Err(RemoteError::already_exists("policy unchanged"));
        }
        *stored = policy.clone();
        Ok(())
    }

    async fn delete_policy(&self, id: i64) -> Result<(), RemoteError> {
        self.enter(Call::DeletePolicy(id)).await?;
        let mut b = self.inner.lock().unwrap();
        let before = b.policies.len();
        b.policies.retain(|_, (p, _)| p.id != id);
        if b.policies.len() == before {
            return Err(RemoteError::not_found(format!("policy {}", id)));
        }
        Ok(())
    }

    async fn trigger_execution(&self, policy_id: i64) -> Result<(), RemoteError> {
        self.enter(Call::TriggerExecution(policy_id)).await?;
        self.inner.lock().unwrap().executions.push(policy_id);
        Ok(())
    }
}

/// Hands out the same [`FakeHarbor`] for every endpoint.
pub struct FakeFactory {
    pub harbor: Arc<FakeHarbor>,
    pub endpoints: Mutex<Vec<HarborEndpoint>>,
}

impl FakeFactory {
    pub fn new(harbor: Arc<FakeHarbor>) -> Arc<Self> {
        Arc::new(Self {
            harbor,
            endpoints: Mutex::new(Vec::new()),
        })
    }
}

impl ClientFactory for FakeFactory {
    fn client_for(
        &self,
        endpoint: &HarborEndpoint,
    ) -> Result<Arc<dyn RemoteResourceClient>, RemoteError> {
        self.endpoints.lock().unwrap().push(endpoint.clone());
        Ok(self.harbor.clone())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Desired state with registry `r1`, project `p1` and policy `rep1`.
pub fn desired(quota: Option<StorageQuota>) -> DesiredConfiguration {
    DesiredConfiguration {
        registry: RegistryDesired {
            name: "r1".to_string(),
            kind: "docker-hub".to_string(),
            url: "https://hub.docker.com".to_string(),
            description: "upstream".to_string(),
            credential: None,
        },
        project: ProjectDesired {
            name: "p1".to_string(),
            public: Some(true),
            storage_quota: quota,
        },
        replication: ReplicationDesired {
            name: "rep1".to_string(),
            destination_namespace: "p1".to_string(),
            description: String::new(),
            destination_registry: None,
            filters: vec![ReplicationFilter {
                kind: FilterKind::Name,
                value: FilterValue::Pattern("library/**".to_string()),
                decoration: None,
            }],
            trigger: None,
            enable_policy: true,
            replicate_deletion: false,
            override_existing: true,
        },
    }
}

/// Declared spec matching [`desired`] with a 10-byte quota.
pub fn spec() -> HarborConfigurationSpec {
    HarborConfigurationSpec {
        harbor_target: HarborTarget {
            api_url: "https://harbor.example/api/v2.0".to_string(),
            username: "admin".to_string(),
            password: Some("Harbor12345".to_string()),
            password_file: None,
        },
        registry: RegistrySpec {
            name: "r1".to_string(),
            kind: "docker-hub".to_string(),
            target_registry_url: "https://hub.docker.com".to_string(),
            description: "upstream".to_string(),
            credential: None,
        },
        project_req: ProjectReqSpec {
            project_name: "p1".to_string(),
            storage_limit: Some(10),
            public: Some(true),
        },
        replication: ReplicationSpec {
            name: "rep1".to_string(),
            destination_namespace: "p1".to_string(),
            description: String::new(),
            destination_registry: None,
            enable_policy: true,
            replicate_deletion: false,
            override_existing: true,
            filters: vec![json!({"type": "name", "value": "library/**"})],
            trigger: None,
        },
    }
}

// =============================================================================
// Mock Harbor HTTP server
// =============================================================================

/// State of the mock Harbor API.
#[derive(Debug, Default)]
pub struct MockState {
    next_id: i64,
    pub registries: BTreeMap<i64, Value>,
    pub projects: BTreeMap<i64, Value>,
    /// Storage quota per project ID.
    pub quotas: BTreeMap<i64, i64>,
    pub policies: BTreeMap<i64, Value>,
    pub executions: Vec<i64>,
    /// `METHOD path` of every request, in order.
    pub requests: Vec<String>,
    /// `Authorization` header of the last request.
    pub last_auth: Option<String>,
    /// Status returned for every request when set.
    pub force_status: Option<u16>,
}

impl MockState {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Page size Harbor list endpoints use when none is requested.
pub const MOCK_DEFAULT_PAGE_SIZE: usize = 10;

/// Quota IDs are offset from project IDs so the two cannot be confused.
pub const QUOTA_ID_OFFSET: i64 = 1000;

type Shared = Arc<Mutex<MockState>>;

fn harbor_error(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({"errors": [{"code": code, "message": message}]})),
    )
        .into_response()
}

fn created(location: String) -> Response {
    (StatusCode::CREATED, [(header::LOCATION, location)]).into_response()
}

fn record(state: &Shared, headers: &HeaderMap, line: String) -> Option<Response> {
    let mut s = state.lock().unwrap();
    s.requests.push(line);
    s.last_auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    s.force_status.map(|code| {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, "forced failure").into_response()
    })
}

async fn list_registries(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(r) = record(&state, &headers, "GET /registries".to_string()) {
        return r;
    }
    let name = params
        .get("q")
        .and_then(|q| q.strip_prefix("name="))
        .unwrap_or_default()
        .to_string();
    let s = state.lock().unwrap();
    // Looser than Harbor: the client must still pick the exact name.
    let found: Vec<Value> = s
        .registries
        .values()
        .filter(|r| r["name"].as_str().is_some_and(|n| n.contains(&name)))
        .cloned()
        .collect();
    Json(found).into_response()
}

async fn create_registry(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(r) = record(&state, &headers, "POST /registries".to_string()) {
        return r;
    }
    let mut s = state.lock().unwrap();
    let name = body["name"].as_str().unwrap_or_default().to_string();
    if s.registries.values().any(|r| r["name"] == name.as_str()) {
        return harbor_error(StatusCode::CONFLICT, "CONFLICT", "registry already exists");
    }
    let id = s.id();
    let mut registry = body.clone();
    registry["id"] = json!(id);
    s.registries.insert(id, registry);
    created(format!("/api/v2.0/registries/{}", id))
}

async fn update_registry(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(r) = record(&state, &headers, format!("PUT /registries/{}", id)) {
        return r;
    }
    let mut s = state.lock().unwrap();
    let Some(registry) = s.registries.get_mut(&id) else {
        return harbor_error(StatusCode::NOT_FOUND, "NOT_FOUND", "registry not found");
    };
    if let (Some(target), Some(fields)) = (registry.as_object_mut(), body.as_object()) {
        for (k, v) in fields {
            target.insert(k.clone(), v.clone());
        }
    }
    StatusCode::OK.into_response()
}

async fn delete_registry(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Some(r) = record(&state, &headers, format!("DELETE /registries/{}", id)) {
        return r;
    }
    let mut s = state.lock().unwrap();
    match s.registries.remove(&id) {
        Some(_) => StatusCode::OK.into_response(),
        None => harbor_error(StatusCode::NOT_FOUND, "NOT_FOUND", "registry not found"),
    }
}

fn find_project(s: &MockState, key: &str, by_name: bool) -> Option<i64> {
    s.projects
        .iter()
        .find(|(id, p)| {
            if by_name {
                p["name"] == key
            } else {
                id.to_string() == key
            }
        })
        .map(|(id, _)| *id)
}

fn is_resource_name(headers: &HeaderMap) -> bool {
    headers
        .get("X-Is-Resource-Name")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "true")
}

async fn get_project(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Response {
    if let Some(r) = record(&state, &headers, format!("GET /projects/{}", key)) {
        return r;
    }
    let s = state.lock().unwrap();
    match find_project(&s, &key, is_resource_name(&headers)) {
        Some(id) => Json(s.projects[&id].clone()).into_response(),
        None => harbor_error(StatusCode::NOT_FOUND, "NOT_FOUND", "project not found"),
    }
}

async fn create_project(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(r) = record(&state, &headers, "POST /projects".to_string()) {
        return r;
    }
    let mut s = state.lock().unwrap();
    let name = body["project_name"].as_str().unwrap_or_default().to_string();
    if find_project(&s, &name, true).is_some() {
        return harbor_error(StatusCode::CONFLICT, "CONFLICT", "project already exists");
    }
    let id = s.id();
    let storage = body["storage_limit"].as_i64().unwrap_or(-1);
    s.quotas.insert(id, storage);
    s.projects.insert(
        id,
        json!({
            "project_id": id,
            "name": name,
            "registry_id": body["registry_id"],
            "metadata": body["metadata"],
        }),
    );
    created(format!("/api/v2.0/projects/{}", id))
}

async fn update_project(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(r) = record(&state, &headers, format!("PUT /projects/{}", key)) {
        return r;
    }
    let mut s = state.lock().unwrap();
    let Some(id) = find_project(&s, &key, false) else {
        return harbor_error(StatusCode::NOT_FOUND, "NOT_FOUND", "project not found");
    };
    if let Some(project) = s.projects.get_mut(&id) {
        project["registry_id"] = body["registry_id"].clone();
        project["metadata"] = body["metadata"].clone();
    }
    StatusCode::OK.into_response()
}

async fn delete_project(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Response {
    if let Some(r) = record(&state, &headers, format!("DELETE /projects/{}", key)) {
        return r;
    }
    let mut s = state.lock().unwrap();
    match find_project(&s, &key, is_resource_name(&headers)) {
        Some(id) => {
            s.projects.remove(&id);
            s.quotas.remove(&id);
            StatusCode::OK.into_response()
        }
        None => harbor_error(StatusCode::NOT_FOUND, "NOT_FOUND", "project not found"),
    }
}

async fn list_quotas(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(r) = record(&state, &headers, "GET /quotas".to_string()) {
        return r;
    }
    let s = state.lock().unwrap();
    let project_id: i64 = params
        .get("reference_id")
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    let found: Vec<Value> = s
        .quotas
        .get(&project_id)
        .map(|storage| {
            vec![json!({
                "id": project_id + QUOTA_ID_OFFSET,
                "ref": {"id": project_id},
                "hard": {"storage": storage},
            })]
        })
        .unwrap_or_default();
    Json(found).into_response()
}

async fn update_quota(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(r) = record(&state, &headers, format!("PUT /quotas/{}", id)) {
        return r;
    }
    let mut s = state.lock().unwrap();
    let project_id = id - QUOTA_ID_OFFSET;
    match (s.quotas.get_mut(&project_id), body["hard"]["storage"].as_i64()) {
        (Some(storage), Some(value)) => {
            *storage = value;
            StatusCode::OK.into_response()
        }
        (None, _) => harbor_error(StatusCode::NOT_FOUND, "NOT_FOUND", "quota not found"),
        (_, None) => harbor_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", "hard.storage required"),
    }
}

async fn list_policies(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(r) = record(&state, &headers, "GET /replication/policies".to_string()) {
        return r;
    }
    // `q=name=x` is exact, `q=name=~x` and the bare `name` parameter are fuzzy.
    let (name, exact) = match params.get("q").and_then(|q| q.strip_prefix("name=")) {
        Some(q) => match q.strip_prefix('~') {
            Some(fuzzy) => (fuzzy.to_string(), false),
            None => (q.to_string(), true),
        },
        None => (params.get("name").cloned().unwrap_or_default(), false),
    };
    let page: usize = params
        .get("page")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
        .max(1);
    let page_size: usize = params
        .get("page_size")
        .and_then(|v| v.parse().ok())
        .unwrap_or(MOCK_DEFAULT_PAGE_SIZE)
        .clamp(1, 100);

    let s = state.lock().unwrap();
    // Newest first, one page at a time.
    let found: Vec<Value> = s
        .policies
        .values()
        .rev()
        .filter(|p| {
            p["name"].as_str().is_some_and(|n| {
                if exact {
                    n == name
                } else {
                    n.contains(&name)
                }
            })
        })
        .skip((page - 1) * page_size)
        .take(page_size)
        .cloned()
        .collect();
    Json(found).into_response()
}

async fn create_policy(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(r) = record(&state, &headers, "POST /replication/policies".to_string()) {
        return r;
    }
    let mut s = state.lock().unwrap();
    if s.policies.values().any(|p| p["name"] == body["name"]) {
        return harbor_error(StatusCode::CONFLICT, "CONFLICT", "policy already exists");
    }
    let id = s.id();
    let mut policy = body.clone();
    policy["id"] = json!(id);
    s.policies.insert(id, policy);
    created(format!("/api/v2.0/replication/policies/{}", id))
}

async fn update_policy(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(r) = record(&state, &headers, format!("PUT /replication/policies/{}", id)) {
        return r;
    }
    let mut s = state.lock().unwrap();
    match s.policies.get_mut(&id) {
        Some(policy) => {
            let mut updated = body.clone();
            updated["id"] = json!(id);
            *policy = updated;
            StatusCode::OK.into_response()
        }
        None => harbor_error(StatusCode::NOT_FOUND, "NOT_FOUND", "policy not found"),
    }
}

async fn delete_policy(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Some(r) = record(&state, &headers, format!("DELETE /replication/policies/{}", id)) {
        return r;
    }
    let mut s = state.lock().unwrap();
    match s.policies.remove(&id) {
        Some(_) => StatusCode::OK.into_response(),
        None => harbor_error(StatusCode::NOT_FOUND, "NOT_FOUND", "policy not found"),
    }
}

async fn start_execution(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(r) = record(&state, &headers, "POST /replication/executions".to_string()) {
        return r;
    }
    let mut s = state.lock().unwrap();
    let Some(policy_id) = body["policy_id"].as_i64() else {
        return harbor_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", "policy_id required");
    };
    if !s.policies.contains_key(&policy_id) {
        return harbor_error(StatusCode::NOT_FOUND, "NOT_FOUND", "policy not found");
    }
    s.executions.push(policy_id);
    created(format!("/api/v2.0/replication/executions/{}", s.executions.len()))
}

fn router(state: Shared) -> Router {
    let api = Router::new()
        .route("/registries", get(list_registries).post(create_registry))
        .route("/registries/{id}", put(update_registry).delete(delete_registry))
        .route("/projects", post(create_project))
        .route(
            "/projects/{key}",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/quotas", get(list_quotas))
        .route("/quotas/{id}", put(update_quota))
        .route("/replication/policies", get(list_policies).post(create_policy))
        .route(
            "/replication/policies/{id}",
            put(update_policy).delete(delete_policy),
        )
        .route("/replication/executions", post(start_execution));
    Router::new().nest("/api/v2.0", api).with_state(state)
}

/// Mock Harbor API served on an ephemeral port.
pub struct MockHarbor {
    pub addr: SocketAddr,
    pub state: Shared,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockHarbor {
    pub async fn spawn() -> Self {
        let state: Shared = Arc::new(Mutex::new(MockState::default()));
        let app = router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Server error");
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Base URL as it would appear in `harborTarget.apiUrl`.
    pub fn api_url(&self) -> String {
        format!("http://{}/api/v2.0", self.addr)
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }
}

impl Drop for MockHarbor {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
