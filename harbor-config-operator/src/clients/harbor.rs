//! Harbor API v2.0 client over reqwest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::model::{
    PolicySpec, ProjectMetadata, ProjectReq, ProjectUpdate, Quota, QuotaUpdate, RegistryCreate,
    RegistryUpdate, RemotePolicy, RemoteProject, RemoteRegistry, ResourceList,
    StartReplicationExecution,
};
use super::{ClientFactory, RemoteResourceClient, Result};
use crate::classify::classify_response;
use crate::config::ClientConfig;
use crate::desired::{ProjectDesired, RegistryDesired, UNLIMITED_QUOTA};
use crate::error::{ErrorKind, RemoteError};
use crate::target::{HarborEndpoint, Secret};

const RESOURCE_NAME_HEADER: &str = "X-Is-Resource-Name";

/// Largest page Harbor serves. List endpoints default to 10 per page.
const LIST_PAGE_SIZE: &str = "100";

/// Client for one Harbor instance.
#[derive(Clone)]
pub struct HarborClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    secret: Secret,
}

impl HarborClient {
    pub fn new(http: reqwest::Client, endpoint: &HarborEndpoint) -> Self {
        Self {
            http,
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            username: endpoint.username.clone(),
            secret: endpoint.secret.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(self.secret.expose()))
    }

    /// Send the request and turn any non-success status into a classified error.
    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_response(status, &body))
    }

    async fn get_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let response = self.send(req).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RemoteError::new(ErrorKind::Unknown, format!("decode response: {}", e)))
    }

    async fn send_json<B: Serialize + ?Sized>(&self, method: Method, path: &str, body: &B) -> Result<Response> {
        self.send(self.request(method, path).json(body)).await
    }

    /// ID of a newly created resource, taken from the `Location` header.
    fn created_id(response: &Response) -> Option<i64> {
        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|loc| loc.trim_end_matches('/').rsplit('/').next())
            .and_then(|id| id.parse().ok())
    }

    async fn find_quota_id(&self, project_id: i64) -> Result<i64> {
        let quotas: Vec<Quota> = self
            .get_json(
                self.request(Method::GET, "/quotas")
                    .query(&[("reference", "project".to_string()), ("reference_id", project_id.to_string())]),
            )
            .await?;
        quotas
            .first()
            .map(|q| q.id)
            .ok_or_else(|| RemoteError::not_found(format!("quota for project {}", project_id)))
    }

    async fn put_storage_quota(&self, project_id: i64, storage: i64) -> Result<()> {
        let quota_id = self.find_quota_id(project_id).await?;
        let body = QuotaUpdate {
            hard: ResourceList { storage },
        };
        self.send_json(Method::PUT, &format!("/quotas/{}", quota_id), &body)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteResourceClient for HarborClient {
    async fn lookup_registry_by_name(&self, name: &str) -> Result<RemoteRegistry> {
        debug!(registry = %name, "Looking up registry");
        let registries: Vec<RemoteRegistry> = self
            .get_json(
                self.request(Method::GET, "/registries").query(&[
                    ("q", format!("name={}", name)),
                    ("page_size", LIST_PAGE_SIZE.to_string()),
                ]),
            )
            .await?;
        registries
            .into_iter()
            .find(|r| r.name == name)
            .ok_or_else(|| RemoteError::not_found(format!("registry {}", name)))
    }

    async fn create_registry(&self, desired: &RegistryDesired) -> Result<RemoteRegistry> {
        debug!(registry = %desired.name, "Creating registry");
        let body = RegistryCreate {
            name: desired.name.clone(),
            kind: desired.kind.clone(),
            url: desired.url.clone(),
            description: desired.description.clone(),
            credential: desired.credential.clone(),
            insecure: false,
        };
        let response = self.send_json(Method::POST, "/registries", &body).await?;
        match Self::created_id(&response) {
            Some(id) => Ok(RemoteRegistry {
                id,
                name: desired.name.clone(),
                kind: desired.kind.clone(),
                url: desired.url.clone(),
                description: desired.description.clone(),
            }),
            None => self.lookup_registry_by_name(&desired.name).await,
        }
    }

    async fn update_registry(&self, id: i64, update: &RegistryUpdate) -> Result<()> {
        debug!(registry_id = id, "Updating registry");
        self.send_json(Method::PUT, &format!("/registries/{}", id), update)
            .await?;
        Ok(())
    }

    async fn delete_registry(&self, id: i64) -> Result<()> {
        debug!(registry_id = id, "Deleting registry");
        self.send(self.request(Method::DELETE, &format!("/registries/{}", id)))
            .await?;
        Ok(())
    }

    async fn lookup_project_by_name(&self, name: &str) -> Result<RemoteProject> {
        debug!(project = %name, "Looking up project");
        self.get_json(
            self.request(Method::GET, &format!("/projects/{}", name))
                .header(RESOURCE_NAME_HEADER, "true"),
        )
        .await
    }

    async fn create_project(&self, desired: &ProjectDesired, registry_id: i64) -> Result<RemoteProject> {
        debug!(project = %desired.name, registry_id, "Creating project");
        let body = ProjectReq {
            project_name: desired.name.clone(),
            metadata: ProjectMetadata::from_public(desired.public),
            storage_limit: desired.storage_quota.map(|q| q.as_limit()),
            registry_id: Some(registry_id),
        };
        let response = self.send_json(Method::POST, "/projects", &body).await?;
        match Self::created_id(&response) {
            Some(project_id) => Ok(RemoteProject {
                project_id,
                name: desired.name.clone(),
                registry_id: Some(registry_id),
            }),
            None => self.lookup_project_by_name(&desired.name).await,
        }
    }

    async fn update_project(&self, project_id: i64, update: &ProjectUpdate) -> Result<()> {
        debug!(project_id, "Updating project");
        if let Some(limit) = update.storage_limit {
            if limit < 0 {
                return Err(RemoteError::validation(format!(
                    "storage limit {} is not accepted by the project update; use the unlimited quota call",
                    limit
                )));
            }
        }

        let body = ProjectReq {
            project_name: update.name.clone(),
            metadata: ProjectMetadata::from_public(update.public),
            storage_limit: None,
            registry_id: Some(update.registry_id),
        };
        self.send_json(Method::PUT, &format!("/projects/{}", project_id), &body)
            .await?;

        if let Some(limit) = update.storage_limit {
            self.put_storage_quota(project_id, limit).await?;
        }
        Ok(())
    }

    async fn set_unlimited_quota(&self, project_id: i64) -> Result<()> {
        debug!(project_id, "Setting unlimited storage quota");
        self.put_storage_quota(project_id, UNLIMITED_QUOTA).await
    }

    async fn delete_project(&self, name_or_id: &str) -> Result<()> {
        debug!(project = %name_or_id, "Deleting project");
        let mut req = self.request(Method::DELETE, &format!("/projects/{}", name_or_id));
        if name_or_id.parse::<i64>().is_err() {
            req = req.header(RESOURCE_NAME_HEADER, "true");
        }
        self.send(req).await?;
        Ok(())
    }

    async fn lookup_policy_by_name(&self, name: &str) -> Result<RemotePolicy> {
        debug!(policy = %name, "Looking up replication policy");
        // `name=` alone is a fuzzy filter; `q=name=` matches exactly.
        let policies: Vec<RemotePolicy> = self
            .get_json(self.request(Method::GET, "/replication/policies").query(&[
                ("q", format!("name={}", name)),
                ("page_size", LIST_PAGE_SIZE.to_string()),
            ]))
            .await?;
        policies
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| RemoteError::not_found(format!("replication policy {}", name)))
    }

    async fn create_policy(&self, policy: &PolicySpec) -> Result<RemotePolicy> {
        debug!(policy = %policy.name, "Creating replication policy");
        let response = self
            .send_json(Method::POST, "/replication/policies", policy)
            .await?;
        match Self::created_id(&response) {
            Some(id) => Ok(RemotePolicy {
                id,
                name: policy.name.clone(),
            }),
            None => self.lookup_policy_by_name(&policy.name).await,
        }
    }

    async fn update_policy(&self, id: i64, policy: &PolicySpec) -> Result<()> {
        debug!(policy_id = id, "Updating replication policy");
        self.send_json(Method::PUT, &format!("/replication/policies/{}", id), policy)
            .await?;
        Ok(())
    }

    async fn delete_policy(&self, id: i64) -> Result<()> {
        debug!(policy_id = id, "Deleting replication policy");
        self.send(self.request(Method::DELETE, &format!("/replication/policies/{}", id)))
            .await?;
        Ok(())
    }

    async fn trigger_execution(&self, policy_id: i64) -> Result<()> {
        debug!(policy_id, "Triggering replication execution");
        let body = StartReplicationExecution { policy_id };
        self.send_json(Method::POST, "/replication/executions", &body)
            .await?;
        Ok(())
    }
}

/// Builds [`HarborClient`]s that share one connection pool.
#[derive(Clone)]
pub struct HarborClientFactory {
    http: reqwest::Client,
}

impl HarborClientFactory {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout.min(config.request_timeout))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .user_agent(concat!("harbor-config-operator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Self::new(&ClientConfig {
            request_timeout: timeout,
            ..Default::default()
        })
    }
}

impl ClientFactory for HarborClientFactory {
    fn client_for(&self, endpoint: &HarborEndpoint) -> Result<Arc<dyn RemoteResourceClient>> {
        if !endpoint.url.starts_with("http://") && !endpoint.url.starts_with("https://") {
            return Err(RemoteError::validation(format!(
                "harbor API URL must be http(s): {}",
                endpoint.url
            )));
        }
        Ok(Arc::new(HarborClient::new(self.http.clone(), endpoint)))
    }
}
