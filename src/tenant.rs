//! Organizations, projects, apps and API keys (`/tenant/*`).

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::http::HttpClient;
use crate::types::{Ack, ApiKey, App, Organization, Project};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationInput {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

pub struct TenantClient {
    http: Arc<HttpClient>,
}

impl TenantClient {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    pub async fn list_organizations(&self) -> Result<Vec<Organization>> {
        self.http.get("/tenant/organizations", &[]).await
    }

    pub async fn get_organization(&self, id: &str) -> Result<Organization> {
        self.http
            .get(&format!("/tenant/organizations/{}", urlencoding::encode(id)), &[])
            .await
    }

    pub async fn create_organization(&self, input: OrganizationInput) -> Result<Organization> {
        self.http.post("/tenant/organizations", &input).await
    }

    pub async fn update_organization(
        &self,
        id: &str,
        input: OrganizationInput,
    ) -> Result<Organization> {
        self.http
            .put(&format!("/tenant/organizations/{}", urlencoding::encode(id)), &input)
            .await
    }

    pub async fn delete_organization(&self, id: &str) -> Result<Ack> {
        self.http
            .delete(&format!("/tenant/organizations/{}", urlencoding::encode(id)))
            .await
    }

    pub async fn list_projects(&self, organization_id: &str) -> Result<Vec<Project>> {
        self.http
            .get(
                "/tenant/projects",
                &[("organizationId", organization_id.to_string())],
            )
            .await
    }

    pub async fn create_project(
        &self,
        organization_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project> {
        let mut body = json!({ "organizationId": organization_id, "name": name });
        if let Some(description) = description {
            body["description"] = Value::from(description);
        }
        self.http.post("/tenant/projects", &body).await
    }

    pub async fn delete_project(&self, id: &str) -> Result<Ack> {
        self.http
            .delete(&format!("/tenant/projects/{}", urlencoding::encode(id)))
            .await
    }

    pub async fn list_apps(&self, project_id: &str) -> Result<Vec<App>> {
        self.http
            .get("/tenant/apps", &[("projectId", project_id.to_string())])
            .await
    }

    pub async fn create_app(&self, project_id: &str, name: &str, platform: &str) -> Result<App> {
        self.http
            .post(
                "/tenant/apps",
                &json!({ "projectId": project_id, "name": name, "platform": platform }),
            )
            .await
    }

    pub async fn list_api_keys(&self) -> Result<Vec<ApiKey>> {
        self.http.get("/tenant/api-keys", &[]).await
    }

    /// The returned key carries the secret; it is not retrievable later.
    pub async fn create_api_key(&self, name: &str, scopes: &[&str]) -> Result<ApiKey> {
        self.http
            .post("/tenant/api-keys", &json!({ "name": name, "scopes": scopes }))
            .await
    }

    pub async fn revoke_api_key(&self, id: &str) -> Result<Ack> {
        self.http
            .delete(&format!("/tenant/api-keys/{}", urlencoding::encode(id)))
            .await
    }
}
