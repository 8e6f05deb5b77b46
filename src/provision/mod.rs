//! Per-user MCP server provisioning.
//!
//! The provisioning service creates one hosted Gmail MCP server per user and
//! hands back its endpoint. The OAuth consent URL for that server is built
//! locally from the instance id and our client id.

use crate::config::{ProvisioningConfig, ProvisioningCredentials};
use crate::http::{HttpClient, HttpError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CREATE_INSTANCE_PATH: &str = "/mcp-server/instance/create";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("Provisioning response is missing `{0}`")]
    MissingField(&'static str),
}

/// Endpoint and identifier of a freshly created server instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInstance {
    pub instance_id: String,
    pub server_url: String,
}

/// Creates remote server instances.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create_instance(&self, user_id: &str) -> Result<ServerInstance, ProvisionError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateInstanceRequest<'a> {
    server_name: &'a str,
    user_id: &'a str,
    platform_name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateInstanceResponse {
    #[serde(default)]
    server_url: Option<String>,
    #[serde(default)]
    instance_id: Option<String>,
}

/// Klavis provisioning API client.
#[derive(Debug)]
pub struct KlavisClient {
    http: HttpClient,
    server_name: String,
    platform_name: String,
}

impl KlavisClient {
    pub fn new(config: &ProvisioningConfig, api_key: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(&config.api_base, api_key),
            server_name: config.server_name.clone(),
            platform_name: config.platform_name.clone(),
        }
    }
}

#[async_trait]
impl Provisioner for KlavisClient {
    async fn create_instance(&self, user_id: &str) -> Result<ServerInstance, ProvisionError> {
        let request = CreateInstanceRequest {
            server_name: &self.server_name,
            user_id,
            platform_name: &self.platform_name,
        };
        let response: CreateInstanceResponse =
            self.http.post_json(CREATE_INSTANCE_PATH, &request).await?;

        let server_url = response
            .server_url
            .filter(|s| !s.is_empty())
            .ok_or(ProvisionError::MissingField("serverUrl"))?;
        let instance_id = response
            .instance_id
            .filter(|s| !s.is_empty())
            .ok_or(ProvisionError::MissingField("instanceId"))?;

        Ok(ServerInstance {
            instance_id,
            server_url,
        })
    }
}

/// Builds white-labeled OAuth consent URLs. Pure; never touches the network.
#[derive(Debug, Clone)]
pub struct AuthorizationUrlBuilder {
    oauth_host: String,
    service: String,
    client_id: String,
}

impl AuthorizationUrlBuilder {
    pub fn new(
        oauth_host: impl Into<String>,
        service: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            oauth_host: oauth_host.into(),
            service: service.into(),
            client_id: client_id.into(),
        }
    }

    pub fn from_config(config: &ProvisioningConfig, credentials: &ProvisioningCredentials) -> Self {
        Self::new(
            &config.oauth_host,
            &config.oauth_service,
            &credentials.client_id,
        )
    }

    #[must_use]
    pub fn build(&self, instance_id: &str) -> String {
        format!(
            "https://{}/oauth/{}/authorize?instance_id={}&client_id={}",
            self.oauth_host,
            self.service,
            urlencoding::encode(instance_id),
            urlencoding::encode(&self.client_id),
        )
    }
}
