//! Request routing between the registry, readiness checks and the agent.

use crate::agent::AgentFactory;
use crate::error::Result;
use crate::readiness::{ReadinessError, ReadinessProber};
use crate::registry::{InstanceRegistry, RegistryError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What a user gets back for a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestOutcome {
    /// Consent is still missing; the prompt was not processed.
    NeedsAuth { authorization_url: String },
    Response { response: String },
}

/// Result of the post-consent callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuthorizationOutcome {
    Ready { attempts: u32 },
    /// Authorized, but the server did not answer its health check in time.
    PendingReadiness,
}

pub struct Orchestrator {
    registry: Arc<InstanceRegistry>,
    agents: Arc<dyn AgentFactory>,
    prober: ReadinessProber,
    readiness_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        agents: Arc<dyn AgentFactory>,
        prober: ReadinessProber,
        readiness_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            agents,
            prober,
            readiness_timeout,
        }
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Route a prompt: consent link for new users, agent answer otherwise.
    pub async fn handle_request(&self, user_id: &str, prompt: &str) -> Result<RequestOutcome> {
        let instance = self.registry.get_or_create(user_id).await?;
        if !instance.authorized {
            return Ok(RequestOutcome::NeedsAuth {
                authorization_url: instance.authorization_url,
            });
        }

        let server_url = match self.registry.server_url(user_id) {
            Ok(url) => url,
            // Revoked between the lookup and now.
            Err(RegistryError::NotAuthorized(_)) => {
                return Ok(RequestOutcome::NeedsAuth {
                    authorization_url: instance.authorization_url,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let agent = self.agents.bind(&server_url).await?;
        let response = agent.respond(prompt).await?;
        Ok(RequestOutcome::Response { response })
    }

    /// Post-OAuth callback: wait for the server, then open the gate.
    ///
    /// The user is marked authorized even when the health wait times out, since
    /// consent itself succeeded. The instance then stays flagged not ready and
    /// calling this again retries the health wait.
    pub async fn complete_authorization(&self, user_id: &str) -> Result<AuthorizationOutcome> {
        let server_url = self
            .registry
            .get(user_id)?
            .map(|instance| instance.server_url)
            .ok_or_else(|| RegistryError::NotFound(user_id.to_string()))?;

        let outcome = match self
            .prober
            .wait_until_ready(&server_url, self.readiness_timeout)
            .await
        {
            Ok(attempts) => AuthorizationOutcome::Ready { attempts },
            Err(ReadinessError::Timeout { attempts, waited, .. }) => {
                warn!(
                    user_id,
                    attempts,
                    ?waited,
                    "MCP server not ready after authorization"
                );
                AuthorizationOutcome::PendingReadiness
            }
            Err(e) => return Err(e.into()),
        };

        self.registry
            .set_ready(user_id, matches!(outcome, AuthorizationOutcome::Ready { .. }))?;
        self.registry.mark_authorized(user_id)?;
        info!(user_id, ?outcome, "Authorization complete");
        Ok(outcome)
    }
}
