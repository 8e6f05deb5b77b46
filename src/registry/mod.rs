//! Per-user instance registry.
//!
//! Single source of truth for which users have a provisioned MCP server and
//! whether they have completed OAuth consent for it. Creation is
//! get-or-create and serialized per user, so concurrent first requests for
//! the same user provision exactly one remote instance.

mod sqlite;
mod store;

pub use sqlite::SqliteStore;
pub use store::{InstanceStore, MemoryStore, StoreError};

use crate::provision::{AuthorizationUrlBuilder, ProvisionError, Provisioner, ServerInstance};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Provisioning failed for user {user_id}: {source}")]
    Provisioning {
        user_id: String,
        #[source]
        source: ProvisionError,
    },

    #[error("User {0} has not authorized Gmail access")]
    NotAuthorized(String),

    #[error("No instance registered for user {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Provisioned server state for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInstance {
    pub user_id: String,
    pub server_url: String,
    pub instance_id: String,
    pub authorization_url: String,
    pub authorized: bool,
    /// Whether the server answered its health check after consent. Stays
    /// `false` after a timeout until a later check succeeds.
    pub ready: bool,
    pub created_at: DateTime<Utc>,
}

impl UserInstance {
    fn new(user_id: &str, server: ServerInstance, authorization_url: String) -> Self {
        Self {
            user_id: user_id.to_string(),
            server_url: server.server_url,
            instance_id: server.instance_id,
            authorization_url,
            authorized: false,
            ready: false,
            created_at: Utc::now(),
        }
    }

    #[cfg(test)]
    pub(crate) fn sample(user_id: &str, instance_id: &str) -> Self {
        Self::new(
            user_id,
            ServerInstance {
                instance_id: instance_id.to_string(),
                server_url: format!("https://mcp.example.com/{instance_id}"),
            },
            format!("https://auth.example.com/oauth/gmail/authorize?instance_id={instance_id}"),
        )
    }
}

type CreationGuard = Arc<tokio::sync::Mutex<()>>;

/// One caller's stake in a user's creation guard. The map entry is dropped
/// with the last stake, including when the owning future is cancelled.
struct InFlight<'a> {
    map: &'a Mutex<HashMap<String, CreationGuard>>,
    user_id: &'a str,
    guard: CreationGuard,
}

impl<'a> InFlight<'a> {
    fn enter(map: &'a Mutex<HashMap<String, CreationGuard>>, user_id: &'a str) -> Self {
        let mut in_flight = map.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let guard = Arc::clone(in_flight.entry(user_id.to_string()).or_default());
        Self {
            map,
            user_id,
            guard,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let guard = std::mem::take(&mut self.guard);
        let mut in_flight = self
            .map
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // Stakes are only taken and dropped under this lock: one for the map, one for us.
        if Arc::strong_count(&guard) == 2 {
            in_flight.remove(self.user_id);
        }
        drop(guard);
    }
}

pub struct InstanceRegistry {
    store: Arc<dyn InstanceStore>,
    provisioner: Arc<dyn Provisioner>,
    auth_urls: AuthorizationUrlBuilder,
    /// Per-user locks held while a provisioning call is in flight.
    in_flight: Mutex<HashMap<String, CreationGuard>>,
}

impl InstanceRegistry {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        provisioner: Arc<dyn Provisioner>,
        auth_urls: AuthorizationUrlBuilder,
    ) -> Self {
        Self {
            store,
            provisioner,
            auth_urls,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Return the user's instance, provisioning one on first use.
    ///
    /// Nothing is stored when provisioning fails, so the next call retries.
    pub async fn get_or_create(&self, user_id: &str) -> Result<UserInstance, RegistryError> {
        if let Some(existing) = self.store.get(user_id)? {
            return Ok(existing);
        }

        let entry = InFlight::enter(&self.in_flight, user_id);
        let _held = entry.guard.lock().await;
        self.create_locked(user_id).await
    }

    async fn create_locked(&self, user_id: &str) -> Result<UserInstance, RegistryError> {
        // Another caller may have finished while we waited for the guard.
        if let Some(existing) = self.store.get(user_id)? {
            return Ok(existing);
        }

        let server = self
            .provisioner
            .create_instance(user_id)
            .await
            .map_err(|source| RegistryError::Provisioning {
                user_id: user_id.to_string(),
                source,
            })?;

        let authorization_url = self.auth_urls.build(&server.instance_id);
        let instance = self
            .store
            .insert_if_absent(UserInstance::new(user_id, server, authorization_url))?;

        info!(
            user_id,
            instance_id = %instance.instance_id,
            authorization_url = %instance.authorization_url,
            "Provisioned Gmail MCP instance"
        );
        Ok(instance)
    }

    /// Record that the user completed OAuth consent.
    pub fn mark_authorized(&self, user_id: &str) -> Result<(), RegistryError> {
        if !self.store.set_authorized(user_id, true)? {
            return Err(RegistryError::NotFound(user_id.to_string()));
        }
        info!(user_id, "Marked Gmail access authorized");
        Ok(())
    }

    /// Record whether the server answered its post-consent health check.
    pub fn set_ready(&self, user_id: &str, ready: bool) -> Result<(), RegistryError> {
        if !self.store.set_ready(user_id, ready)? {
            return Err(RegistryError::NotFound(user_id.to_string()));
        }
        Ok(())
    }

    /// Reset the authorized flag, e.g. after the user revoked access upstream.
    ///
    /// The request flow never calls this.
    pub fn revoke(&self, user_id: &str) -> Result<(), RegistryError> {
        if !self.store.set_authorized(user_id, false)? {
            return Err(RegistryError::NotFound(user_id.to_string()));
        }
        info!(user_id, "Revoked Gmail authorization");
        Ok(())
    }

    /// `false` for unknown users and on store failure.
    pub fn is_authorized(&self, user_id: &str) -> bool {
        match self.store.get(user_id) {
            Ok(instance) => instance.is_some_and(|i| i.authorized),
            Err(e) => {
                warn!(user_id, "Instance lookup failed: {e}");
                false
            }
        }
    }

    /// The user's server URL, only once they have authorized.
    pub fn server_url(&self, user_id: &str) -> Result<String, RegistryError> {
        match self.store.get(user_id)? {
            Some(instance) if instance.authorized => Ok(instance.server_url),
            _ => Err(RegistryError::NotAuthorized(user_id.to_string())),
        }
    }

    pub fn get(&self, user_id: &str) -> Result<Option<UserInstance>, RegistryError> {
        Ok(self.store.get(user_id)?)
    }

    pub fn list(&self) -> Result<Vec<UserInstance>, RegistryError> {
        Ok(self.store.list()?)
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests;
