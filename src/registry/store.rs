//! Storage backends for per-user instance records.

use super::UserInstance;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Keyed storage for [`UserInstance`] records.
///
/// Implementations never overwrite an existing record on insert; only the
/// `authorized` and `ready` flags change after creation.
pub trait InstanceStore: Send + Sync {
    fn get(&self, user_id: &str) -> Result<Option<UserInstance>, StoreError>;

    /// Store `instance` unless the user already has a record. Returns whichever
    /// record is stored afterwards.
    fn insert_if_absent(&self, instance: UserInstance) -> Result<UserInstance, StoreError>;

    /// Returns `false` when the user has no record.
    fn set_authorized(&self, user_id: &str, authorized: bool) -> Result<bool, StoreError>;

    /// Returns `false` when the user has no record.
    fn set_ready(&self, user_id: &str, ready: bool) -> Result<bool, StoreError>;

    fn list(&self) -> Result<Vec<UserInstance>, StoreError>;
}

/// In-memory store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    instances: RwLock<HashMap<String, UserInstance>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstanceStore for MemoryStore {
    fn get(&self, user_id: &str) -> Result<Option<UserInstance>, StoreError> {
        let instances = self.instances.read().map_err(|_| StoreError::Poisoned)?;
        Ok(instances.get(user_id).cloned())
    }

    fn insert_if_absent(&self, instance: UserInstance) -> Result<UserInstance, StoreError> {
        let mut instances = self.instances.write().map_err(|_| StoreError::Poisoned)?;
        let stored = instances
            .entry(instance.user_id.clone())
            .or_insert(instance);
        Ok(stored.clone())
    }

    fn set_authorized(&self, user_id: &str, authorized: bool) -> Result<bool, StoreError> {
        let mut instances = self.instances.write().map_err(|_| StoreError::Poisoned)?;
        match instances.get_mut(user_id) {
            Some(instance) => {
                instance.authorized = authorized;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn set_ready(&self, user_id: &str, ready: bool) -> Result<bool, StoreError> {
        let mut instances = self.instances.write().map_err(|_| StoreError::Poisoned)?;
        let Some(instance) = instances.get_mut(user_id) else {
            return Ok(false);
        };
        instance.ready = ready;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<UserInstance>, StoreError> {
        let instances = self.instances.read().map_err(|_| StoreError::Poisoned)?;
        let mut all: Vec<_> = instances.values().cloned().collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(all)
    }
}
