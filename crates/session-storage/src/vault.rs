//! High-level API for the persisted session.

use crate::{SecureStorage, StorageError, StorageKeys, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// Persists one serialized session per Supabase project.
pub struct SessionVault {
    storage: Box<dyn SecureStorage>,
    key: String,
}

impl SessionVault {
    /// Create a vault for `project_ref` over the given storage backend
    pub fn new(storage: Box<dyn SecureStorage>, project_ref: &str) -> Self {
        Self {
            storage,
            key: StorageKeys::session_for_project(project_ref),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn store_session<T: Serialize>(&self, session: &T) -> StorageResult<()> {
        let json =
            serde_json::to_string(session).map_err(|e| StorageError::Encoding(e.to_string()))?;
        self.storage.set(&self.key, &json)?;
        debug!(key = %self.key, "Session persisted");
        Ok(())
    }

    /// Load the stored session. An undecodable entry is deleted and reported
    /// as absent.
    pub fn load_session<T: DeserializeOwned>(&self) -> StorageResult<Option<T>> {
        let Some(json) = self.storage.get(&self.key)? else {
            return Ok(None);
        };

        match serde_json::from_str(&json) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Discarding unreadable persisted session");
                self.storage.delete(&self.key)?;
                Ok(None)
            }
        }
    }

    /// Remove the stored session. Returns false when none was stored.
    pub fn clear_session(&self) -> StorageResult<bool> {
        let removed = self.storage.delete(&self.key)?;
        if removed {
            debug!(key = %self.key, "Persisted session cleared");
        }
        Ok(removed)
    }

    pub fn has_session(&self) -> StorageResult<bool> {
        self.storage.has(&self.key)
    }
}
