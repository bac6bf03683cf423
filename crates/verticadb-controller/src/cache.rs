//! Per-VerticaDB cache of values that are costly to fetch on every call.
//!
//! Entries are keyed by the VerticaDB uid. The map lock is only held to
//! look up or insert an entry; fetching happens under the entry's own lock,
//! so two databases never wait on each other.

use crate::error::{ControllerError, Result};
use crate::traits::ObjectClient;
use crate::types::DatabaseTarget;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use verticadb_core::ObjectKey;

/// Key of the superuser password in the password Secret
pub const SUPERUSER_PASSWORD_KEY: &str = "password";

#[derive(Debug, Default)]
struct CacheEntry {
    password: Option<String>,
}

pub struct CacheManager {
    client: Arc<dyn ObjectClient>,
    entries: RwLock<HashMap<String, Arc<Mutex<CacheEntry>>>>,
}

impl CacheManager {
    pub fn new(client: Arc<dyn ObjectClient>) -> Self {
        Self {
            client,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create the entry for a database if it does not exist yet
    pub async fn init(&self, uid: &str) {
        self.entry(uid).await;
    }

    async fn entry(&self, uid: &str) -> Arc<Mutex<CacheEntry>> {
        if let Some(entry) = self.entries.read().await.get(uid) {
            return entry.clone();
        }
        self.entries
            .write()
            .await
            .entry(uid.to_string())
            .or_default()
            .clone()
    }

    /// Superuser password for the database. Empty when no Secret is set.
    pub async fn get_or_fetch_password(&self, db: &DatabaseTarget) -> Result<String> {
        let Some(secret_name) = db.password_secret.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(String::new());
        };
        let entry = self.entry(&db.uid).await;
        let mut entry = entry.lock().await;
        if let Some(password) = &entry.password {
            return Ok(password.clone());
        }

        let key = ObjectKey::new(db.vdb.namespace.clone(), secret_name);
        let secret = self.client.get_secret(&key).await?;
        let raw = secret
            .data
            .as_ref()
            .and_then(|d| d.get(SUPERUSER_PASSWORD_KEY))
            .ok_or_else(|| {
                ControllerError::internal_error(format!(
                    "Secret {} has no {} key",
                    key, SUPERUSER_PASSWORD_KEY
                ))
            })?;
        let password = String::from_utf8(raw.0.clone()).map_err(|e| {
            ControllerError::internal_error(format!("Password in Secret {} is not UTF-8: {}", key, e))
        })?;
        debug!("Cached superuser password for {}", db.vdb);
        entry.password = Some(password.clone());
        Ok(password)
    }

    /// Drop everything cached for a database
    pub async fn destroy(&self, uid: &str) {
        if self.entries.write().await.remove(uid).is_some() {
            debug!("Dropped cache entry {}", uid);
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
