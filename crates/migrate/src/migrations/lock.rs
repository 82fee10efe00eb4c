//! Run lock - serializes migration runs against one database
//!
//! The lock is a single document keyed by a fixed name; acquiring it is one
//! atomic insert, so two runs can never both hold it.

use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{MigrationError, MigrationResult};
use crate::store::{id_filter, DocumentStore};

pub struct RunLock {
    store: Arc<dyn DocumentStore>,
    collection: String,
    name: String,
}

/// Proof that the lock is held; pass it back to `RunLock::release`
#[derive(Debug)]
#[must_use = "the run lock stays held until released"]
pub struct LockGuard {
    owner: String,
}

impl LockGuard {
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl RunLock {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            name: name.into(),
        }
    }

    /// Take the lock on behalf of `owner`
    pub async fn acquire(&self, owner: &str) -> MigrationResult<LockGuard> {
        let mut document = Map::new();
        document.insert("_id".to_string(), Value::String(self.name.clone()));
        document.insert("owner".to_string(), Value::String(owner.to_string()));
        document.insert(
            "acquired_at".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );

        match self.store.insert_one(&self.collection, document).await {
            Ok(()) => {
                tracing::debug!(lock = %self.name, owner = %owner, "acquired run lock");
                Ok(LockGuard {
                    owner: owner.to_string(),
                })
            }
            Err(err) if err.is_duplicate_key() => Err(self.held_error().await),
            Err(err) => Err(err.into()),
        }
    }

    /// Release a lock taken by `acquire`
    pub async fn release(&self, guard: LockGuard) -> MigrationResult<()> {
        let mut filter = id_filter(self.name.as_str());
        filter.insert("owner".to_string(), Value::String(guard.owner.clone()));

        if !self.store.delete_one(&self.collection, &filter).await? {
            tracing::warn!(lock = %self.name, owner = %guard.owner, "run lock was already released");
        }
        Ok(())
    }

    /// Remove the lock regardless of owner, e.g. after a killed run
    pub async fn force_release(&self) -> MigrationResult<bool> {
        let removed = self
            .store
            .delete_one(&self.collection, &id_filter(self.name.as_str()))
            .await?;
        if removed {
            tracing::warn!(lock = %self.name, "run lock force-released");
        }
        Ok(removed)
    }

    async fn held_error(&self) -> MigrationError {
        let holder = self
            .store
            .find_one(&self.collection, &id_filter(self.name.as_str()))
            .await
            .ok()
            .flatten();
        let field = |key: &str| {
            holder
                .as_ref()
                .and_then(|doc| doc.get(key))
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string()
        };

        MigrationError::LockHeld {
            name: self.name.clone(),
            owner: field("owner"),
            acquired_at: field("acquired_at"),
        }
    }
}
