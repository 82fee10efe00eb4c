//! Ledger Store - persisted record of applied migrations
//!
//! One document per applied unit, keyed by the unit id so that recording is a
//! single atomic insert. The ledger never stores anything but identifiers.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::definitions::LedgerEntry;
use crate::error::{MigrationError, MigrationResult, StoreError};
use crate::store::{id_filter, Document, DocumentStore, Filter};

/// Ledger of applied migrations backed by one collection
#[derive(Clone)]
pub struct LedgerStore {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl LedgerStore {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Read every ledger entry, ascending by migration id
    ///
    /// A missing ledger collection means nothing has been applied yet.
    pub async fn get_applied(&self) -> MigrationResult<Vec<LedgerEntry>> {
        let documents = self
            .store
            .find(&self.collection, &Filter::new())
            .await
            .map_err(MigrationError::Ledger)?;

        let mut entries = documents
            .iter()
            .map(parse_entry)
            .collect::<Result<Vec<_>, _>>()
            .map_err(MigrationError::Ledger)?;
        entries.sort_by(|a, b| a.migration_id.cmp(&b.migration_id));
        Ok(entries)
    }

    /// The applied-set as ids
    pub async fn applied_ids(&self) -> MigrationResult<BTreeSet<String>> {
        Ok(self
            .get_applied()
            .await?
            .into_iter()
            .map(|entry| entry.migration_id)
            .collect())
    }

    /// Record `id` as applied
    pub async fn record_applied(
        &self,
        id: &str,
        applied_at: DateTime<Utc>,
        batch: i64,
    ) -> MigrationResult<()> {
        let mut document = Document::new();
        document.insert("_id".to_string(), Value::from(id));
        document.insert("migration_id".to_string(), Value::from(id));
        document.insert("applied_at".to_string(), Value::from(applied_at.to_rfc3339()));
        document.insert("batch".to_string(), Value::from(batch));

        match self.store.insert_one(&self.collection, document).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_duplicate_key() => {
                Err(MigrationError::DuplicateApply { id: id.to_string() })
            }
            Err(err) => Err(MigrationError::Ledger(err)),
        }
    }

    /// Remove the entry for `id`; absent entries are ignored
    pub async fn record_reverted(&self, id: &str) -> MigrationResult<()> {
        let removed = self
            .store
            .delete_one(&self.collection, &id_filter(id))
            .await
            .map_err(MigrationError::Ledger)?;
        if !removed {
            tracing::debug!(id = %id, "no ledger entry to remove");
        }
        Ok(())
    }

    /// Highest batch number recorded, zero for an empty ledger
    pub async fn latest_batch(&self) -> MigrationResult<i64> {
        Ok(self
            .get_applied()
            .await?
            .iter()
            .map(|entry| entry.batch)
            .max()
            .unwrap_or(0))
    }
}

fn parse_entry(document: &Document) -> Result<LedgerEntry, StoreError> {
    let invalid = |field: &str| {
        StoreError::InvalidDocument(format!(
            "ledger document {} has no valid '{}'",
            document.get("_id").map(Value::to_string).unwrap_or_default(),
            field
        ))
    };

    let migration_id = document
        .get("migration_id")
        .or_else(|| document.get("_id"))
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("migration_id"))?
        .to_string();
    let applied_at = document
        .get("applied_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .ok_or_else(|| invalid("applied_at"))?
        .with_timezone(&Utc);
    let batch = document
        .get("batch")
        .and_then(Value::as_i64)
        .ok_or_else(|| invalid("batch"))?;

    Ok(LedgerEntry {
        migration_id,
        applied_at,
        batch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn ledger() -> (Arc<MemoryStore>, LedgerStore) {
        let store = Arc::new(MemoryStore::new());
        let ledger = LedgerStore::new(store.clone(), "docshift_migrations");
        (store, ledger)
    }

    #[tokio::test]
    async fn test_empty_ledger_bootstrap() {
        let (store, ledger) = ledger();
        assert!(ledger.get_applied().await.unwrap().is_empty());
        assert_eq!(ledger.latest_batch().await.unwrap(), 0);
        assert!(!store.collection_exists("docshift_migrations").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_applied_and_reverted() {
        let (_store, ledger) = ledger();
        let now = Utc::now();

        ledger.record_applied("20250102-b", now, 1).await.unwrap();
        ledger.record_applied("20250101-a", now, 1).await.unwrap();

        let entries = ledger.get_applied().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].migration_id, "20250101-a");
        assert_eq!(entries[0].batch, 1);
        assert_eq!(entries[0].applied_at.timestamp(), now.timestamp());

        ledger.record_reverted("20250102-b").await.unwrap();
        let ids = ledger.applied_ids().await.unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["20250101-a".to_string()]);
    }

    #[tokio::test]
    async fn test_record_applied_twice_is_duplicate_apply() {
        let (_store, ledger) = ledger();
        ledger.record_applied("20250101-a", Utc::now(), 1).await.unwrap();

        let err = ledger.record_applied("20250101-a", Utc::now(), 2).await.unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateApply { id } if id == "20250101-a"));
        assert_eq!(ledger.latest_batch().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_reverted_absent_is_noop() {
        let (_store, ledger) = ledger();
        ledger.record_reverted("20250101-a").await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_ledger_error() {
        let (store, ledger) = ledger();
        let Value::Object(document) = json!({"_id": "20250101-a", "batch": "one"}) else {
            unreachable!()
        };
        store.insert_one("docshift_migrations", document).await.unwrap();

        let err = ledger.get_applied().await.unwrap_err();
        assert!(matches!(err, MigrationError::Ledger(StoreError::InvalidDocument(_))));
    }
}
