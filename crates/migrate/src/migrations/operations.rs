//! Declarative migration operations
//!
//! File-based units describe their `up` and `down` bodies as lists of
//! operations, executed in order against the document store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::store::{Document, DocumentStore, Filter, IndexSpec, Update};

use super::definitions::{Migration, Reversibility};

/// One database primitive invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateCollection {
        collection: String,
    },
    DropCollection {
        collection: String,
    },
    CreateIndex {
        collection: String,
        #[serde(flatten)]
        index: IndexSpec,
    },
    DropIndex {
        collection: String,
        name: String,
    },
    InsertDocuments {
        collection: String,
        documents: Vec<Document>,
    },
    UpdateDocuments {
        collection: String,
        #[serde(default)]
        filter: Filter,
        #[serde(flatten)]
        update: Update,
    },
    DeleteDocuments {
        collection: String,
        #[serde(default)]
        filter: Filter,
    },
}

impl Operation {
    /// Run this operation against `db`
    pub async fn apply(&self, db: &dyn DocumentStore) -> StoreResult<()> {
        match self {
            Operation::CreateCollection { collection } => db.create_collection(collection).await,
            Operation::DropCollection { collection } => db.drop_collection(collection).await,
            Operation::CreateIndex { collection, index } => db.create_index(collection, index).await,
            Operation::DropIndex { collection, name } => db.drop_index(collection, name).await,
            Operation::InsertDocuments {
                collection,
                documents,
            } => {
                for document in documents {
                    db.insert_one(collection, document.clone()).await?;
                }
                Ok(())
            }
            Operation::UpdateDocuments {
                collection,
                filter,
                update,
            } => {
                if update.is_empty() {
                    return Err(StoreError::InvalidDocument(format!(
                        "update on '{}' sets and unsets nothing",
                        collection
                    )));
                }
                let matched = db.update_many(collection, filter, update).await?;
                tracing::debug!(collection = %collection, matched, "updated documents");
                Ok(())
            }
            Operation::DeleteDocuments { collection, filter } => {
                let deleted = db.delete_many(collection, filter).await?;
                tracing::debug!(collection = %collection, deleted, "deleted documents");
                Ok(())
            }
        }
    }

    /// Short label for logs
    pub fn describe(&self) -> String {
        match self {
            Operation::CreateCollection { collection } => format!("create collection {}", collection),
            Operation::DropCollection { collection } => format!("drop collection {}", collection),
            Operation::CreateIndex { collection, index } => {
                format!("create index {} on {}", index.name, collection)
            }
            Operation::DropIndex { collection, name } => format!("drop index {} on {}", name, collection),
            Operation::InsertDocuments {
                collection,
                documents,
            } => format!("insert {} document(s) into {}", documents.len(), collection),
            Operation::UpdateDocuments { collection, .. } => format!("update documents in {}", collection),
            Operation::DeleteDocuments { collection, .. } => format!("delete documents from {}", collection),
        }
    }
}

/// A migration unit whose bodies are operation lists
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedMigration {
    pub id: String,
    pub description: Option<String>,
    pub reversibility: Reversibility,
    pub up: Vec<Operation>,
    pub down: Vec<Operation>,
}

impl ScriptedMigration {
    /// Create a reversible unit with empty bodies
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            reversibility: Reversibility::Reversible,
            up: Vec::new(),
            down: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append an operation to the `up` body
    pub fn on_up(mut self, operation: Operation) -> Self {
        self.up.push(operation);
        self
    }

    /// Append an operation to the `down` body
    pub fn on_down(mut self, operation: Operation) -> Self {
        self.down.push(operation);
        self
    }

    /// Mark the unit irreversible, discarding any `down` operations
    pub fn irreversible(mut self, reason: impl Into<String>) -> Self {
        self.reversibility = Reversibility::irreversible(reason);
        self.down.clear();
        self
    }

    /// Check the bodies agree with the declared reversibility
    pub fn validate(&self) -> Result<(), String> {
        match &self.reversibility {
            Reversibility::Reversible if self.down.is_empty() && !self.up.is_empty() => Err(
                "reversible migration has no down operations; declare it irreversible with a reason"
                    .to_string(),
            ),
            Reversibility::Irreversible { reason } if reason.trim().is_empty() => {
                Err("irreversible migration must state a reason".to_string())
            }
            Reversibility::Irreversible { .. } if !self.down.is_empty() => {
                Err("irreversible migration must not define down operations".to_string())
            }
            _ => Ok(()),
        }
    }

    async fn run(&self, operations: &[Operation], db: &dyn DocumentStore) -> StoreResult<()> {
        for operation in operations {
            tracing::debug!(migration = %self.id, "{}", operation.describe());
            operation.apply(db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Migration for ScriptedMigration {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn reversibility(&self) -> Reversibility {
        self.reversibility.clone()
    }

    async fn up(&self, db: &dyn DocumentStore) -> StoreResult<()> {
        self.run(&self.up, db).await
    }

    async fn down(&self, db: &dyn DocumentStore) -> StoreResult<()> {
        self.run(&self.down, db).await
    }
}
