//! Error types for the migration system
//!
//! `StoreError` covers failures raised by a document store backend,
//! `MigrationError` is the taxonomy the orchestrator surfaces to callers.

use std::path::PathBuf;

use thiserror::Error;

use crate::migrations::definitions::Direction;

/// Result type alias for document store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Errors raised by a `DocumentStore` backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Collection '{0}' already exists")]
    CollectionExists(String),

    #[error("Duplicate key in collection '{collection}': {key}")]
    DuplicateKey { collection: String, key: String },

    #[error("Index '{index}' not found on collection '{collection}'")]
    IndexNotFound { collection: String, index: String },

    #[error("Index '{index}' on collection '{collection}' already exists with a different specification")]
    IndexConflict { collection: String, index: String },

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create a duplicate key error
    pub fn duplicate_key(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self::DuplicateKey {
            collection: collection.into(),
            key: key.into(),
        }
    }

    /// Whether this error reports a primary or unique key collision
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::InvalidDocument(err.to_string())
    }
}

/// Errors surfaced by the registry, ledger, planner and orchestrator
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Duplicate migration id '{id}' in registry")]
    DuplicateId { id: String },

    #[error("Invalid migration id '{id}': expected <timestamp>-<slug>, e.g. 20250101120000-create_users")]
    InvalidId { id: String },

    #[error("Migration '{id}' is already recorded in the ledger")]
    DuplicateApply { id: String },

    #[error("Ledger references migration '{id}' which is not in the registry")]
    MissingUnit { id: String },

    #[error("Migration '{id}' is irreversible: {reason}")]
    IrreversibleMigration { id: String, reason: String },

    #[error("Migration '{id}' failed while running {direction}: {source}")]
    StepExecution {
        id: String,
        direction: Direction,
        #[source]
        source: StoreError,
    },

    #[error("Target migration '{id}' is unknown")]
    UnknownTarget { id: String },

    #[error("Run lock '{name}' is held by '{owner}' since {acquired_at}")]
    LockHeld {
        name: String,
        owner: String,
        acquired_at: String,
    },

    #[error("Invalid migration definition in {}: {message}", .path.display())]
    InvalidDefinition { path: PathBuf, message: String },

    #[error("Ledger error: {0}")]
    Ledger(#[source] StoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Create an invalid definition error for a migration file
    pub fn invalid_definition(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            path: path.into(),
            message: message.into(),
        }
    }

    /// The migration id this error concerns, when there is one
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            MigrationError::DuplicateId { id }
            | MigrationError::InvalidId { id }
            | MigrationError::DuplicateApply { id }
            | MigrationError::MissingUnit { id }
            | MigrationError::IrreversibleMigration { id, .. }
            | MigrationError::StepExecution { id, .. }
            | MigrationError::UnknownTarget { id } => Some(id),
            _ => None,
        }
    }
}
