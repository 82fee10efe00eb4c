//! Migration configuration
//!
//! Defaults, environment loading and validation for the migration system.

use std::env;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl ConfigError {
    /// Create a missing required field error
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

/// Configuration for the migration system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Directory where migration files are stored
    pub migrations_dir: PathBuf,
    /// Collection holding the ledger of applied migrations
    pub ledger_collection: String,
    /// Collection holding the run lock
    pub lock_collection: String,
    /// Key of the run lock document
    pub lock_name: String,
    /// Connection string; `memory://` selects the in-process store
    pub database_url: Option<String>,
    /// Database name for backends that need one
    pub database_name: Option<String>,
    pub log_level: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            ledger_collection: "docshift_migrations".to_string(),
            lock_collection: "docshift_locks".to_string(),
            lock_name: "migrations".to_string(),
            database_url: None,
            database_name: None,
            log_level: "info".to_string(),
        }
    }
}

impl MigrationConfig {
    /// Load configuration from `DOCSHIFT_*` environment variables over the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(dir) = env::var("DOCSHIFT_MIGRATIONS_DIR") {
            config.migrations_dir = PathBuf::from(dir);
        }
        if let Ok(collection) = env::var("DOCSHIFT_LEDGER_COLLECTION") {
            config.ledger_collection = collection;
        }
        if let Ok(collection) = env::var("DOCSHIFT_LOCK_COLLECTION") {
            config.lock_collection = collection;
        }
        if let Ok(name) = env::var("DOCSHIFT_LOCK_NAME") {
            config.lock_name = name;
        }
        config.database_url = env::var("DOCSHIFT_DATABASE_URL").ok();
        config.database_name = env::var("DOCSHIFT_DATABASE").ok();
        if let Ok(level) = env::var("DOCSHIFT_LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("ledger_collection", &self.ledger_collection),
            ("lock_collection", &self.lock_collection),
            ("lock_name", &self.lock_name),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid_value(field, value.as_str(), "a non-empty name"));
            }
        }

        if self.ledger_collection == self.lock_collection {
            return Err(ConfigError::invalid_value(
                "lock_collection",
                self.lock_collection.as_str(),
                "a collection distinct from the ledger collection",
            ));
        }

        if !matches!(
            self.log_level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(ConfigError::invalid_value(
                "log_level",
                self.log_level.as_str(),
                "trace, debug, info, warn, or error",
            ));
        }

        Ok(())
    }

    /// The connection string, or an error naming the variable to set
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or_else(|| {
            ConfigError::missing_required(
                "database_url",
                "Set DOCSHIFT_DATABASE_URL or pass --database-url (use memory:// for a scratch store)",
            )
        })
    }
}
