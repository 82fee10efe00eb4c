//! Migration Registry - the validated, ordered set of known units
//!
//! Built once at process start and injected into the orchestrator. Loading
//! never touches the database.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use super::definitions::Migration;
use super::loader::MigrationLoader;
use crate::error::{MigrationError, MigrationResult};

static MIGRATION_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{8,14}[-_][A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("migration id pattern is valid")
});

/// Check that `id` is a `<timestamp>-<slug>` identifier
pub fn is_valid_migration_id(id: &str) -> bool {
    MIGRATION_ID.is_match(id)
}

/// Ordered, duplicate-free set of migration units
#[derive(Clone, Default)]
pub struct MigrationRegistry {
    migrations: Vec<Arc<dyn Migration>>,
}

impl MigrationRegistry {
    /// Validate and sort `migrations` ascending by id
    pub fn new(mut migrations: Vec<Arc<dyn Migration>>) -> MigrationResult<Self> {
        let mut seen = HashSet::with_capacity(migrations.len());
        for migration in &migrations {
            let id = migration.id();
            if !is_valid_migration_id(id) {
                return Err(MigrationError::InvalidId { id: id.to_string() });
            }
            if !seen.insert(id.to_string()) {
                return Err(MigrationError::DuplicateId { id: id.to_string() });
            }
        }

        migrations.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(Self { migrations })
    }

    /// Load every unit file in `dir`
    pub fn from_dir(dir: impl AsRef<Path>) -> MigrationResult<Self> {
        let loader = MigrationLoader::new(dir.as_ref());
        let migrations = loader
            .load_migrations()?
            .into_iter()
            .map(|m| Arc::new(m) as Arc<dyn Migration>)
            .collect();
        let registry = Self::new(migrations)?;
        tracing::debug!(count = registry.len(), dir = %dir.as_ref().display(), "loaded migration registry");
        Ok(registry)
    }

    /// All units, ascending by id
    pub fn list_all(&self) -> &[Arc<dyn Migration>] {
        &self.migrations
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Migration>> {
        self.migrations
            .binary_search_by(|m| m.id().cmp(id))
            .ok()
            .map(|pos| &self.migrations[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
