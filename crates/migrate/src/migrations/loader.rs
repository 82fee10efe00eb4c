//! Migration Loader - File system operations for migrations
//!
//! Handles creating, discovering and parsing migration unit files. Each file
//! holds one unit; its stem is the unit id.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::definitions::Reversibility;
use super::operations::{Operation, ScriptedMigration};
use crate::error::{MigrationError, MigrationResult};

const EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// On-disk shape of a migration unit
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MigrationFile {
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_reversible")]
    reversible: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    up: Vec<Operation>,
    #[serde(default)]
    down: Vec<Operation>,
}

fn default_reversible() -> bool {
    true
}

/// Migration loader for creating and loading migration files
pub struct MigrationLoader {
    migrations_dir: PathBuf,
}

impl MigrationLoader {
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
        }
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Create a new migration file from the template, returning its path
    pub fn create_migration(&self, name: &str) -> MigrationResult<PathBuf> {
        fs::create_dir_all(&self.migrations_dir)?;

        let slug = slugify(name);
        if slug.is_empty() {
            return Err(MigrationError::InvalidId {
                id: name.to_string(),
            });
        }

        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let migration_id = format!("{}-{}", timestamp, slug);
        let filepath = self.migrations_dir.join(format!("{}.yaml", migration_id));

        fs::write(&filepath, migration_template(name, &migration_id))?;
        tracing::info!(id = %migration_id, path = %filepath.display(), "created migration");

        Ok(filepath)
    }

    /// Load all migration files from the migrations directory, sorted by id
    pub fn load_migrations(&self) -> MigrationResult<Vec<ScriptedMigration>> {
        if !self.migrations_dir.exists() {
            tracing::debug!(dir = %self.migrations_dir.display(), "migrations directory does not exist");
            return Ok(Vec::new());
        }

        let mut migrations = Vec::new();
        for entry in fs::read_dir(&self.migrations_dir)? {
            let path = entry?.path();
            if path.is_file() && has_migration_extension(&path) {
                migrations.push(self.parse_migration_file(&path)?);
            }
        }

        migrations.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(migrations)
    }

    /// Parse one migration file
    pub fn parse_migration_file(&self, path: &Path) -> MigrationResult<ScriptedMigration> {
        let content = fs::read_to_string(path)?;

        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| MigrationError::invalid_definition(path, "file name is not valid UTF-8"))?
            .to_string();

        let file: MigrationFile = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| MigrationError::invalid_definition(path, e.to_string()))?,
            _ => serde_yaml::from_str(&content)
                .map_err(|e| MigrationError::invalid_definition(path, e.to_string()))?,
        };

        let reversibility = if file.reversible {
            if file.reason.is_some() {
                return Err(MigrationError::invalid_definition(
                    path,
                    "'reason' only applies to irreversible migrations",
                ));
            }
            Reversibility::Reversible
        } else {
            Reversibility::Irreversible {
                reason: file.reason.unwrap_or_default(),
            }
        };

        let migration = ScriptedMigration {
            id,
            description: file.description,
            reversibility,
            up: file.up,
            down: file.down,
        };
        migration
            .validate()
            .map_err(|message| MigrationError::invalid_definition(path, message))?;

        Ok(migration)
    }
}

fn has_migration_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| EXTENSIONS.contains(&ext))
}

/// Lowercase `name`, collapsing runs of other characters into `_`
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    slug.trim_end_matches('_').to_string()
}

fn migration_template(name: &str, migration_id: &str) -> String {
    format!(
        "# Migration: {name}\n\
         # ID: {migration_id}\n\
         # Created: {created}\n\
         #\n\
         # Operations: create_collection, drop_collection, create_index, drop_index,\n\
         # insert_documents, update_documents, delete_documents.\n\
         # Set `reversible: false` and a `reason` when `down` cannot undo `up`.\n\
         \n\
         description: {name:?}\n\
         reversible: true\n\
         \n\
         up: []\n\
         \n\
         down: []\n",
        created = Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}
