//! # docshift-migrate
//!
//! Ordered, reversible schema migrations for document databases.
//!
//! Migration units are identified by sortable `<timestamp>-<slug>` ids and
//! carry an `up` and a `down` body. The orchestrator compares the registry of
//! known units with the ledger of applied ones, runs the difference in order
//! and records each success before starting the next unit.
//!
//! ```rust
//! use std::sync::Arc;
//! use docshift_migrate::{
//!     DownTarget, MemoryStore, Migration, MigrationRegistry, Operation, Orchestrator,
//!     ScriptedMigration, UpTarget,
//! };
//!
//! # tokio_test::block_on(async {
//! let contacts = ScriptedMigration::new("20250101000000-create_contacts")
//!     .on_up(Operation::CreateCollection { collection: "contacts".into() })
//!     .on_down(Operation::DropCollection { collection: "contacts".into() });
//!
//! let registry = MigrationRegistry::new(vec![Arc::new(contacts) as Arc<dyn Migration>]).unwrap();
//! let orchestrator = Orchestrator::new(registry, Arc::new(MemoryStore::new()));
//!
//! let report = orchestrator.migrate_up(UpTarget::All).await.unwrap();
//! assert_eq!(report.completed_ids(), vec!["20250101000000-create_contacts"]);
//!
//! let report = orchestrator.migrate_down(DownTarget::default()).await.unwrap();
//! assert!(report.is_success());
//! # });
//! ```

pub mod config;
pub mod error;
pub mod migrations;
pub mod store;

pub use config::{ConfigError, MigrationConfig};
pub use error::{MigrationError, MigrationResult, StoreError, StoreResult};
pub use migrations::*;
pub use store::*;
