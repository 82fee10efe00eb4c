//! Migration System
//!
//! Units, the registry that orders them, the ledger that records which are
//! applied, and the orchestrator that moves a database between the two.

pub mod definitions;
pub mod ledger;
pub mod loader;
pub mod lock;
pub mod operations;
pub mod orchestrator;
pub mod plan;
pub mod registry;

pub use definitions::*;
pub use ledger::LedgerStore;
pub use loader::MigrationLoader;
pub use lock::{LockGuard, RunLock};
pub use operations::{Operation, ScriptedMigration};
pub use orchestrator::Orchestrator;
pub use plan::{DownTarget, Plan, UpTarget};
pub use registry::{is_valid_migration_id, MigrationRegistry};
