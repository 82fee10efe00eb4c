//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the `Migration` unit trait along with the ledger entry, status and
//! run report types shared by the registry, ledger and orchestrator.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, StoreResult};
use crate::store::DocumentStore;

/// Whether a migration's effect can be undone by its `down` operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reversibility {
    Reversible,
    /// The unit cannot be reverted automatically, e.g. a lossy field removal
    Irreversible { reason: String },
}

impl Reversibility {
    pub fn irreversible(reason: impl Into<String>) -> Self {
        Self::Irreversible {
            reason: reason.into(),
        }
    }

    pub fn is_reversible(&self) -> bool {
        matches!(self, Reversibility::Reversible)
    }
}

/// A single forward/backward change to the database
///
/// A unit's `id` is a promise about what ran: once applied somewhere, its
/// `up`/`down` bodies must not change.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Unique, lexically sortable identifier (`<timestamp>-<slug>`)
    fn id(&self) -> &str;

    /// Human-readable summary
    fn description(&self) -> Option<&str> {
        None
    }

    fn reversibility(&self) -> Reversibility;

    /// Apply the change
    async fn up(&self, db: &dyn DocumentStore) -> StoreResult<()>;

    /// Undo the change made by `up`
    async fn down(&self, db: &dyn DocumentStore) -> StoreResult<()>;
}

impl fmt::Debug for dyn Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id())
            .field("reversibility", &self.reversibility())
            .finish()
    }
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply the migration (run `up`)
    Up,
    /// Revert the migration (run `down`)
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Applied-state record persisted in the ledger collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Migration ID
    pub migration_id: String,
    /// When the migration was applied
    pub applied_at: DateTime<Utc>,
    /// Run number that applied it (for grouping migrations)
    pub batch: i64,
}

/// Migration status in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied {
        /// When it was applied
        applied_at: DateTime<Utc>,
        /// Batch number
        batch: i64,
    },
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        matches!(self, MigrationStatus::Applied { .. })
    }

    pub fn applied_at(&self) -> Option<DateTime<Utc>> {
        match self {
            MigrationStatus::Applied { applied_at, .. } => Some(*applied_at),
            MigrationStatus::Pending => None,
        }
    }
}

/// Status of one registry unit
#[derive(Debug, Clone, Serialize)]
pub struct UnitStatus {
    pub id: String,
    pub description: Option<String>,
    pub reversible: bool,
    pub status: MigrationStatus,
}

/// Result of `Orchestrator::status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Every registry unit, ascending by id
    pub entries: Vec<UnitStatus>,
    /// Ledger entries with no matching registry unit
    pub orphaned: Vec<LedgerEntry>,
}

impl StatusReport {
    pub fn get(&self, id: &str) -> Option<&UnitStatus> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn applied_ids(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|entry| entry.status.is_applied())
            .map(|entry| entry.id.as_str())
            .collect()
    }

    pub fn pending_ids(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|entry| !entry.status.is_applied())
            .map(|entry| entry.id.as_str())
            .collect()
    }
}

/// Timing of one completed step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub id: String,
    pub duration_ms: u128,
}

/// The step a failed run stopped at
#[derive(Debug)]
pub struct RunFailure {
    pub id: String,
    pub direction: Direction,
    pub error: MigrationError,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Failed(RunFailure),
}

/// Result of running a plan
#[derive(Debug)]
pub struct RunReport {
    pub direction: Direction,
    /// Batch number recorded for applied units; `None` for reverts and empty runs
    pub batch: Option<i64>,
    /// Steps that completed, in execution order
    pub steps: Vec<StepReport>,
    pub outcome: RunOutcome,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed)
    }

    /// Ids of the units that completed, in execution order
    pub fn completed_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.id.as_str()).collect()
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match &self.outcome {
            RunOutcome::Failed(failure) => Some(failure),
            RunOutcome::Completed => None,
        }
    }

    pub fn failed_id(&self) -> Option<&str> {
        self.failure().map(|failure| failure.id.as_str())
    }
}
