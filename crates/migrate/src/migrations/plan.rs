//! Plan computation
//!
//! A plan is the ordered list of units one run executes. It is computed fresh
//! from the registry and the applied-set on every invocation and never stored.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::definitions::{Direction, Migration, Reversibility};
use super::registry::MigrationRegistry;
use crate::error::{MigrationError, MigrationResult};

/// How far `migrate_up` goes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UpTarget {
    /// Every pending unit
    #[default]
    All,
    /// Pending units up to and including this id
    To(String),
}

/// How far `migrate_down` goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownTarget {
    /// The most recently applied `n` units
    Count(usize),
    /// Every applied unit with an id greater than this one
    To(String),
}

impl Default for DownTarget {
    fn default() -> Self {
        DownTarget::Count(1)
    }
}

/// Ordered units for one run in one direction
#[derive(Debug, Clone)]
pub struct Plan {
    pub direction: Direction,
    pub steps: Vec<Arc<dyn Migration>>,
}

impl Plan {
    pub fn ids(&self) -> Vec<&str> {
        self.steps.iter().map(|m| m.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Units in the registry but not in `applied`, ascending
pub fn plan_up(
    registry: &MigrationRegistry,
    applied: &BTreeSet<String>,
    target: &UpTarget,
) -> MigrationResult<Plan> {
    let limit = match target {
        UpTarget::All => None,
        UpTarget::To(id) => {
            if !registry.contains(id) {
                return Err(MigrationError::UnknownTarget { id: id.clone() });
            }
            Some(id.as_str())
        }
    };

    let steps = registry
        .list_all()
        .iter()
        .filter(|m| limit.map_or(true, |limit| m.id() <= limit))
        .filter(|m| !applied.contains(m.id()))
        .cloned()
        .collect();

    Ok(Plan {
        direction: Direction::Up,
        steps,
    })
}

/// Applied units to revert, descending
///
/// Fails before anything runs when a selected ledger entry has no registry
/// unit or when a selected unit is irreversible.
pub fn plan_down(
    registry: &MigrationRegistry,
    applied: &BTreeSet<String>,
    target: &DownTarget,
) -> MigrationResult<Plan> {
    let selected: Vec<&String> = match target {
        DownTarget::Count(count) => applied.iter().rev().take(*count).collect(),
        DownTarget::To(id) => {
            if !registry.contains(id) && !applied.contains(id) {
                return Err(MigrationError::UnknownTarget { id: id.clone() });
            }
            applied.iter().rev().take_while(|applied_id| *applied_id > id).collect()
        }
    };

    let mut steps = Vec::with_capacity(selected.len());
    for id in selected {
        let migration = registry
            .get(id)
            .ok_or_else(|| MigrationError::MissingUnit { id: id.clone() })?;

        if let Reversibility::Irreversible { reason } = migration.reversibility() {
            return Err(MigrationError::IrreversibleMigration {
                id: id.clone(),
                reason,
            });
        }
        steps.push(migration.clone());
    }

    Ok(Plan {
        direction: Direction::Down,
        steps,
    })
}
