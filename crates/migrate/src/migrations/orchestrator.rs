//! Migration Orchestrator - Executes plans against the database
//!
//! Computes the pending (or revertible) plan from the registry and ledger,
//! runs each unit in order and records every success in the ledger before the
//! next unit starts. A failing unit halts the run; the successful prefix is
//! kept and reported.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use super::definitions::{
    Direction, LedgerEntry, MigrationStatus, RunFailure, RunOutcome, RunReport, StatusReport,
    StepReport, UnitStatus,
};
use super::ledger::LedgerStore;
use super::plan::{self, DownTarget, Plan, UpTarget};
use super::registry::MigrationRegistry;
use crate::config::MigrationConfig;
use crate::error::{MigrationError, MigrationResult};
use crate::store::DocumentStore;

/// What one run does with each planned unit
#[derive(Debug, Clone, Copy)]
enum Pass {
    Apply { batch: i64 },
    Revert,
}

impl Pass {
    fn direction(self) -> Direction {
        match self {
            Pass::Apply { .. } => Direction::Up,
            Pass::Revert => Direction::Down,
        }
    }

    fn batch(self) -> Option<i64> {
        match self {
            Pass::Apply { batch } => Some(batch),
            Pass::Revert => None,
        }
    }
}

/// Applies and reverts registry units against one database
pub struct Orchestrator {
    registry: MigrationRegistry,
    store: Arc<dyn DocumentStore>,
    ledger: LedgerStore,
}

impl Orchestrator {
    /// Create an orchestrator using the default ledger collection
    pub fn new(registry: MigrationRegistry, store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(registry, store, &MigrationConfig::default())
    }

    pub fn with_config(
        registry: MigrationRegistry,
        store: Arc<dyn DocumentStore>,
        config: &MigrationConfig,
    ) -> Self {
        let ledger = LedgerStore::new(store.clone(), config.ledger_collection.clone());
        Self {
            registry,
            store,
            ledger,
        }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// Compute the forward plan without running it
    pub async fn plan_up(&self, target: &UpTarget) -> MigrationResult<Plan> {
        let applied = self.ledger.applied_ids().await?;
        plan::plan_up(&self.registry, &applied, target)
    }

    /// Compute the backward plan without running it
    pub async fn plan_down(&self, target: &DownTarget) -> MigrationResult<Plan> {
        let applied = self.ledger.applied_ids().await?;
        plan::plan_down(&self.registry, &applied, target)
    }

    /// Apply pending units in ascending order
    ///
    /// Planning errors are returned before anything runs; a failing step is
    /// reported through `RunOutcome::Failed`.
    pub async fn migrate_up(&self, target: UpTarget) -> MigrationResult<RunReport> {
        let start_time = Instant::now();

        let entries = self.ledger.get_applied().await?;
        let batch = entries.iter().map(|entry| entry.batch).max().unwrap_or(0) + 1;
        let applied: BTreeSet<String> = entries.into_iter().map(|entry| entry.migration_id).collect();

        let plan = plan::plan_up(&self.registry, &applied, &target)?;
        if plan.is_empty() {
            tracing::info!(skipped = applied.len(), "no pending migrations");
            return Ok(RunReport {
                direction: Direction::Up,
                batch: None,
                steps: Vec::new(),
                outcome: RunOutcome::Completed,
                execution_time_ms: start_time.elapsed().as_millis(),
            });
        }

        tracing::info!(pending = plan.len(), batch, "applying migrations");
        Ok(self.execute(plan, Pass::Apply { batch }, start_time).await)
    }

    /// Revert applied units in descending order
    pub async fn migrate_down(&self, target: DownTarget) -> MigrationResult<RunReport> {
        let start_time = Instant::now();

        let plan = self.plan_down(&target).await?;
        if plan.is_empty() {
            tracing::info!("no migrations to revert");
        } else {
            tracing::info!(count = plan.len(), "reverting migrations");
        }

        Ok(self.execute(plan, Pass::Revert, start_time).await)
    }

    /// Applied state of every registry unit, plus ledger entries with no unit
    pub async fn status(&self) -> MigrationResult<StatusReport> {
        let mut entries: BTreeMap<String, LedgerEntry> = self
            .ledger
            .get_applied()
            .await?
            .into_iter()
            .map(|entry| (entry.migration_id.clone(), entry))
            .collect();

        let units = self
            .registry
            .list_all()
            .iter()
            .map(|migration| {
                let status = match entries.remove(migration.id()) {
                    Some(entry) => MigrationStatus::Applied {
                        applied_at: entry.applied_at,
                        batch: entry.batch,
                    },
                    None => MigrationStatus::Pending,
                };
                UnitStatus {
                    id: migration.id().to_string(),
                    description: migration.description().map(str::to_string),
                    reversible: migration.reversibility().is_reversible(),
                    status,
                }
            })
            .collect();

        // Whatever the registry did not claim, ascending by id
        let orphaned: Vec<LedgerEntry> = entries.into_values().collect();
        for entry in &orphaned {
            let error = MigrationError::MissingUnit {
                id: entry.migration_id.clone(),
            };
            tracing::warn!(id = %entry.migration_id, error = %error, "ledger entry without migration");
        }

        Ok(StatusReport {
            entries: units,
            orphaned,
        })
    }

    async fn execute(&self, plan: Plan, pass: Pass, start_time: Instant) -> RunReport {
        let direction = pass.direction();
        let batch = pass.batch();
        let mut steps = Vec::with_capacity(plan.len());

        for migration in &plan.steps {
            let id = migration.id();
            let step_start = Instant::now();
            tracing::info!(id = %id, %direction, "running migration");

            let body = match pass {
                Pass::Apply { .. } => migration.up(&*self.store).await,
                Pass::Revert => migration.down(&*self.store).await,
            };

            let recorded = match body {
                Ok(()) => match pass {
                    Pass::Apply { batch } => self.ledger.record_applied(id, Utc::now(), batch).await,
                    Pass::Revert => self.ledger.record_reverted(id).await,
                },
                Err(source) => Err(MigrationError::StepExecution {
                    id: id.to_string(),
                    direction,
                    source,
                }),
            };

            if let Err(error) = recorded {
                tracing::error!(
                    id = %id,
                    %direction,
                    completed = steps.len(),
                    error = %error,
                    "migration failed, halting run"
                );
                return RunReport {
                    direction,
                    batch,
                    steps,
                    outcome: RunOutcome::Failed(RunFailure {
                        id: id.to_string(),
                        direction,
                        error,
                    }),
                    execution_time_ms: start_time.elapsed().as_millis(),
                };
            }

            let duration_ms = step_start.elapsed().as_millis();
            tracing::info!(id = %id, %direction, duration_ms = duration_ms as u64, "migration finished");
            steps.push(StepReport {
                id: id.to_string(),
                duration_ms,
            });
        }

        RunReport {
            direction,
            batch,
            steps,
            outcome: RunOutcome::Completed,
            execution_time_ms: start_time.elapsed().as_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::definitions::Migration;
    use crate::migrations::operations::{Operation, ScriptedMigration};
    use crate::store::MemoryStore;

    fn collection_unit(id: &str, collection: &str) -> Arc<dyn Migration> {
        Arc::new(
            ScriptedMigration::new(id)
                .on_up(Operation::CreateCollection {
                    collection: collection.to_string(),
                })
                .on_down(Operation::DropCollection {
                    collection: collection.to_string(),
                }),
        )
    }

    fn orchestrator(units: Vec<Arc<dyn Migration>>) -> (Arc<MemoryStore>, Orchestrator) {
        let store = Arc::new(MemoryStore::new());
        let registry = MigrationRegistry::new(units).unwrap();
        (store.clone(), Orchestrator::new(registry, store))
    }

    #[tokio::test]
    async fn test_batches_increment_per_run() {
        let (_store, orchestrator) = orchestrator(vec![
            collection_unit("20250101-a", "a"),
            collection_unit("20250102-b", "b"),
        ]);

        let first = orchestrator
            .migrate_up(UpTarget::To("20250101-a".to_string()))
            .await
            .unwrap();
        assert_eq!(first.batch, Some(1));

        let second = orchestrator.migrate_up(UpTarget::All).await.unwrap();
        assert_eq!(second.batch, Some(2));
        assert_eq!(second.completed_ids(), vec!["20250102-b"]);

        let status = orchestrator.status().await.unwrap();
        assert!(matches!(
            status.get("20250101-a").unwrap().status,
            MigrationStatus::Applied { batch: 1, .. }
        ));
        assert!(matches!(
            status.get("20250102-b").unwrap().status,
            MigrationStatus::Applied { batch: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_status_does_not_mutate() {
        let (store, orchestrator) = orchestrator(vec![collection_unit("20250101-a", "a")]);

        let status = orchestrator.status().await.unwrap();
        assert_eq!(status.pending_ids(), vec!["20250101-a"]);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_status_reports_orphaned_entries() {
        let (_store, orchestrator) = orchestrator(vec![collection_unit("20250101-a", "a")]);
        orchestrator
            .ledger()
            .record_applied("20241231-removed", Utc::now(), 1)
            .await
            .unwrap();

        let status = orchestrator.status().await.unwrap();
        assert_eq!(status.entries.len(), 1);
        assert!(!status.entries[0].status.is_applied());
        assert_eq!(status.orphaned.len(), 1);
        assert_eq!(status.orphaned[0].migration_id, "20241231-removed");
    }

    #[tokio::test]
    async fn test_apply_records_the_run_batch() {
        let (_store, orchestrator) = orchestrator(vec![
            collection_unit("20250101-a", "a"),
            collection_unit("20250102-b", "b"),
        ]);

        let plan = orchestrator.plan_up(&UpTarget::All).await.unwrap();
        let report = orchestrator
            .execute(plan, Pass::Apply { batch: 7 }, Instant::now())
            .await;
        assert_eq!(report.batch, Some(7));
        let batches: Vec<i64> = orchestrator
            .ledger()
            .get_applied()
            .await
            .unwrap()
            .iter()
            .map(|entry| entry.batch)
            .collect();
        assert_eq!(batches, vec![7, 7]);

        let report = orchestrator.migrate_down(DownTarget::Count(2)).await.unwrap();
        assert_eq!(report.batch, None);
        assert!(orchestrator.ledger().get_applied().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_matches_entries_and_sorts_orphans() {
        let (_store, orchestrator) = orchestrator(vec![
            collection_unit("20250101-a", "a"),
            collection_unit("20250103-c", "c"),
        ]);
        for (id, batch) in [("20250104-gone", 2), ("20250103-c", 1), ("20250102-removed", 1)] {
            orchestrator
                .ledger()
                .record_applied(id, Utc::now(), batch)
                .await
                .unwrap();
        }

        let status = orchestrator.status().await.unwrap();
        assert_eq!(status.applied_ids(), vec!["20250103-c"]);
        assert_eq!(status.pending_ids(), vec!["20250101-a"]);
        let orphaned: Vec<&str> = status.orphaned.iter().map(|e| e.migration_id.as_str()).collect();
        assert_eq!(orphaned, vec!["20250102-removed", "20250104-gone"]);
    }

    #[tokio::test]
    async fn test_ledger_failure_after_body_is_reported_as_step_failure() {
        let (_store, orchestrator) = orchestrator(vec![
            collection_unit("20250101-a", "a"),
            collection_unit("20250102-b", "b"),
        ]);
        // A concurrent run recorded b between our planning and execution
        let plan = orchestrator.plan_up(&UpTarget::All).await.unwrap();
        orchestrator
            .ledger()
            .record_applied("20250102-b", Utc::now(), 7)
            .await
            .unwrap();

        let report = orchestrator.execute(plan, Pass::Apply { batch: 1 }, Instant::now()).await;
        assert!(!report.is_success());
        assert_eq!(report.completed_ids(), vec!["20250101-a"]);
        let failure = report.failure().unwrap();
        assert_eq!(failure.id, "20250102-b");
        assert!(matches!(failure.error, MigrationError::DuplicateApply { .. }));
    }
}
