//! End-to-end runs of the orchestrator against the in-memory store

use std::sync::Arc;

use async_trait::async_trait;
use docshift_migrate::{
    Direction, DocumentStore, DownTarget, IndexSpec, MemoryStore, Migration, MigrationError,
    MigrationRegistry, Operation, Orchestrator, Reversibility, ScriptedMigration, StoreError,
    StoreResult, UpTarget,
};
use parking_lot::Mutex;

/// Records the order bodies run in, optionally failing `up`
struct RecordingMigration {
    id: String,
    journal: Arc<Mutex<Vec<String>>>,
    fail_up: bool,
    reversibility: Reversibility,
}

#[async_trait]
impl Migration for RecordingMigration {
    fn id(&self) -> &str {
        &self.id
    }

    fn reversibility(&self) -> Reversibility {
        self.reversibility.clone()
    }

    async fn up(&self, db: &dyn DocumentStore) -> StoreResult<()> {
        if self.fail_up {
            return Err(StoreError::Backend(format!("{} exploded", self.id)));
        }
        db.create_collection(&self.id).await?;
        self.journal.lock().push(format!("up:{}", self.id));
        Ok(())
    }

    async fn down(&self, db: &dyn DocumentStore) -> StoreResult<()> {
        db.drop_collection(&self.id).await?;
        self.journal.lock().push(format!("down:{}", self.id));
        Ok(())
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    journal: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn unit(&self, id: &str) -> Arc<dyn Migration> {
        Arc::new(RecordingMigration {
            id: id.to_string(),
            journal: self.journal.clone(),
            fail_up: false,
            reversibility: Reversibility::Reversible,
        })
    }

    fn failing_unit(&self, id: &str) -> Arc<dyn Migration> {
        Arc::new(RecordingMigration {
            id: id.to_string(),
            journal: self.journal.clone(),
            fail_up: true,
            reversibility: Reversibility::Reversible,
        })
    }

    fn irreversible_unit(&self, id: &str) -> Arc<dyn Migration> {
        Arc::new(RecordingMigration {
            id: id.to_string(),
            journal: self.journal.clone(),
            fail_up: false,
            reversibility: Reversibility::irreversible("removes a field"),
        })
    }

    fn orchestrator(&self, units: Vec<Arc<dyn Migration>>) -> Orchestrator {
        let registry = MigrationRegistry::new(units).unwrap();
        Orchestrator::new(registry, self.store.clone())
    }

    fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }
}

const A: &str = "20250101-a";
const B: &str = "20250102-b";
const C: &str = "20250103-c";

#[tokio::test]
async fn test_concrete_scenario() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator(vec![fixture.unit(C), fixture.unit(A), fixture.unit(B)]);

    let report = orchestrator.migrate_up(UpTarget::All).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.direction, Direction::Up);
    assert_eq!(report.completed_ids(), vec![A, B, C]);

    let status = orchestrator.status().await.unwrap();
    assert_eq!(status.applied_ids(), vec![A, B, C]);
    assert!(status.entries.iter().all(|e| e.status.applied_at().is_some()));

    let report = orchestrator.migrate_down(DownTarget::Count(1)).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.completed_ids(), vec![C]);

    let status = orchestrator.status().await.unwrap();
    assert!(!status.get(C).unwrap().status.is_applied());
    assert!(status.get(A).unwrap().status.is_applied());
    assert!(status.get(B).unwrap().status.is_applied());
}

#[tokio::test]
async fn test_idempotent_rerun() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator(vec![fixture.unit(A), fixture.unit(B)]);

    orchestrator.migrate_up(UpTarget::All).await.unwrap();
    let second = orchestrator.migrate_up(UpTarget::All).await.unwrap();

    assert!(second.is_success());
    assert!(second.completed_ids().is_empty());
    assert_eq!(second.batch, None);
    assert_eq!(fixture.journal(), vec![format!("up:{}", A), format!("up:{}", B)]);
}

#[tokio::test]
async fn test_order_preservation() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator(vec![fixture.unit(B), fixture.unit(C), fixture.unit(A)]);

    orchestrator.migrate_up(UpTarget::All).await.unwrap();
    let report = orchestrator.migrate_down(DownTarget::Count(2)).await.unwrap();
    assert_eq!(report.completed_ids(), vec![C, B]);

    assert_eq!(
        fixture.journal(),
        vec![
            format!("up:{}", A),
            format!("up:{}", B),
            format!("up:{}", C),
            format!("down:{}", C),
            format!("down:{}", B),
        ]
    );
}

#[tokio::test]
async fn test_partial_failure_keeps_prefix() {
    let fixture = Fixture::new();
    let orchestrator =
        fixture.orchestrator(vec![fixture.unit(A), fixture.failing_unit(B), fixture.unit(C)]);

    let report = orchestrator.migrate_up(UpTarget::All).await.unwrap();
    assert!(!report.is_success());
    assert_eq!(report.completed_ids(), vec![A]);
    assert_eq!(report.failed_id(), Some(B));

    let failure = report.failure().unwrap();
    assert_eq!(failure.direction, Direction::Up);
    match &failure.error {
        MigrationError::StepExecution { id, direction, source } => {
            assert_eq!(id, B);
            assert_eq!(*direction, Direction::Up);
            assert_eq!(source, &StoreError::Backend(format!("{} exploded", B)));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // No automatic rollback and nothing past the failure
    assert!(fixture.store.collection_exists(A).await.unwrap());
    assert!(!fixture.store.collection_exists(C).await.unwrap());

    let status = orchestrator.status().await.unwrap();
    assert_eq!(status.applied_ids(), vec![A]);
    assert_eq!(status.pending_ids(), vec![B, C]);
}

#[tokio::test]
async fn test_fix_forward_after_failure() {
    let fixture = Fixture::new();
    let broken = fixture.orchestrator(vec![fixture.unit(A), fixture.failing_unit(B), fixture.unit(C)]);
    broken.migrate_up(UpTarget::All).await.unwrap();

    let fixed = fixture.orchestrator(vec![fixture.unit(A), fixture.unit(B), fixture.unit(C)]);
    let report = fixed.migrate_up(UpTarget::All).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.completed_ids(), vec![B, C]);
    assert_eq!(report.batch, Some(2));
}

#[tokio::test]
async fn test_restart_resumes_after_last_recorded_step() {
    let fixture = Fixture::new();

    // The first process recorded A and was killed before B started
    let first = fixture.orchestrator(vec![fixture.unit(A), fixture.unit(B), fixture.unit(C)]);
    first.migrate_up(UpTarget::To(A.to_string())).await.unwrap();
    drop(first);

    let restarted = fixture.orchestrator(vec![fixture.unit(A), fixture.unit(B), fixture.unit(C)]);
    let plan = restarted.plan_up(&UpTarget::All).await.unwrap();
    assert_eq!(plan.ids(), vec![B, C]);

    let report = restarted.migrate_up(UpTarget::All).await.unwrap();
    assert_eq!(report.completed_ids(), vec![B, C]);
    assert_eq!(
        fixture.journal().iter().filter(|e| *e == &format!("up:{}", A)).count(),
        1
    );
}

#[tokio::test]
async fn test_irreversible_unit_is_never_reverted() {
    let fixture = Fixture::new();
    let orchestrator =
        fixture.orchestrator(vec![fixture.unit(A), fixture.irreversible_unit(B), fixture.unit(C)]);
    orchestrator.migrate_up(UpTarget::All).await.unwrap();
    let ledger_before = orchestrator.ledger().get_applied().await.unwrap();

    let err = orchestrator.migrate_down(DownTarget::Count(3)).await.unwrap_err();
    assert!(matches!(&err, MigrationError::IrreversibleMigration { id, .. } if id == B));

    let err = orchestrator.migrate_down(DownTarget::To(A.to_string())).await.unwrap_err();
    assert!(matches!(&err, MigrationError::IrreversibleMigration { id, .. } if id == B));

    // Nothing was reverted, not even C which sits above the irreversible unit
    assert_eq!(orchestrator.ledger().get_applied().await.unwrap(), ledger_before);
    assert!(fixture.store.collection_exists(C).await.unwrap());

    let report = orchestrator.migrate_down(DownTarget::Count(1)).await.unwrap();
    assert_eq!(report.completed_ids(), vec![C]);
}

#[tokio::test]
async fn test_down_with_orphaned_ledger_entry_is_missing_unit() {
    let fixture = Fixture::new();
    let with_c = fixture.orchestrator(vec![fixture.unit(A), fixture.unit(C)]);
    with_c.migrate_up(UpTarget::All).await.unwrap();

    // C was deleted from the codebase after it ran
    let without_c = fixture.orchestrator(vec![fixture.unit(A)]);
    let err = without_c.migrate_down(DownTarget::Count(1)).await.unwrap_err();
    assert!(matches!(err, MigrationError::MissingUnit { id } if id == C));

    let status = without_c.status().await.unwrap();
    assert_eq!(status.applied_ids(), vec![A]);
    assert_eq!(status.orphaned[0].migration_id, C);
}

#[tokio::test]
async fn test_down_to_target() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator(vec![fixture.unit(A), fixture.unit(B), fixture.unit(C)]);
    orchestrator.migrate_up(UpTarget::All).await.unwrap();

    let report = orchestrator.migrate_down(DownTarget::To(A.to_string())).await.unwrap();
    assert_eq!(report.completed_ids(), vec![C, B]);
    assert_eq!(orchestrator.status().await.unwrap().applied_ids(), vec![A]);
}

#[tokio::test]
async fn test_down_failure_halts_and_keeps_ledger_consistent() {
    let fixture = Fixture::new();
    let index_unit: Arc<dyn Migration> = Arc::new(
        ScriptedMigration::new(B)
            .on_up(Operation::CreateIndex {
                collection: "contacts".to_string(),
                index: IndexSpec::new("contacts_workspaceId_contactType")
                    .asc("workspaceId")
                    .asc("contactType"),
            })
            // Names a different index than up created
            .on_down(Operation::DropIndex {
                collection: "contacts".to_string(),
                name: "workspaceId_1_contactType_1".to_string(),
            }),
    );
    let orchestrator = fixture.orchestrator(vec![fixture.unit(A), index_unit, fixture.unit(C)]);
    orchestrator.migrate_up(UpTarget::All).await.unwrap();

    let report = orchestrator.migrate_down(DownTarget::Count(3)).await.unwrap();
    assert_eq!(report.completed_ids(), vec![C]);
    assert_eq!(report.failed_id(), Some(B));
    assert!(matches!(
        report.failure().unwrap().error,
        MigrationError::StepExecution {
            direction: Direction::Down,
            source: StoreError::IndexNotFound { .. },
            ..
        }
    ));

    let status = orchestrator.status().await.unwrap();
    assert_eq!(status.applied_ids(), vec![A, B]);
}

#[tokio::test]
async fn test_registry_duplicate_blocks_any_run() {
    let fixture = Fixture::new();
    let err = MigrationRegistry::new(vec![fixture.unit(A), fixture.unit(A)]).unwrap_err();
    assert!(matches!(err, MigrationError::DuplicateId { .. }));
    assert_eq!(fixture.store.write_count(), 0);
}
