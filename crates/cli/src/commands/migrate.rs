use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use docshift_migrate::{
    ConfigError, DocumentStore, DownTarget, MemoryStore, MigrationConfig, MigrationLoader,
    MigrationRegistry, MigrationResult, MigrationStatus, Orchestrator, Plan, RunLock, RunOutcome,
    RunReport, UpTarget,
};
use uuid::Uuid;

use super::CommandStatus;

const MEMORY_URL_SCHEME: &str = "memory://";

/// Resolved configuration plus an open database handle
pub struct Context {
    pub config: MigrationConfig,
    pub store: Arc<dyn DocumentStore>,
}

impl Context {
    /// Open the store named by `config.database_url`
    pub async fn connect(config: MigrationConfig) -> anyhow::Result<Self> {
        let url = config.require_database_url()?;

        let store: Arc<dyn DocumentStore> = if url.starts_with(MEMORY_URL_SCHEME) {
            tracing::warn!("using an in-process store; nothing outlives this command");
            Arc::new(MemoryStore::new())
        } else {
            connect_mongo(url, &config).await?
        };

        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: MigrationConfig, store: Arc<dyn DocumentStore>) -> Self {
        Self { config, store }
    }

    fn orchestrator(&self) -> anyhow::Result<Orchestrator> {
        let registry = MigrationRegistry::from_dir(&self.config.migrations_dir).with_context(|| {
            format!(
                "failed to load migrations from {}",
                self.config.migrations_dir.display()
            )
        })?;
        Ok(Orchestrator::with_config(registry, self.store.clone(), &self.config))
    }

    fn lock(&self) -> RunLock {
        RunLock::new(
            self.store.clone(),
            self.config.lock_collection.clone(),
            self.config.lock_name.clone(),
        )
    }
}

#[cfg(feature = "mongodb")]
async fn connect_mongo(url: &str, config: &MigrationConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let database = config.database_name.as_deref().ok_or_else(|| {
        ConfigError::missing_required("database", "Set DOCSHIFT_DATABASE or pass --database")
    })?;
    let store = docshift_migrate::MongoStore::connect(url, database)
        .await
        .context("failed to connect to MongoDB")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "mongodb"))]
async fn connect_mongo(url: &str, _config: &MigrationConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    Err(ConfigError::invalid_value(
        "database_url",
        url,
        "memory:// (this build has no MongoDB support; enable the `mongodb` feature)",
    )
    .into())
}

/// Create a new migration file
pub fn create(config: &MigrationConfig, name: &str) -> anyhow::Result<CommandStatus> {
    let loader = MigrationLoader::new(&config.migrations_dir);
    let path = loader.create_migration(name)?;

    println!("Created migration: {}", path.display());
    Ok(CommandStatus::Success)
}

/// Apply pending migrations
pub async fn up(ctx: &Context, to: Option<String>, dry_run: bool) -> anyhow::Result<CommandStatus> {
    let orchestrator = ctx.orchestrator()?;
    let target = to.map_or(UpTarget::All, UpTarget::To);

    if dry_run {
        print_plan(&orchestrator.plan_up(&target).await?);
        return Ok(CommandStatus::Success);
    }

    let report = locked(ctx, orchestrator.migrate_up(target)).await?;
    Ok(print_report(&report))
}

/// Revert applied migrations, the most recent one by default
pub async fn down(
    ctx: &Context,
    count: Option<usize>,
    to: Option<String>,
    dry_run: bool,
) -> anyhow::Result<CommandStatus> {
    let orchestrator = ctx.orchestrator()?;
    let target = match (count, to) {
        (_, Some(id)) => DownTarget::To(id),
        (Some(count), None) => DownTarget::Count(count),
        (None, None) => DownTarget::default(),
    };

    if dry_run {
        print_plan(&orchestrator.plan_down(&target).await?);
        return Ok(CommandStatus::Success);
    }

    let report = locked(ctx, orchestrator.migrate_down(target)).await?;
    Ok(print_report(&report))
}

/// Show applied and pending migrations
pub async fn status(ctx: &Context, json: bool) -> anyhow::Result<CommandStatus> {
    let report = ctx.orchestrator()?.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(CommandStatus::Success);
    }

    println!("Migration Status:");
    println!("================");

    if report.entries.is_empty() {
        println!("No migrations found in {}", ctx.config.migrations_dir.display());
    }
    for unit in &report.entries {
        let marker = if unit.reversible { "" } else { " (irreversible)" };
        match &unit.status {
            MigrationStatus::Applied { applied_at, batch } => println!(
                "  ✅ {}{}  applied {} in batch {}",
                unit.id,
                marker,
                applied_at.format("%Y-%m-%d %H:%M:%S UTC"),
                batch
            ),
            MigrationStatus::Pending => println!("  ⏳ {}{}", unit.id, marker),
        }
    }
    for entry in &report.orphaned {
        println!("  ⚠️  {}  applied but missing from the migrations directory", entry.migration_id);
    }

    println!(
        "\n{} applied, {} pending",
        report.applied_ids().len(),
        report.pending_ids().len()
    );
    Ok(CommandStatus::Success)
}

/// Force-release the run lock
pub async fn unlock(ctx: &Context) -> anyhow::Result<CommandStatus> {
    if ctx.lock().force_release().await? {
        println!("Released run lock '{}'", ctx.config.lock_name);
    } else {
        println!("Run lock '{}' was not held", ctx.config.lock_name);
    }
    Ok(CommandStatus::Success)
}

/// Run `run` while holding the run lock
async fn locked<F>(ctx: &Context, run: F) -> anyhow::Result<RunReport>
where
    F: Future<Output = MigrationResult<RunReport>>,
{
    let lock = ctx.lock();
    let owner = format!("{}:{}", std::process::id(), Uuid::new_v4());
    let guard = lock.acquire(&owner).await?;

    let result = run.await;
    // The report must reach the caller even when the lock cannot be released
    if let Err(err) = lock.release(guard).await {
        tracing::warn!(
            lock = %ctx.config.lock_name,
            error = %err,
            "failed to release run lock; clear it with `docshift unlock`"
        );
    }
    Ok(result?)
}

fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("Nothing to {}", plan.direction);
        return;
    }
    println!("Would run {} migration(s) {}:", plan.len(), plan.direction);
    for id in plan.ids() {
        println!("  {}", id);
    }
}

fn print_report(report: &RunReport) -> CommandStatus {
    for step in &report.steps {
        println!("  ✅ {} {} ({}ms)", report.direction, step.id, step.duration_ms);
    }

    match &report.outcome {
        RunOutcome::Completed if report.steps.is_empty() => {
            println!("Nothing to {}", report.direction);
            CommandStatus::Success
        }
        RunOutcome::Completed => {
            println!(
                "Ran {} migration(s) {} in {}ms",
                report.steps.len(),
                report.direction,
                report.execution_time_ms
            );
            CommandStatus::Success
        }
        RunOutcome::Failed(failure) => {
            eprintln!("Migration {} failed ({}): {}", failure.id, failure.direction, failure.error);
            eprintln!(
                "{} migration(s) completed before the failure remain applied",
                report.steps.len()
            );
            CommandStatus::RunFailed
        }
    }
}
