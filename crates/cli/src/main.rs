mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use commands::migrate::{self, Context};
use commands::CommandStatus;
use docshift_migrate::MigrationConfig;
use logging::{init_logging, LoggingConfig};

const CONFIG_ERROR_EXIT: u8 = 2;

#[derive(Parser)]
#[command(name = "docshift")]
#[command(about = "Ordered, reversible migrations for document databases")]
#[command(version)]
struct Cli {
    /// Directory holding migration files [env: DOCSHIFT_MIGRATIONS_DIR]
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// Database connection string, or memory:// [env: DOCSHIFT_DATABASE_URL]
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Database name [env: DOCSHIFT_DATABASE]
    #[arg(long, global = true)]
    database: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show migration status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply pending migrations
    Up {
        /// Stop after this migration id (inclusive)
        #[arg(long)]
        to: Option<String>,

        /// Print the plan without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert applied migrations (the most recent one by default)
    Down {
        /// Number of migrations to revert
        #[arg(long, conflicts_with = "to")]
        count: Option<usize>,

        /// Revert every migration after this id (exclusive)
        #[arg(long)]
        to: Option<String>,

        /// Print the plan without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Create a new migration file
    Create {
        /// Migration name
        name: String,
    },

    /// Release a run lock left behind by an interrupted run
    Unlock,
}

impl Cli {
    /// Environment configuration with command-line flags on top
    fn config(&self) -> Result<MigrationConfig, docshift_migrate::ConfigError> {
        let mut config = MigrationConfig::from_env()?;
        if let Some(dir) = &self.migrations_dir {
            config.migrations_dir = dir.clone();
        }
        if let Some(url) = &self.database_url {
            config.database_url = Some(url.clone());
        }
        if let Some(database) = &self.database {
            config.database_name = Some(database.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(status) => status.exit_code(),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(CONFIG_ERROR_EXIT)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<CommandStatus> {
    let config = cli.config()?;

    if let Err(err) = init_logging(&LoggingConfig::new(config.log_level.clone()).json(cli.log_json)) {
        eprintln!("Warning: logging disabled: {}", err);
    }

    match cli.command {
        Commands::Create { name } => migrate::create(&config, &name),
        Commands::Status { json } => migrate::status(&Context::connect(config).await?, json).await,
        Commands::Up { to, dry_run } => {
            migrate::up(&Context::connect(config).await?, to, dry_run).await
        }
        Commands::Down { count, to, dry_run } => {
            migrate::down(&Context::connect(config).await?, count, to, dry_run).await
        }
        Commands::Unlock => migrate::unlock(&Context::connect(config).await?).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_down_count_conflicts_with_to() {
        let result = Cli::try_parse_from(["docshift", "down", "--count", "2", "--to", "20250101-a"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "docshift",
            "up",
            "--to",
            "20250102-b",
            "--database-url",
            "memory://",
        ])
        .unwrap();
        assert_eq!(cli.database_url.as_deref(), Some("memory://"));
        assert!(matches!(cli.command, Commands::Up { to: Some(ref id), dry_run: false } if id == "20250102-b"));
    }
}
