//! Taskmind application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Install the tracing subscriber
//! 3. Open the SQLite database
//! 4. Run the requested administration command
//!
//! Storage calls are synchronous, so commands run on the blocking pool.

mod cli;

use std::sync::Arc;

use clap::Parser;
use serde_json::json;

use taskmind_core::config::TaskmindConfig;
use taskmind_storage::{Database, Migrator, Storage, StorageOptions};

use cli::{CliArgs, Command, MigrateAction};

/// Load the config file and apply CLI overrides on top of it.
fn resolve_config(args: &CliArgs) -> TaskmindConfig {
    let config_file = args.resolve_config_path();
    let mut config = TaskmindConfig::load_or_default(&config_file);
    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    config
}

fn run_migrate(
    config: &TaskmindConfig,
    action: MigrateAction,
) -> taskmind_storage::Result<serde_json::Value> {
    let db = Arc::new(Database::with_options(
        config.database_path(),
        StorageOptions::from(&config.storage),
    ));
    let migrator = Migrator::new(db.clone());
    let report = match action {
        MigrateAction::Up => json!({ "applied": migrator.migrate_up()? }),
        MigrateAction::Down { target } => {
            json!({ "rolled_back": migrator.migrate_down(target.as_deref())? })
        }
        MigrateAction::Status => {
            let status = migrator.status()?;
            let applied: Vec<_> = status
                .applied
                .iter()
                .map(|r| json!({ "id": r.id, "filename": r.filename, "applied_at": r.applied_at }))
                .collect();
            json!({ "applied": applied, "pending": status.pending })
        }
    };
    db.close()?;
    Ok(report)
}

fn run_check(config: &TaskmindConfig) -> taskmind_storage::Result<serde_json::Value> {
    let storage = Storage::from_config(config)?;
    let status = storage.migrator().status()?;
    let applied: Vec<_> = status.applied.iter().map(|r| r.id.clone()).collect();
    let report = json!({
        "database": config.database_path().display().to_string(),
        "applied": applied,
        "pending": status.pending,
        "rows": storage.row_counts()?,
    });
    storage.close()?;
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let config = resolve_config(&args);

    // Tracing: RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Taskmind v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config.database_path().display(), "Using database");

    let command = args.command.clone();
    let report = tokio::task::spawn_blocking(move || match command {
        Command::Migrate { action } => run_migrate(&config, action),
        Command::Check => run_check(&config),
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
