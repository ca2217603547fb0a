// ABOUTME: Entry point for the daybook binary.
// ABOUTME: Loads config, initializes tracing, opens and migrates the journal, then runs one subcommand.

mod cli;
mod commands;
mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use daybook_core::registry::StateRegistry;
use daybook_store::{Database, DatabaseConfig};

use crate::cli::Cli;
use crate::config::DaybookConfig;

const DEFAULT_LOG_FILTER: &str = "daybook=info,daybook_store=info,daybook_core=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = DaybookConfig::from_env().context("invalid configuration")?;
    if let Some(home) = cli.home.clone() {
        config.home = home;
    }

    let mut db_config = DatabaseConfig::file(config.database_path());
    if let Some(device_id) = &config.device_id {
        db_config = db_config.with_device_id(device_id.clone());
    }
    let database = Database::new(db_config);

    // A store that cannot reach the current schema must not be used.
    let store = match database.open().await {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(error = %err, home = %config.home.display(), "journal unavailable, exiting");
            return Err(err).context("failed to open journal database");
        }
    };

    let registry = StateRegistry::new(Arc::new(store.clone()), config.max_cached_days);
    let today = chrono::Local::now().date_naive();

    let mut stdout = std::io::stdout();
    let result = commands::run(cli.command, &store, &registry, today, &mut stdout).await;

    let evicted = registry.evict_idle(&[today], config.idle_threshold);
    tracing::debug!(evicted = evicted.len(), "swept idle day caches");
    registry.dispose_all();
    drop(registry);
    drop(store);
    database.close().await.context("failed to close journal database")?;

    result
}
