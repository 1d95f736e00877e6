//! CLI subcommands

pub mod run;
pub mod scan;
pub mod status;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use fib_short_trader::config::{Config, StateBackend};
use fib_short_trader::ledger::{JsonFileStore, Ledger, LedgerConfig, SnapshotStore, SqliteStore};
use fib_short_trader::notify::Notifiers;

/// Load the config file, or defaults plus environment when it is missing
pub fn load_config(path: &str) -> Result<Config> {
    dotenv::dotenv().ok();

    if Path::new(path).exists() {
        return Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path));
    }

    warn!("Config file {} not found, using defaults", path);
    let mut config = Config::default();
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

pub fn open_store(config: &Config) -> Result<Box<dyn SnapshotStore>> {
    let path = &config.state.path;
    let store: Box<dyn SnapshotStore> = match config.state.backend {
        StateBackend::Json => Box::new(JsonFileStore::new(path)),
        StateBackend::Sqlite => Box::new(
            SqliteStore::open(path)
                .with_context(|| format!("Failed to open SQLite store {}", path.display()))?,
        ),
    };
    Ok(store)
}

/// Ledger restored from the configured store, with notifications attached
pub fn open_ledger(config: &Config, reset: bool, now: DateTime<Utc>) -> Result<Ledger> {
    let store = open_store(config)?;
    let reset = reset || config.state.reset_on_load;
    let ledger = Ledger::open(LedgerConfig::from_config(config), store, reset, now)
        .context("Failed to restore ledger state (use --reset to start fresh)")?;

    info!(
        "Ledger ready: balance {:.4}, available margin {:.4}",
        ledger.balance(),
        ledger.available_margin()
    );
    Ok(ledger.with_notifier(Arc::new(Notifiers::from_config(&config.notifications))))
}
