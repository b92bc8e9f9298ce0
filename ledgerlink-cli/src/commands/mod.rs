//! CLI command implementations

pub mod list;
pub mod maintenance;
pub mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use ledgerlink_core::config::Config;
use ledgerlink_core::services::SyncOptions;
use ledgerlink_core::LedgerLinkContext;

use crate::Cli;

/// Config file location: `--config`, `LEDGERLINK_CONFIG`, or `~/.ledgerlink/config.json`
pub fn config_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = &cli.config {
        return Ok(path.clone());
    }
    let home = dirs::home_dir().context("Could not find home directory; pass --config")?;
    Ok(home.join(".ledgerlink").join("config.json"))
}

pub fn load_config(cli: &Cli) -> Result<Config> {
    let path = config_path(cli)?;
    Config::load(&path).with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Context wired to the real ledger and scraper services
pub fn get_context(cli: &Cli) -> Result<LedgerLinkContext> {
    LedgerLinkContext::new(load_config(cli)?).context("Failed to initialize ledgerlink context")
}

/// Translate command line flags into pipeline options
pub fn sync_options(cli: &Cli) -> Result<SyncOptions> {
    let since = cli
        .since
        .as_deref()
        .map(|s| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .with_context(|| format!("Invalid --since date '{}': expected YYYY-MM-DD", s))
        })
        .transpose()?;

    Ok(SyncOptions {
        dry_run: cli.dry_run,
        since,
        backfill: cli.backfill,
        date_tolerance_days: cli.date_tolerance,
        only_accounts: cli
            .only_accounts
            .iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect(),
        skip_edit: cli.skip_edit,
    })
}
