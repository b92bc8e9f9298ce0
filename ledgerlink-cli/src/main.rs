//! LedgerLink CLI - import bank and card transactions into your ledger

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgGroup, Parser};
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{list, maintenance, sync};

/// LedgerLink - reconcile scraped bank and card transactions with a ledger
#[derive(Debug, Parser)]
#[command(name = "ledgerlink", version, about, long_about = None)]
#[command(group(
    ArgGroup::new("mode")
        .args(["cleanup", "remove_duplicates", "list_transactions"])
        .multiple(false)
))]
pub struct Cli {
    /// Path to the configuration file [default: ~/.ledgerlink/config.json]
    #[arg(long, env = "LEDGERLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Compute and print the plan without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Scrape every account from this date (YYYY-MM-DD), ignoring watermarks
    #[arg(long)]
    since: Option<String>,

    /// Ignore watermarks and scrape the configured backfill window
    #[arg(long)]
    backfill: bool,

    /// Days two legs of a transfer may be apart (overrides the config)
    #[arg(long = "date-tolerance", value_parser = clap::value_parser!(i64).range(0..))]
    date_tolerance: Option<i64>,

    /// Delete deposits and withdrawals already represented by a stored transfer
    #[arg(long)]
    cleanup: bool,

    /// Delete ledger entries whose external id was already used
    #[arg(long)]
    remove_duplicates: bool,

    /// Print the classified transactions without planning or writing
    #[arg(long)]
    list_transactions: bool,

    /// Only process these account keys
    #[arg(long, value_delimiter = ',')]
    only_accounts: Vec<String>,

    /// Never patch transactions that already exist with the same type
    #[arg(long)]
    skip_edit: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Log level for ledgerlink itself (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.log_level);
    debug!("Log level set to {}", cli.log_level.to_string().to_lowercase());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!("Exiting with error: {e:?}");
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.cleanup || cli.remove_duplicates {
        return maintenance::run(&cli).await;
    }
    if cli.list_transactions {
        return list::run(&cli).await;
    }
    sync::run(&cli).await
}

/// Initializes the tracing subscriber.
fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => EnvFilter::from_default_env(),
        None => EnvFilter::new(format!(
            "ledgerlink_core={},{}={}",
            level,
            env!("CARGO_CRATE_NAME"),
            level
        )),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
