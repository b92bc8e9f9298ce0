//! Maintenance commands - cleanup and duplicate removal

use anyhow::{Context, Result};
use colored::Colorize;
use ledgerlink_core::LedgerLinkContext;

use super::load_config;
use crate::output;
use crate::Cli;

pub async fn run(cli: &Cli) -> Result<()> {
    let mut config = load_config(cli)?;
    if let Some(tolerance) = cli.date_tolerance {
        config.date_tolerance_days = tolerance;
    }
    let ctx = LedgerLinkContext::for_maintenance(config)
        .context("Failed to initialize ledgerlink context")?;

    let (title, result) = if cli.cleanup {
        ("Transfer legs", ctx.maintenance_service.cleanup(cli.dry_run).await?)
    } else {
        ("Duplicate entries", ctx.maintenance_service.remove_duplicates(cli.dry_run).await?)
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.dry_run {
        output::warning("DRY RUN - No changes applied");
        println!();
    }

    println!("Scanned {} ledger entries", result.scanned);
    if result.candidates.is_empty() {
        output::success("Nothing to delete");
        return Ok(());
    }

    println!("{}: {}", title, result.candidates.len());
    let mut table = output::create_table();
    table.set_header(vec!["Ledger ID", "External ID"]);
    for candidate in &result.candidates {
        table.add_row(vec![candidate.ledger_id.clone(), candidate.external_id.clone()]);
    }
    println!("{table}");

    if let Some(report) = &result.report {
        println!();
        output::print_report(report);
        if report.failed() > 0 {
            println!("{}", "Some entries could not be deleted".red());
        }
    }

    Ok(())
}
