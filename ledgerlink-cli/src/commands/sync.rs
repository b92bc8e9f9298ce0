//! Sync command - scrape, reconcile and write to the ledger

use anyhow::Result;
use colored::Colorize;

use super::{get_context, sync_options};
use crate::output;
use crate::Cli;

pub async fn run(cli: &Cli) -> Result<()> {
    let options = sync_options(cli)?;
    let ctx = get_context(cli)?;
    let result = ctx.sync_service.sync(&options).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.dry_run {
        output::warning("DRY RUN - No changes applied");
        println!();
    }

    for account in &result.accounts {
        match &account.error {
            Some(error) => println!("{} {} - {}", "Error:".red(), account.key, error),
            None => println!(
                "{} {} ({} transactions since {})",
                "Scraped:".green(),
                account.key,
                account.transactions,
                account.start_date
            ),
        }
    }
    if result.accounts.is_empty() {
        output::warning("No accounts configured. Add some to the `accounts` list in the config file.");
    }
    println!();

    let stats = &result.transaction_stats;
    println!("Transaction breakdown:");
    println!("  Discovered: {}", stats.discovered);
    println!("  Invalid: {}", stats.invalid);
    println!("  Card settlements: {}", stats.settlements);
    println!("  Transfers inferred: {}", stats.transfers);
    println!("  Already stored as transfers: {}", stats.duplicates_of_existing);
    println!("  Legs of stored transfers: {}", stats.covered_legs);
    println!();

    let plan = &result.plan;
    output::info("Plan:");
    println!("  Create: {}", plan.to_create.len());
    println!("  Change type: {}", plan.to_type_update.len());
    println!("  Add destination: {}", plan.to_add_destination.len());
    println!("  Update fields: {}", plan.to_field_update.len());
    println!("  Delete duplicates: {}", plan.suppressed_duplicates.len());
    if plan.duplicates_removed > 0 {
        println!("  Repeated in input: {}", plan.duplicates_removed);
    }

    if result.dry_run {
        if !plan.to_create.is_empty() {
            println!();
            println!("{}", output::records_table(&plan.to_create));
        }
        return Ok(());
    }

    if let Some(report) = &result.report {
        println!();
        output::info("Applied:");
        output::print_report(report);
        if report.failed() == 0 {
            output::success("Ledger is up to date");
        }
    }
    if !result.watermarks_saved {
        output::warning("Import watermarks were not updated");
    }

    Ok(())
}
