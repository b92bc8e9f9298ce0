//! List command - show classified transactions without touching the ledger

use anyhow::Result;

use super::{get_context, sync_options};
use crate::output;
use crate::Cli;

pub async fn run(cli: &Cli) -> Result<()> {
    let options = sync_options(cli)?;
    let ctx = get_context(cli)?;
    let classification = ctx.sync_service.list_transactions(&options).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&classification)?);
        return Ok(());
    }

    for account in classification.accounts.iter().filter(|a| a.error.is_some()) {
        output::error(&format!(
            "{}: {}",
            account.key,
            account.error.as_deref().unwrap_or_default()
        ));
    }

    if classification.records.is_empty() {
        output::info("No transactions found");
        return Ok(());
    }

    println!("{}", output::records_table(&classification.records));
    println!(
        "{} transactions ({} transfers, {} card settlements)",
        classification.records.len(),
        classification.transaction_stats.transfers,
        classification.transaction_stats.settlements
    );

    Ok(())
}
