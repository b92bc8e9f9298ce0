//! Output formatting utilities

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use ledgerlink_core::services::SyncReport;
use ledgerlink_core::TransactionRecord;

/// Print a success message
pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{}", msg.red());
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{}", msg.yellow());
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{}", msg.cyan());
}

/// Create a styled table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Table of records: date, type, amount, description, accounts
pub fn records_table(records: &[TransactionRecord]) -> Table {
    let mut table = create_table();
    table.set_header(vec!["Date", "Type", "Amount", "Description", "From", "To"]);
    for record in records {
        table.add_row(vec![
            record.date.format("%Y-%m-%d").to_string(),
            record.transaction_type.to_string(),
            format!("{:.2} {}", record.amount, record.currency_code),
            record.description.clone(),
            record.source_account_id.clone().unwrap_or_default(),
            record.destination_account_id.clone().unwrap_or_default(),
        ]);
    }
    table
}

/// Print executor results, failures in red
pub fn print_report(report: &SyncReport) {
    println!("  Created: {}", report.created);
    println!("  Type changed: {}", report.type_updated);
    println!("  Destination added: {}", report.destinations_added);
    println!("  Updated: {}", report.fields_updated);
    println!("  Deleted: {}", report.deleted);

    if report.failed() > 0 {
        println!("  {} {}", "Failed:".red(), report.failed());
        for failure in &report.failures {
            println!(
                "    {} {} - {}",
                failure.action,
                failure.external_id,
                failure.error
            );
        }
    }
}
