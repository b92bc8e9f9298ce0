//! Ledgerlink Core - bank and card transaction reconciliation
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core business entities (TransactionRecord, LedgerEntry, Account, plans)
//! - **ports**: Trait definitions for external dependencies (Ledger, TransactionSource)
//! - **services**: Normalization, matching, planning and the sync pipeline
//! - **adapters**: Concrete implementations (HTTP ledger, scraper service, in-memory)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod services;

use std::sync::Arc;

use anyhow::{Context, Result};

use adapters::http_ledger::HttpLedger;
use adapters::scraper::ScraperServiceSource;
use config::Config;
use ports::{Ledger, TransactionSource};
use services::{MaintenanceService, SyncService};

// Re-export commonly used types at crate root
pub use domain::result::Error;
pub use domain::{
    Account, AccountKind, LedgerEntry, ReconciliationPlan, ScrapeResult, TransactionRecord,
    TransactionType,
};

/// Main context for ledgerlink operations
///
/// Holds the configuration, the ledger connection and the services built on them.
pub struct LedgerLinkContext {
    pub config: Config,
    pub ledger: Arc<dyn Ledger>,
    pub sync_service: SyncService,
    pub maintenance_service: MaintenanceService,
}

impl LedgerLinkContext {
    /// Create a context talking to the configured ledger and scraper services
    pub fn new(config: Config) -> Result<Self> {
        let ledger = HttpLedger::new(&config.ledger).context("Failed to create ledger client")?;
        let scraper_settings = config
            .scraper
            .as_ref()
            .context("No scraper service configured (set `scraper.baseUrl`)")?;
        let source =
            ScraperServiceSource::new(scraper_settings).context("Failed to create scraper client")?;

        Ok(Self::with_adapters(config, Arc::new(ledger), Arc::new(source)))
    }

    /// Create a context for maintenance commands, which never scrape
    pub fn for_maintenance(config: Config) -> Result<Self> {
        let ledger = HttpLedger::new(&config.ledger).context("Failed to create ledger client")?;
        let source = adapters::memory::StaticSource::new();
        Ok(Self::with_adapters(config, Arc::new(ledger), Arc::new(source)))
    }

    /// Create a context over arbitrary adapters
    pub fn with_adapters(
        config: Config,
        ledger: Arc<dyn Ledger>,
        source: Arc<dyn TransactionSource>,
    ) -> Self {
        let sync_service = SyncService::new(Arc::clone(&ledger), source, config.clone());
        let maintenance_service =
            MaintenanceService::new(Arc::clone(&ledger), config.date_tolerance_days);

        Self {
            config,
            ledger,
            sync_service,
            maintenance_service,
        }
    }
}
