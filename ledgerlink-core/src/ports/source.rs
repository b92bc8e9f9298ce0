//! Transaction source port
//!
//! Defines the interface for fetching raw transactions from bank and card
//! websites. Scraping itself happens outside this crate.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value as JsonValue;

use crate::domain::result::Result;
use crate::domain::ScrapeResult;

/// Raw transaction source
///
/// A failed login or scrape is reported through `ScrapeResult::success`; `Err` is
/// reserved for transport failures.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Source name used in logs (e.g., "scraper")
    fn name(&self) -> &str;

    /// Fetch all accounts and transactions since `start_date`
    ///
    /// # Arguments
    /// * `account_type` - Source-specific company identifier (e.g., "leumi", "isracard")
    /// * `credentials` - Opaque login credentials for that source
    /// * `start_date` - Earliest transaction date of interest
    async fn scrape(
        &self,
        account_type: &str,
        credentials: &JsonValue,
        start_date: NaiveDate,
    ) -> Result<ScrapeResult>;
}
