//! Ledger port - the bookkeeping system of record

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::result::Result;
use crate::domain::{Account, AccountSpec, LedgerEntry, TransactionRecord};

/// Ledger abstraction
///
/// Implementations must treat "not found" on reads as empty data rather than an
/// error. List endpoints return every page.
#[async_trait]
pub trait Ledger: Send + Sync {
    // === Transactions ===

    /// Transactions dated on or after `date_after`, optionally restricted to a tag
    async fn search_transactions(
        &self,
        date_after: NaiveDate,
        tag_query: Option<&str>,
    ) -> Result<Vec<LedgerEntry>>;

    /// Every transaction in the ledger
    async fn get_all_transactions(&self) -> Result<Vec<LedgerEntry>>;

    /// Store a new transaction, returning its ledger id
    async fn create_transaction(&self, record: &TransactionRecord) -> Result<String>;

    /// Patch an existing transaction in place (the type cannot change)
    async fn update_transaction(&self, id: &str, record: &TransactionRecord) -> Result<()>;

    async fn delete_transaction(&self, id: &str) -> Result<()>;

    // === Accounts ===

    async fn get_accounts(&self) -> Result<Vec<Account>>;

    async fn create_account(&self, spec: &AccountSpec) -> Result<Account>;

    // === Key-value configuration ===

    /// Read a stored blob; `None` if the key was never written
    async fn get_config_blob(&self, key: &str) -> Result<Option<String>>;

    async fn put_config_blob(&self, key: &str, value: &str) -> Result<()>;
}
