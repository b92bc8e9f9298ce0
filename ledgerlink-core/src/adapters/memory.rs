//! In-memory ledger and source
//!
//! Implementations of both ports that keep everything in process memory. Used by
//! the test suites and handy for trying out rule configurations offline.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value as JsonValue;

use crate::domain::result::{Error, Result};
use crate::domain::{Account, AccountSpec, LedgerEntry, ScrapeResult, TransactionRecord};
use crate::ports::{Ledger, TransactionSource};

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<LedgerEntry>,
    accounts: Vec<Account>,
    blobs: HashMap<String, String>,
    next_id: u64,
    failing_external_ids: HashSet<String>,
    unreachable: bool,
}

impl LedgerState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable {
            Err(Error::ledger("ledger unreachable"))
        } else {
            Ok(())
        }
    }

    fn check_writable(&self, external_id: Option<&str>) -> Result<()> {
        self.check_reachable()?;
        match external_id {
            Some(id) if self.failing_external_ids.contains(id) => {
                Err(Error::ledger(format!("write rejected for '{}'", id)))
            }
            _ => Ok(()),
        }
    }
}

/// Ledger backed by a vector of entries
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: Vec<Account>) -> Self {
        let ledger = Self::new();
        {
            let mut state = ledger.lock();
            state.next_id = accounts.len() as u64;
            state.accounts = accounts;
        }
        ledger
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        // A poisoned lock only means another test thread panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `record` directly, bypassing failure injection. Returns the new id.
    pub fn insert_record(&self, record: &TransactionRecord) -> String {
        let mut state = self.lock();
        let id = state.allocate_id();
        state.entries.push(LedgerEntry::from_record(id.clone(), record));
        id
    }

    /// Snapshot of every stored entry
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().entries.clone()
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.lock().accounts.clone()
    }

    pub fn blob(&self, key: &str) -> Option<String> {
        self.lock().blobs.get(key).cloned()
    }

    /// Make every write touching `external_id` fail
    pub fn fail_writes_for(&self, external_id: impl Into<String>) {
        self.lock().failing_external_ids.insert(external_id.into());
    }

    /// Make every call fail as if the ledger were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn search_transactions(
        &self,
        date_after: NaiveDate,
        tag_query: Option<&str>,
    ) -> Result<Vec<LedgerEntry>> {
        let state = self.lock();
        state.check_reachable()?;
        Ok(state
            .entries
            .iter()
            .filter(|entry| entry.date >= date_after)
            .filter(|entry| tag_query.map_or(true, |tag| entry.tags.contains(tag)))
            .cloned()
            .collect())
    }

    async fn get_all_transactions(&self) -> Result<Vec<LedgerEntry>> {
        let state = self.lock();
        state.check_reachable()?;
        Ok(state.entries.clone())
    }

    async fn create_transaction(&self, record: &TransactionRecord) -> Result<String> {
        let mut state = self.lock();
        state.check_writable(Some(&record.external_id))?;
        record.validate().map_err(Error::validation)?;
        let id = state.allocate_id();
        state.entries.push(LedgerEntry::from_record(id.clone(), record));
        Ok(id)
    }

    async fn update_transaction(&self, id: &str, record: &TransactionRecord) -> Result<()> {
        let mut state = self.lock();
        state.check_writable(Some(&record.external_id))?;
        let entry = state
            .entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| Error::not_found(format!("transaction {}", id)))?;
        if entry.transaction_type != record.transaction_type {
            return Err(Error::validation("transaction type cannot be changed in place"));
        }
        *entry = LedgerEntry::from_record(id, record);
        Ok(())
    }

    async fn delete_transaction(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        let position = state
            .entries
            .iter()
            .position(|entry| entry.id == id)
            .ok_or_else(|| Error::not_found(format!("transaction {}", id)))?;
        let external_id = state.entries[position].external_id.clone();
        state.check_writable(external_id.as_deref())?;
        state.entries.remove(position);
        Ok(())
    }

    async fn get_accounts(&self) -> Result<Vec<Account>> {
        let state = self.lock();
        state.check_reachable()?;
        Ok(state.accounts.clone())
    }

    async fn create_account(&self, spec: &AccountSpec) -> Result<Account> {
        let mut state = self.lock();
        state.check_reachable()?;
        let account = Account {
            id: state.allocate_id(),
            name: spec.name.clone(),
            account_number: spec.account_number.clone(),
            kind: spec.kind,
            account_type: spec.account_type.clone(),
        };
        state.accounts.push(account.clone());
        Ok(account)
    }

    async fn get_config_blob(&self, key: &str) -> Result<Option<String>> {
        let state = self.lock();
        state.check_reachable()?;
        Ok(state.blobs.get(key).cloned())
    }

    async fn put_config_blob(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.lock();
        state.check_reachable()?;
        state.blobs.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Source returning canned scrape results per account type
#[derive(Debug, Default)]
pub struct StaticSource {
    results: HashMap<String, std::result::Result<ScrapeResult, String>>,
    calls: Mutex<Vec<(String, NaiveDate)>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, account_type: impl Into<String>, result: ScrapeResult) -> Self {
        self.results.insert(account_type.into(), Ok(result));
        self
    }

    /// Fail `account_type` with a transport error
    pub fn with_error(mut self, account_type: impl Into<String>, message: impl Into<String>) -> Self {
        self.results.insert(account_type.into(), Err(message.into()));
        self
    }

    /// `(account_type, start_date)` of every scrape call so far, in call order
    pub fn calls(&self) -> Vec<(String, NaiveDate)> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl TransactionSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn scrape(
        &self,
        account_type: &str,
        _credentials: &JsonValue,
        start_date: NaiveDate,
    ) -> Result<ScrapeResult> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((account_type.to_string(), start_date));
        }
        match self.results.get(account_type) {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(message)) => Err(Error::Source(message.clone())),
            None => Ok(ScrapeResult::failed(
                "UNKNOWN_ACCOUNT",
                format!("no canned result for '{}'", account_type),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[tokio::test]
    async fn test_search_filters_by_date_and_tag() {
        let ledger = InMemoryLedger::new();
        let mut tagged = TransactionRecord::withdrawal("a", date(10), Decimal::ONE, "1");
        tagged.tags.insert("1_2024-02-02".to_string());
        ledger.insert_record(&tagged);
        ledger.insert_record(&TransactionRecord::withdrawal("b", date(2), Decimal::ONE, "1"));

        let all = ledger.search_transactions(date(1), None).await.unwrap();
        assert_eq!(all.len(), 2);
        let recent = ledger.search_transactions(date(5), None).await.unwrap();
        assert_eq!(recent.len(), 1);
        let by_tag = ledger.search_transactions(date(1), Some("1_2024-02-02")).await.unwrap();
        assert_eq!(by_tag[0].external_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let ledger = InMemoryLedger::new();
        ledger.fail_writes_for("bad");
        let record = TransactionRecord::deposit("bad", date(1), Decimal::ONE, "1");
        assert!(ledger.create_transaction(&record).await.is_err());

        ledger.set_unreachable(true);
        assert!(ledger.get_accounts().await.is_err());
    }

    #[tokio::test]
    async fn test_update_cannot_change_type() {
        let ledger = InMemoryLedger::new();
        let record = TransactionRecord::deposit("x", date(1), Decimal::ONE, "1");
        let id = ledger.insert_record(&record);
        let transfer = record.into_transfer("2".to_string(), "1".to_string());
        let err = ledger.update_transaction(&id, &transfer).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_static_source_records_calls() {
        let source = StaticSource::new().with_error("leumi", "timeout");
        assert!(source.scrape("leumi", &JsonValue::Null, date(3)).await.is_err());
        let unknown = source.scrape("max", &JsonValue::Null, date(4)).await.unwrap();
        assert!(!unknown.success);
        assert_eq!(source.calls(), vec![("leumi".to_string(), date(3)), ("max".to_string(), date(4))]);
    }
}
