//! Snapshot of a transaction already stored in the ledger

use std::collections::BTreeSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::source::{deserialize_id, deserialize_optional_id};
use super::transaction::{TransactionRecord, TransactionType};

/// A transaction as the ledger reports it. Read-only within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub date: NaiveDate,
    pub amount: Decimal,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub source_account_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub destination_account_id: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub category_name: Option<String>,
}

impl LedgerEntry {
    /// Build the entry the ledger would store for `record` under `id`
    pub fn from_record(id: impl Into<String>, record: &TransactionRecord) -> Self {
        Self {
            id: id.into(),
            transaction_type: record.transaction_type,
            date: record.date,
            amount: record.amount,
            description: record.description.clone(),
            notes: record.notes.clone(),
            source_account_id: record.source_account_id.clone(),
            destination_account_id: record.destination_account_id.clone(),
            external_id: Some(record.external_id.clone()),
            tags: record.tags.clone(),
            category_name: record.category_name.clone(),
        }
    }

    pub fn is_transfer(&self) -> bool {
        self.transaction_type == TransactionType::Transfer
    }

    /// Amount with deposit=+amount, otherwise -amount
    pub fn signed_amount(&self) -> Decimal {
        self.transaction_type.sign(self.amount)
    }

    /// Rebuild a canonical record from this entry, if it carries an external id
    pub fn to_record(&self) -> Option<TransactionRecord> {
        let external_id = self.external_id.clone().filter(|id| !id.is_empty())?;
        Some(TransactionRecord {
            transaction_type: self.transaction_type,
            date: self.date,
            amount: self.amount,
            description: self.description.clone(),
            notes: self.notes.clone(),
            source_account_id: self.source_account_id.clone(),
            destination_account_id: self.destination_account_id.clone(),
            external_id,
            currency_code: String::new(),
            category_name: self.category_name.clone(),
            internal_reference: None,
            tags: self.tags.clone(),
            process_date: None,
        })
    }
}
