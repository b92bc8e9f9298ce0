//! Transaction record domain model

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Two amounts closer than this are considered equal (one cent).
pub const AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Ledger transaction type. Immutable once stored in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Transfer => "transfer",
        }
    }

    /// Sign applied to an amount of this type when netting: deposits add, the rest subtract.
    pub fn sign(&self, amount: Decimal) -> Decimal {
        match self {
            TransactionType::Deposit => amount,
            _ => -amount,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical transaction record produced by normalization and consumed by the matchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub date: NaiveDate,
    /// Always non-negative; direction is carried by `transaction_type`
    pub amount: Decimal,
    pub description: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_account_id: Option<String>,
    pub external_id: String,
    pub currency_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_reference: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_date: Option<NaiveDate>,
}

impl TransactionRecord {
    /// Create a deposit into `destination`
    pub fn deposit(
        external_id: impl Into<String>,
        date: NaiveDate,
        amount: Decimal,
        destination: impl Into<String>,
    ) -> Self {
        let mut record = Self::blank(TransactionType::Deposit, external_id, date, amount);
        record.destination_account_id = Some(destination.into());
        record
    }

    /// Create a withdrawal out of `source`
    pub fn withdrawal(
        external_id: impl Into<String>,
        date: NaiveDate,
        amount: Decimal,
        source: impl Into<String>,
    ) -> Self {
        let mut record = Self::blank(TransactionType::Withdrawal, external_id, date, amount);
        record.source_account_id = Some(source.into());
        record
    }

    fn blank(
        transaction_type: TransactionType,
        external_id: impl Into<String>,
        date: NaiveDate,
        amount: Decimal,
    ) -> Self {
        Self {
            transaction_type,
            date,
            amount: amount.abs(),
            description: String::new(),
            notes: String::new(),
            source_account_id: None,
            destination_account_id: None,
            external_id: external_id.into(),
            currency_code: String::new(),
            category_name: None,
            internal_reference: None,
            tags: BTreeSet::new(),
            process_date: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.internal_reference = Some(reference.into());
        self
    }

    pub fn with_process_date(mut self, process_date: NaiveDate) -> Self {
        self.process_date = Some(process_date);
        self
    }

    pub fn with_currency(mut self, currency_code: impl Into<String>) -> Self {
        self.currency_code = currency_code.into();
        self
    }

    pub fn is_deposit(&self) -> bool {
        self.transaction_type == TransactionType::Deposit
    }

    pub fn is_withdrawal(&self) -> bool {
        self.transaction_type == TransactionType::Withdrawal
    }

    /// Amount with the type's sign applied (deposit positive, everything else negative)
    pub fn signed_amount(&self) -> Decimal {
        self.transaction_type.sign(self.amount)
    }

    /// Date used to bucket credit-card charges into a billing cycle
    pub fn billing_date(&self) -> NaiveDate {
        self.process_date.unwrap_or(self.date)
    }

    /// Convert this record into a transfer between `source` and `destination`.
    pub fn into_transfer(mut self, source: String, destination: String) -> Self {
        self.transaction_type = TransactionType::Transfer;
        self.source_account_id = Some(source);
        self.destination_account_id = Some(destination);
        self.category_name = None;
        self
    }

    /// Append a line to the notes, skipping it if the notes already contain it
    pub fn append_note(&mut self, note: &str) {
        if note.is_empty() || self.notes.lines().any(|line| line == note) {
            return;
        }
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(note);
    }

    /// Check the per-type account invariants.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.external_id.trim().is_empty() {
            return Err("missing external id");
        }
        if self.amount.is_sign_negative() && !self.amount.is_zero() {
            return Err("amount must be non-negative");
        }
        match self.transaction_type {
            TransactionType::Transfer => match (
                self.source_account_id.as_deref(),
                self.destination_account_id.as_deref(),
            ) {
                (Some(source), Some(destination)) if source != destination => Ok(()),
                (Some(_), Some(_)) => Err("transfer accounts must differ"),
                _ => Err("transfer requires source and destination accounts"),
            },
            TransactionType::Deposit => {
                if self.destination_account_id.is_none() {
                    Err("deposit requires a destination account")
                } else if self.source_account_id.is_some() {
                    Err("deposit must not have a source account")
                } else {
                    Ok(())
                }
            }
            // Destination may be enriched with a merchant account
            TransactionType::Withdrawal => {
                if self.source_account_id.is_none() {
                    Err("withdrawal requires a source account")
                } else {
                    Ok(())
                }
            }
        }
    }
}
