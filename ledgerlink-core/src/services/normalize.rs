//! Normalizer - raw source transactions to canonical records

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::result::{Error, Result};
use crate::domain::{Account, AccountKind, RawTransaction, TransactionRecord, TransactionType};

/// Tag attached to pending source transactions
pub const PENDING_TAG: &str = "pending";

/// How `external_id` is derived for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStrategy {
    /// Content hash over every field except account, category and tags
    Hash,
    /// The source's own identifier (hash when the source has none)
    Identifier,
}

impl FromStr for IdentityStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hash" | "content-hash" => Ok(IdentityStrategy::Hash),
            "identifier" | "passthrough" => Ok(IdentityStrategy::Identifier),
            _ => Err(Error::UnknownIdentityStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for IdentityStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityStrategy::Hash => f.write_str("hash"),
            IdentityStrategy::Identifier => f.write_str("identifier"),
        }
    }
}

/// Converts raw source transactions into `TransactionRecord`s for one owning account
#[derive(Debug, Clone)]
pub struct Normalizer {
    strategy: IdentityStrategy,
    default_currency: String,
}

impl Normalizer {
    pub fn new(strategy: IdentityStrategy, default_currency: impl Into<String>) -> Self {
        Self {
            strategy,
            default_currency: default_currency.into(),
        }
    }

    /// Normalize `raw`, owned by `account`
    ///
    /// The sign of the amount decides the type: negative is a withdrawal out of the
    /// account, anything else a deposit into it.
    pub fn normalize(&self, raw: &RawTransaction, account: &Account) -> Result<TransactionRecord> {
        let date = parse_source_date(&raw.date)
            .ok_or_else(|| Error::invalid_record(format!("unparseable date '{}'", raw.date)))?;
        let process_date = match raw.processed_date.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(value) => Some(parse_source_date(value).ok_or_else(|| {
                Error::invalid_record(format!("unparseable processed date '{}'", value))
            })?),
            None => None,
        };

        let signed = raw.charged_amount.unwrap_or(raw.original_amount);
        let transaction_type = if signed.is_sign_negative() && !signed.is_zero() {
            TransactionType::Withdrawal
        } else {
            TransactionType::Deposit
        };

        let currency_code = normalize_currency(
            raw.charged_currency
                .as_deref()
                .or(raw.original_currency.as_deref()),
            &self.default_currency,
        );

        let description = Some(raw.description.trim())
            .filter(|d| !d.is_empty())
            .or_else(|| raw.memo.as_deref().map(str::trim).filter(|m| !m.is_empty()))
            .unwrap_or("(no description)")
            .to_string();

        let mut tags = BTreeSet::new();
        if account.kind == AccountKind::CreditCard {
            if let Some(process_date) = process_date {
                tags.insert(settlement_tag(&account.id, process_date));
            }
        }
        if raw.is_pending() {
            tags.insert(PENDING_TAG.to_string());
        }

        let (source_account_id, destination_account_id) = match transaction_type {
            TransactionType::Withdrawal => (Some(account.id.clone()), None),
            _ => (None, Some(account.id.clone())),
        };

        let mut record = TransactionRecord {
            transaction_type,
            date,
            amount: signed.abs(),
            description,
            notes: raw.memo.as_deref().map(str::trim).unwrap_or_default().to_string(),
            source_account_id,
            destination_account_id,
            external_id: String::new(),
            currency_code,
            category_name: raw
                .category
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            internal_reference: raw
                .reference
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            tags,
            process_date,
        };

        record.external_id = match (self.strategy, raw.identifier.as_deref()) {
            (IdentityStrategy::Identifier, Some(identifier)) => identifier.to_string(),
            (IdentityStrategy::Identifier, None) => {
                debug!(
                    description = %record.description,
                    "Source transaction has no identifier, falling back to content hash"
                );
                content_hash(&record)
            }
            (IdentityStrategy::Hash, _) => content_hash(&record),
        };

        Ok(record)
    }
}

/// Tag used to bucket a card's charges by billing cycle: `{accountId}_{YYYY-MM-DD}`
pub fn settlement_tag(account_id: &str, process_date: NaiveDate) -> String {
    format!("{}_{}", account_id, process_date.format("%Y-%m-%d"))
}

/// Content hash of a record
///
/// Covers type, date, amount, description, notes, currency, reference and process
/// date. Account ids, category and tags are excluded.
pub fn content_hash(record: &TransactionRecord) -> String {
    let canonical = serde_json::json!([
        record.transaction_type.as_str(),
        record.date.format("%Y-%m-%d").to_string(),
        format!("{:.2}", normalize_zero(record.amount).round_dp(2)),
        record.description,
        record.notes,
        record.currency_code,
        record.internal_reference,
        record.process_date.map(|d| d.format("%Y-%m-%d").to_string()),
    ])
    .to_string();

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

// -0 and 0 must hash alike
fn normalize_zero(amount: Decimal) -> Decimal {
    if amount.is_zero() {
        Decimal::ZERO
    } else {
        amount
    }
}

/// Map currency symbols to ISO codes; anything else is trimmed and uppercased
pub fn normalize_currency(currency: Option<&str>, default: &str) -> String {
    let currency = currency.map(str::trim).filter(|c| !c.is_empty());
    match currency {
        None => default.trim().to_uppercase(),
        Some("₪") => "ILS".to_string(),
        Some("$") => "USD".to_string(),
        Some("€") => "EUR".to_string(),
        Some("£") => "GBP".to_string(),
        Some(code) if code.eq_ignore_ascii_case("nis") => "ILS".to_string(),
        Some(code) => code.to_uppercase(),
    }
}

/// Parse `YYYY-MM-DD`, RFC 3339, or a naive ISO timestamp into a date.
///
/// Timestamps keep the date in their own offset.
pub fn parse_source_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Some(datetime.date_naive());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.date())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> Account {
        Account::new("10", "Checking", AccountKind::Bank).with_number("12345678")
    }

    fn card() -> Account {
        Account::new("20", "Visa", AccountKind::CreditCard).with_number("4580000000006943")
    }

    fn raw(amount: i64, date: &str) -> RawTransaction {
        RawTransaction {
            identifier: Some("src-1".to_string()),
            date: date.to_string(),
            original_amount: Decimal::new(amount, 2),
            description: "SUPER PHARM".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_identity_strategy_parsing() {
        assert_eq!("hash".parse::<IdentityStrategy>().unwrap(), IdentityStrategy::Hash);
        assert_eq!(
            "Identifier".parse::<IdentityStrategy>().unwrap(),
            IdentityStrategy::Identifier
        );
        let err = "sha1".parse::<IdentityStrategy>().unwrap_err();
        assert!(matches!(err, Error::UnknownIdentityStrategy(_)));
    }

    #[test]
    fn test_sign_determines_type() {
        let normalizer = Normalizer::new(IdentityStrategy::Hash, "ILS");

        let withdrawal = normalizer.normalize(&raw(-5000, "2024-01-15"), &bank()).unwrap();
        assert_eq!(withdrawal.transaction_type, TransactionType::Withdrawal);
        assert_eq!(withdrawal.amount, Decimal::new(5000, 2));
        assert_eq!(withdrawal.source_account_id.as_deref(), Some("10"));
        assert_eq!(withdrawal.destination_account_id, None);
        assert!(withdrawal.validate().is_ok());

        let deposit = normalizer.normalize(&raw(5000, "2024-01-15"), &bank()).unwrap();
        assert_eq!(deposit.transaction_type, TransactionType::Deposit);
        assert_eq!(deposit.destination_account_id.as_deref(), Some("10"));
        assert_eq!(deposit.currency_code, "ILS");
        assert!(deposit.validate().is_ok());
    }

    #[test]
    fn test_charged_amount_wins_over_original() {
        let normalizer = Normalizer::new(IdentityStrategy::Hash, "ILS");
        let mut tx = raw(-10000, "2024-01-15");
        tx.original_currency = Some("$".to_string());
        tx.charged_amount = Some(Decimal::new(-36512, 2));
        tx.charged_currency = Some("₪".to_string());
        let record = normalizer.normalize(&tx, &bank()).unwrap();
        assert_eq!(record.amount, Decimal::new(36512, 2));
        assert_eq!(record.currency_code, "ILS");
    }

    #[test]
    fn test_hash_is_deterministic_and_ignores_account() {
        let normalizer = Normalizer::new(IdentityStrategy::Hash, "ILS");
        let a = normalizer.normalize(&raw(-5000, "2024-01-15"), &bank()).unwrap();
        let b = normalizer.normalize(&raw(-5000, "2024-01-15"), &bank()).unwrap();
        assert_eq!(a.external_id, b.external_id);
        assert_eq!(a.external_id.len(), 32);

        let mut other_account = bank();
        other_account.id = "99".to_string();
        let c = normalizer.normalize(&raw(-5000, "2024-01-15"), &other_account).unwrap();
        assert_eq!(a.external_id, c.external_id);

        let d = normalizer.normalize(&raw(-5001, "2024-01-15"), &bank()).unwrap();
        assert_ne!(a.external_id, d.external_id);
    }

    #[test]
    fn test_hash_ignores_category() {
        let normalizer = Normalizer::new(IdentityStrategy::Hash, "ILS");
        let plain = raw(-5000, "2024-01-15");
        let mut categorized = plain.clone();
        categorized.category = Some("Health".to_string());
        assert_eq!(
            normalizer.normalize(&plain, &bank()).unwrap().external_id,
            normalizer.normalize(&categorized, &bank()).unwrap().external_id
        );
    }

    #[test]
    fn test_identifier_passthrough_and_fallback() {
        let normalizer = Normalizer::new(IdentityStrategy::Identifier, "ILS");
        let record = normalizer.normalize(&raw(-5000, "2024-01-15"), &bank()).unwrap();
        assert_eq!(record.external_id, "src-1");

        let mut anonymous = raw(-5000, "2024-01-15");
        anonymous.identifier = None;
        let record = normalizer.normalize(&anonymous, &bank()).unwrap();
        assert_eq!(record.external_id, content_hash(&record));
    }

    #[test]
    fn test_credit_card_records_get_settlement_tag() {
        let normalizer = Normalizer::new(IdentityStrategy::Hash, "ILS");
        let mut tx = raw(-12000, "2024-01-03T22:00:00.000Z");
        tx.processed_date = Some("2024-02-02".to_string());
        tx.status = Some("pending".to_string());
        let record = normalizer.normalize(&tx, &card()).unwrap();
        assert!(record.tags.contains("20_2024-02-02"));
        assert!(record.tags.contains(PENDING_TAG));
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
        assert_eq!(record.process_date, NaiveDate::from_ymd_opt(2024, 2, 2));
    }

    #[test]
    fn test_bad_date_is_invalid_record() {
        let normalizer = Normalizer::new(IdentityStrategy::Hash, "ILS");
        let err = normalizer.normalize(&raw(-100, "yesterday"), &bank()).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
    }

    #[test]
    fn test_currency_normalization() {
        assert_eq!(normalize_currency(Some("nis"), "USD"), "ILS");
        assert_eq!(normalize_currency(Some(" eur "), "USD"), "EUR");
        assert_eq!(normalize_currency(Some("€"), "USD"), "EUR");
        assert_eq!(normalize_currency(None, "ils"), "ILS");
    }

    #[test]
    fn test_parse_source_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15);
        assert_eq!(parse_source_date("2024-01-15"), expected);
        assert_eq!(parse_source_date("2024-01-15T10:00:00+02:00"), expected);
        assert_eq!(parse_source_date("2024-01-15T10:00:00.000"), expected);
        assert_eq!(parse_source_date("15/01/2024"), None);
    }
}
