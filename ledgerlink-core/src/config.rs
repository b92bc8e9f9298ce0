//! Configuration management
//!
//! The configuration lives in a JSON file (by default `~/.ledgerlink/config.json`):
//! ```json
//! {
//!   "ledger": { "baseUrl": "https://ledger.example.com/api/v1", "token": "..." },
//!   "scraper": { "baseUrl": "http://localhost:9000" },
//!   "identityStrategy": "hash",
//!   "dateToleranceDays": 2,
//!   "concurrency": "all",
//!   "accounts": [
//!     { "key": "leumi", "accountType": "leumi", "kind": "bank", "credentials": { ... } }
//!   ],
//!   "settlementRules": [
//!     { "kind": "billingCycle", "description": "ISRACARD", "creditCards": ["6943", "1234"] },
//!     { "kind": "static", "description": "AMEX", "sourceAccount": "12345678",
//!       "creditCard": "Amex Gold", "dayRange": { "from": 1, "to": 15 } }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::result::{Error, Result};
use crate::domain::AccountKind;
use crate::services::normalize::IdentityStrategy;

/// Environment variable that overrides `ledger.token`
pub const LEDGER_TOKEN_ENV: &str = "LEDGERLINK_LEDGER_TOKEN";

const DEFAULT_LEDGER_TIMEOUT_SECS: u64 = 120;
const DEFAULT_SCRAPER_TIMEOUT_SECS: u64 = 600;
const DEFAULT_DATE_TOLERANCE_DAYS: i64 = 2;
const DEFAULT_LOOKBACK_DAYS: i64 = 90;
const DEFAULT_OVERLAP_DAYS: i64 = 7;
const DEFAULT_BACKFILL_DAYS: i64 = 365;

/// Raw config file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    ledger: LedgerSettings,
    #[serde(default)]
    scraper: Option<ScraperSettings>,
    #[serde(default = "default_identity_strategy")]
    identity_strategy: String,
    #[serde(default = "default_date_tolerance")]
    date_tolerance_days: i64,
    #[serde(default)]
    concurrency: Concurrency,
    #[serde(default)]
    max_parallel: Option<usize>,
    #[serde(default = "default_currency")]
    default_currency: String,
    #[serde(default = "default_lookback")]
    lookback_days: i64,
    #[serde(default = "default_overlap")]
    overlap_days: i64,
    #[serde(default = "default_backfill")]
    backfill_days: i64,
    #[serde(default)]
    merchant_accounts: bool,
    #[serde(default)]
    accounts: Vec<SourceAccount>,
    #[serde(default)]
    settlement_rules: Vec<SettlementRule>,
}

fn default_identity_strategy() -> String {
    "hash".to_string()
}

fn default_date_tolerance() -> i64 {
    DEFAULT_DATE_TOLERANCE_DAYS
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_lookback() -> i64 {
    DEFAULT_LOOKBACK_DAYS
}

fn default_overlap() -> i64 {
    DEFAULT_OVERLAP_DAYS
}

fn default_backfill() -> i64 {
    DEFAULT_BACKFILL_DAYS
}

fn default_ledger_timeout() -> u64 {
    DEFAULT_LEDGER_TIMEOUT_SECS
}

fn default_scraper_timeout() -> u64 {
    DEFAULT_SCRAPER_TIMEOUT_SECS
}

/// Where the ledger API lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSettings {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_ledger_timeout")]
    pub timeout_secs: u64,
}

/// Where the scraper service lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScraperSettings {
    pub base_url: String,
    #[serde(default = "default_scraper_timeout")]
    pub timeout_secs: u64,
}

/// How source accounts are scraped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Concurrency {
    /// All accounts at once (optionally bounded by `maxParallel`)
    #[default]
    All,
    /// One account at a time
    Sequential,
}

/// A login at a bank or card company
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAccount {
    /// Stable key, used for `--only-accounts` and the import watermark
    pub key: String,
    /// Company identifier understood by the scraper
    pub account_type: String,
    pub kind: AccountKind,
    #[serde(default)]
    pub credentials: JsonValue,
}

/// Inclusive day-of-month range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRange {
    pub from: u32,
    pub to: u32,
}

impl DayRange {
    pub fn contains(&self, day: u32) -> bool {
        self.from <= day && day <= self.to
    }
}

/// Settlement withdrawals whose description matches are paid to one of `credit_cards`,
/// decided by the card's net charges for the billing cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingCycleRule {
    pub description: String,
    /// Card account numbers, last-4 suffixes or names
    pub credit_cards: Vec<String>,
}

/// Fixed mapping of a withdrawal to a credit-card account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticRule {
    pub description: String,
    /// Bank account number, suffix or name the withdrawal must come from
    pub source_account: String,
    /// Card account number or name; created if the ledger has no such account
    pub credit_card: String,
    #[serde(default)]
    pub day_range: Option<DayRange>,
}

/// A settlement rule, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SettlementRule {
    BillingCycle(BillingCycleRule),
    Static(StaticRule),
}

/// Case-insensitive substring match used by all description rules
pub fn description_matches(pattern: &str, description: &str) -> bool {
    description
        .to_lowercase()
        .contains(&pattern.trim().to_lowercase())
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub ledger: LedgerSettings,
    pub scraper: Option<ScraperSettings>,
    pub identity_strategy: IdentityStrategy,
    pub date_tolerance_days: i64,
    pub concurrency: Concurrency,
    pub max_parallel: Option<usize>,
    pub default_currency: String,
    pub lookback_days: i64,
    pub overlap_days: i64,
    pub backfill_days: i64,
    pub merchant_accounts: bool,
    pub accounts: Vec<SourceAccount>,
    pub settlement_rules: Vec<SettlementRule>,
}

impl Config {
    /// Load and validate the config file at `path`
    ///
    /// The ledger token can be supplied through `LEDGERLINK_LEDGER_TOKEN` instead of the file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file at {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_json(&content)?;

        if let Ok(token) = std::env::var(LEDGER_TOKEN_ENV) {
            if !token.trim().is_empty() {
                config.ledger.token = Some(token);
            }
        }

        Ok(config)
    }

    /// Parse and validate configuration JSON
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: ConfigFile = serde_json::from_str(content)
            .map_err(|e| Error::config(format!("Failed to parse config: {}", e)))?;
        Self::from_file(raw)
    }

    fn from_file(raw: ConfigFile) -> Result<Self> {
        let identity_strategy: IdentityStrategy = raw.identity_strategy.parse()?;

        validate_url("ledger.baseUrl", &raw.ledger.base_url)?;
        if let Some(scraper) = &raw.scraper {
            validate_url("scraper.baseUrl", &scraper.base_url)?;
        }

        if raw.date_tolerance_days < 0 {
            return Err(Error::config("dateToleranceDays must not be negative"));
        }
        for (name, days) in [
            ("lookbackDays", raw.lookback_days),
            ("overlapDays", raw.overlap_days),
            ("backfillDays", raw.backfill_days),
        ] {
            if days < 0 {
                return Err(Error::config(format!("{} must not be negative", name)));
            }
        }
        if raw.max_parallel == Some(0) {
            return Err(Error::config("maxParallel must be at least 1"));
        }
        if raw.default_currency.trim().is_empty() {
            return Err(Error::config("defaultCurrency cannot be empty"));
        }

        let mut keys = HashSet::new();
        for account in &raw.accounts {
            if account.key.trim().is_empty() {
                return Err(Error::config("account key cannot be empty"));
            }
            if !keys.insert(account.key.as_str()) {
                return Err(Error::config(format!("duplicate account key '{}'", account.key)));
            }
            if account.account_type.trim().is_empty() {
                return Err(Error::config(format!(
                    "account '{}' is missing accountType",
                    account.key
                )));
            }
            if account.kind == AccountKind::Expense {
                return Err(Error::config(format!(
                    "account '{}' must be of kind bank or creditCard",
                    account.key
                )));
            }
        }

        for (i, rule) in raw.settlement_rules.iter().enumerate() {
            validate_rule(i, rule)?;
        }

        Ok(Self {
            ledger: raw.ledger,
            scraper: raw.scraper,
            identity_strategy,
            date_tolerance_days: raw.date_tolerance_days,
            concurrency: raw.concurrency,
            max_parallel: raw.max_parallel,
            default_currency: raw.default_currency.trim().to_uppercase(),
            lookback_days: raw.lookback_days,
            overlap_days: raw.overlap_days,
            backfill_days: raw.backfill_days,
            merchant_accounts: raw.merchant_accounts,
            accounts: raw.accounts,
            settlement_rules: raw.settlement_rules,
        })
    }
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| Error::config(format!("{} is not a valid URL ({}): {}", field, value, e)))
}

fn validate_rule(index: usize, rule: &SettlementRule) -> Result<()> {
    match rule {
        SettlementRule::BillingCycle(r) => {
            if r.description.trim().is_empty() {
                return Err(Error::config(format!("settlementRules[{}]: empty description", index)));
            }
            if r.credit_cards.is_empty() {
                return Err(Error::config(format!(
                    "settlementRules[{}]: billingCycle rule needs at least one credit card",
                    index
                )));
            }
        }
        SettlementRule::Static(r) => {
            if r.description.trim().is_empty() {
                return Err(Error::config(format!("settlementRules[{}]: empty description", index)));
            }
            if r.source_account.trim().is_empty() || r.credit_card.trim().is_empty() {
                return Err(Error::config(format!(
                    "settlementRules[{}]: static rule needs sourceAccount and creditCard",
                    index
                )));
            }
            if let Some(range) = r.day_range {
                if range.from < 1 || range.to > 31 || range.from > range.to {
                    return Err(Error::config(format!(
                        "settlementRules[{}]: invalid dayRange {}-{}",
                        index, range.from, range.to
                    )));
                }
            }
        }
    }
    Ok(())
}
