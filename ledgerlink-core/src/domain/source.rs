//! Raw data as returned by the scraper service

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Result of scraping one source login (which may expose several accounts)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResult {
    pub success: bool,
    #[serde(default)]
    pub accounts: Vec<ScrapedAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ScrapeResult {
    pub fn ok(accounts: Vec<ScrapedAccount>) -> Self {
        Self {
            success: true,
            accounts,
            error_type: None,
            error_message: None,
        }
    }

    pub fn failed(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            accounts: Vec::new(),
            error_type: Some(error_type.into()),
            error_message: Some(error_message.into()),
        }
    }

    /// Human readable failure description
    pub fn error_summary(&self) -> String {
        match (&self.error_type, &self.error_message) {
            (Some(t), Some(m)) => format!("{t}: {m}"),
            (Some(t), None) => t.clone(),
            (None, Some(m)) => m.clone(),
            (None, None) => "scrape failed without details".to_string(),
        }
    }
}

/// One account (bank account or card) inside a scrape result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedAccount {
    #[serde(deserialize_with = "deserialize_id")]
    pub account_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Decimal>,
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

/// A transaction exactly as a source reports it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    /// Source-side identifier (numbers and strings both appear on the wire)
    #[serde(default, deserialize_with = "deserialize_optional_id", skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// `YYYY-MM-DD` or RFC 3339 timestamp
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_date: Option<String>,
    pub original_amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charged_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charged_currency: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    /// "completed" or "pending"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Free reference, e.g. the card suffix on a settlement withdrawal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl RawTransaction {
    pub fn is_pending(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("pending"))
            .unwrap_or(false)
    }
}

/// Deserialize ID that can be number or string
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: JsonValue = Deserialize::deserialize(deserializer)?;
    match value {
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::String(s) => Ok(s),
        _ => Err(D::Error::custom("expected number or string for id")),
    }
}

/// Deserialize optional ID that can be number or string
pub(crate) fn deserialize_optional_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<JsonValue> = Option::deserialize(deserializer)?;
    match value {
        Some(JsonValue::Number(n)) => Ok(Some(n.to_string())),
        Some(JsonValue::String(s)) if !s.is_empty() => Ok(Some(s)),
        Some(JsonValue::String(_)) | Some(JsonValue::Null) | None => Ok(None),
        _ => Err(D::Error::custom("expected number or string for id")),
    }
}
