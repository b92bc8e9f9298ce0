//! Last-import watermarks stored in the ledger's config blob

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use tracing::{debug, warn};

use crate::config::Config;
use crate::domain::result::Result;
use crate::ports::Ledger;

/// Config blob key holding `{ accountKey: RFC 3339 timestamp }`
pub const WATERMARK_KEY: &str = "last_import";

/// Per-account time of the last successful import
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Watermarks {
    entries: BTreeMap<String, DateTime<Utc>>,
}

impl Watermarks {
    pub fn get(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.get(key).copied()
    }

    pub fn set(&mut self, key: impl Into<String>, at: DateTime<Utc>) {
        self.entries.insert(key.into(), at);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse the stored blob, skipping entries that are not valid timestamps
    pub fn from_json(blob: &str) -> Result<Self> {
        let raw: BTreeMap<String, String> = serde_json::from_str(blob)?;
        let mut watermarks = Self::default();
        for (key, value) in raw {
            match DateTime::parse_from_rfc3339(&value) {
                Ok(at) => watermarks.set(key, at.with_timezone(&Utc)),
                Err(e) => warn!(account = %key, value = %value, error = %e, "Ignoring invalid watermark"),
            }
        }
        Ok(watermarks)
    }

    pub fn to_json(&self) -> Result<String> {
        let raw: BTreeMap<&str, String> = self
            .entries
            .iter()
            .map(|(key, at)| (key.as_str(), at.to_rfc3339()))
            .collect();
        Ok(serde_json::to_string(&raw)?)
    }
}

/// Reads and writes the watermark blob through the ledger
pub struct WatermarkStore {
    ledger: Arc<dyn Ledger>,
}

impl WatermarkStore {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Stored watermarks; empty when the blob is missing or unreadable
    pub async fn load(&self) -> Result<Watermarks> {
        let Some(blob) = self.ledger.get_config_blob(WATERMARK_KEY).await? else {
            debug!("No watermarks stored yet");
            return Ok(Watermarks::default());
        };
        match Watermarks::from_json(&blob) {
            Ok(watermarks) => Ok(watermarks),
            Err(e) => {
                warn!(error = %e, "Stored watermarks are corrupt, starting from defaults");
                Ok(Watermarks::default())
            }
        }
    }

    pub async fn save(&self, watermarks: &Watermarks) -> Result<()> {
        self.ledger
            .put_config_blob(WATERMARK_KEY, &watermarks.to_json()?)
            .await
    }
}

/// How far back each account is scraped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartDatePolicy {
    pub lookback_days: i64,
    pub overlap_days: i64,
    pub backfill_days: i64,
}

impl StartDatePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lookback_days: config.lookback_days,
            overlap_days: config.overlap_days,
            backfill_days: config.backfill_days,
        }
    }

    /// `since` wins, then backfill, then the watermark minus the overlap, then the default lookback
    pub fn start_date(
        &self,
        watermark: Option<DateTime<Utc>>,
        since: Option<NaiveDate>,
        backfill: bool,
        today: NaiveDate,
    ) -> NaiveDate {
        if let Some(since) = since {
            return since;
        }
        if backfill {
            return days_before(today, self.backfill_days);
        }
        match watermark {
            Some(at) => days_before(at.date_naive(), self.overlap_days),
            None => days_before(today, self.lookback_days),
        }
    }
}

fn days_before(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_sub_days(Days::new(days.max(0) as u64))
        .unwrap_or(NaiveDate::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryLedger;
    use chrono::TimeZone;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    const POLICY: StartDatePolicy = StartDatePolicy {
        lookback_days: 90,
        overlap_days: 7,
        backfill_days: 365,
    };

    #[tokio::test]
    async fn test_watermark_round_trip() {
        let ledger = Arc::new(InMemoryLedger::new());
        let store = WatermarkStore::new(ledger.clone());

        assert!(store.load().await.unwrap().is_empty());

        let mut watermarks = Watermarks::default();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        watermarks.set("leumi", at);
        store.save(&watermarks).await.unwrap();

        assert!(ledger.blob(WATERMARK_KEY).unwrap().contains("leumi"));
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.get("leumi"), Some(at));
        assert_eq!(loaded, watermarks);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_treated_as_empty() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.put_config_blob(WATERMARK_KEY, "not json").await.unwrap();
        let loaded = WatermarkStore::new(ledger).load().await.unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let watermarks =
            Watermarks::from_json(r#"{"a": "2024-01-01T00:00:00Z", "b": "yesterday"}"#).unwrap();
        assert!(watermarks.get("a").is_some());
        assert!(watermarks.get("b").is_none());
    }

    #[test]
    fn test_start_date_precedence() {
        let today = date(6, 1);
        let mark = Some(Utc.with_ymd_and_hms(2024, 5, 20, 23, 0, 0).unwrap());

        assert_eq!(POLICY.start_date(mark, Some(date(1, 1)), true, today), date(1, 1));
        assert_eq!(
            POLICY.start_date(mark, None, true, today),
            NaiveDate::from_ymd_opt(2023, 6, 2).unwrap()
        );
        assert_eq!(POLICY.start_date(mark, None, false, today), date(5, 13));
        assert_eq!(POLICY.start_date(None, None, false, today), date(3, 3));
    }
}
