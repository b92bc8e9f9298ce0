//! Scraper service client
//!
//! The scraper runs bank and card logins out of process and exposes a single
//! endpoint:
//!
//! POST {base}/scrape  { accountType, credentials, startDate }  → ScrapeResult

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::config::ScraperSettings;
use crate::domain::result::{Error, Result};
use crate::domain::ScrapeResult;
use crate::ports::TransactionSource;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest<'a> {
    account_type: &'a str,
    credentials: &'a JsonValue,
    start_date: String,
}

/// HTTP client for the scraper service
#[derive(Debug, Clone)]
pub struct ScraperServiceSource {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl ScraperServiceSource {
    pub fn new(settings: &ScraperSettings) -> Result<Self> {
        Self::new_with_base_url(&settings.base_url, settings.timeout_secs)
    }

    pub fn new_with_base_url(base_url: &str, timeout_secs: u64) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(Error::config("Scraper base URL cannot be empty"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs,
        })
    }

    fn map_request_error(&self, error: reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::scraper(format!("Scrape timed out after {} seconds", self.timeout_secs))
        } else if error.is_connect() {
            Error::scraper(format!("Unable to connect to the scraper at {}", self.base_url))
        } else {
            Error::Http(error)
        }
    }

    fn check_response_status(&self, response: &Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(Error::scraper(format!("Scraper service error: HTTP {}", status.as_u16())))
    }
}

#[async_trait]
impl TransactionSource for ScraperServiceSource {
    fn name(&self) -> &str {
        "scraper"
    }

    async fn scrape(
        &self,
        account_type: &str,
        credentials: &JsonValue,
        start_date: NaiveDate,
    ) -> Result<ScrapeResult> {
        let request = ScrapeRequest {
            account_type,
            credentials,
            start_date: start_date.format("%Y-%m-%d").to_string(),
        };
        debug!(account_type, start_date = %request.start_date, "Requesting scrape");

        let response = self
            .client
            .post(format!("{}/scrape", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;
        self.check_response_status(&response)?;

        response
            .json()
            .await
            .map_err(|e| Error::scraper(format!("Failed to parse scrape response: {}", e)))
    }
}
