//! HTTP ledger client
//!
//! JSON REST API with bearer authentication:
//! - GET    /transactions?dateAfter=YYYY-MM-DD[&tag=...]   → { data: [...], next }
//! - POST   /transactions                                  → { id }
//! - PUT    /transactions/{id}
//! - DELETE /transactions/{id}
//! - GET    /accounts                                      → { data: [...], next }
//! - POST   /accounts                                      → account
//! - GET    /config/{key}                                  → { value }
//! - PUT    /config/{key}                                  ← { value }
//!
//! List endpoints are paginated: `next` is either an absolute URL or an opaque
//! cursor passed back as `?cursor=`. A 404 on any read means "nothing there".

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LedgerSettings;
use crate::domain::result::{Error, Result};
use crate::domain::{deserialize_id, Account, AccountSpec, LedgerEntry, TransactionRecord};
use crate::ports::Ledger;

/// Upper bound on followed `next` links
const MAX_PAGES: usize = 10_000;

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Page<T> {
    #[serde(default)]
    data: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlobBody {
    value: String,
}

/// Ledger API client
#[derive(Debug, Clone)]
pub struct HttpLedger {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeout_secs: u64,
}

impl HttpLedger {
    pub fn new(settings: &LedgerSettings) -> Result<Self> {
        Self::new_with_base_url(&settings.base_url, settings.token.as_deref(), settings.timeout_secs)
    }

    pub fn new_with_base_url(base_url: &str, token: Option<&str>, timeout_secs: u64) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(Error::config("Ledger base URL cannot be empty"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()).map(str::to_string),
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))
    }

    /// Follow `next` links until exhausted. 404 on the first page means empty.
    async fn get_all_pages<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut request = self.client.get(self.url(path)).query(query);

        for page_number in 1..=MAX_PAGES {
            let response = self.send(request).await?;
            if response.status() == StatusCode::NOT_FOUND {
                debug!(path, page = page_number, "Not found, treating as empty");
                return Ok(items);
            }
            self.check_response_status(&response)?;

            let page: Page<T> = response
                .json()
                .await
                .map_err(|e| Error::ledger(format!("Failed to parse {} response: {}", path, e)))?;
            items.extend(page.data);

            match page.next.filter(|n| !n.is_empty()) {
                None => return Ok(items),
                Some(next) if next.starts_with("http://") || next.starts_with("https://") => {
                    request = self.client.get(next);
                }
                Some(cursor) => {
                    let mut query = query.to_vec();
                    query.push(("cursor", cursor));
                    request = self.client.get(self.url(path)).query(&query);
                }
            }
        }

        Err(Error::ledger(format!(
            "Pagination of {} did not terminate after {} pages",
            path, MAX_PAGES
        )))
    }

    fn map_request_error(&self, error: reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::ledger(format!("Connection timed out after {} seconds", self.timeout_secs))
        } else if error.is_connect() {
            Error::ledger(format!("Unable to connect to the ledger at {}", self.base_url))
        } else {
            Error::Http(error)
        }
    }

    /// Map non-success statuses to errors
    fn check_response_status(&self, response: &Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        match status.as_u16() {
            401 => Err(Error::ledger(
                "Ledger authentication failed. The API token may be invalid or revoked.",
            )),
            403 => Err(Error::ledger("Ledger access denied. Check the API token permissions.")),
            404 => Err(Error::not_found(format!("Ledger resource not found: {}", response.url()))),
            429 => Err(Error::ledger("Ledger rate limit exceeded. Wait a moment and try again.")),
            code => Err(Error::ledger(format!("Ledger API error: HTTP {}", code))),
        }
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn search_transactions(
        &self,
        date_after: NaiveDate,
        tag_query: Option<&str>,
    ) -> Result<Vec<LedgerEntry>> {
        let mut query = vec![("dateAfter", date_after.format("%Y-%m-%d").to_string())];
        if let Some(tag) = tag_query {
            query.push(("tag", tag.to_string()));
        }
        self.get_all_pages("transactions", &query).await
    }

    async fn get_all_transactions(&self) -> Result<Vec<LedgerEntry>> {
        self.get_all_pages("transactions", &[]).await
    }

    async fn create_transaction(&self, record: &TransactionRecord) -> Result<String> {
        let response = self
            .send(self.client.post(self.url("transactions")).json(record))
            .await?;
        self.check_response_status(&response)?;
        let created: CreatedResponse = response
            .json()
            .await
            .map_err(|e| Error::ledger(format!("Failed to parse create response: {}", e)))?;
        Ok(created.id)
    }

    async fn update_transaction(&self, id: &str, record: &TransactionRecord) -> Result<()> {
        let response = self
            .send(self.client.put(self.url(&format!("transactions/{}", id))).json(record))
            .await?;
        self.check_response_status(&response)
    }

    async fn delete_transaction(&self, id: &str) -> Result<()> {
        let response = self
            .send(self.client.delete(self.url(&format!("transactions/{}", id))))
            .await?;
        self.check_response_status(&response)
    }

    async fn get_accounts(&self) -> Result<Vec<Account>> {
        self.get_all_pages("accounts", &[]).await
    }

    async fn create_account(&self, spec: &AccountSpec) -> Result<Account> {
        let response = self.send(self.client.post(self.url("accounts")).json(spec)).await?;
        self.check_response_status(&response)?;
        response
            .json()
            .await
            .map_err(|e| Error::ledger(format!("Failed to parse account response: {}", e)))
    }

    async fn get_config_blob(&self, key: &str) -> Result<Option<String>> {
        let response = self
            .send(self.client.get(self.url(&format!("config/{}", key))))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.check_response_status(&response)?;
        let body: BlobBody = response
            .json()
            .await
            .map_err(|e| Error::ledger(format!("Failed to parse config blob '{}': {}", key, e)))?;
        Ok(Some(body.value))
    }

    async fn put_config_blob(&self, key: &str, value: &str) -> Result<()> {
        let body = BlobBody {
            value: value.to_string(),
        };
        let response = self
            .send(self.client.put(self.url(&format!("config/{}", key))).json(&body))
            .await?;
        self.check_response_status(&response)
    }
}
