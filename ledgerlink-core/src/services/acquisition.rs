//! Acquisition - fetch raw transactions for every configured source account

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{Concurrency, SourceAccount};
use crate::domain::ScrapedAccount;
use crate::ports::TransactionSource;

/// One account to scrape
#[derive(Debug, Clone)]
pub struct ScrapeJob {
    pub account: SourceAccount,
    pub start_date: NaiveDate,
}

/// Outcome for one job; failures carry a readable reason
#[derive(Debug, Clone)]
pub struct Acquired {
    pub account: SourceAccount,
    pub start_date: NaiveDate,
    pub result: std::result::Result<Vec<ScrapedAccount>, String>,
}

impl Acquired {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs scrape jobs against a source, sequentially or in parallel
pub struct Acquisition {
    source: Arc<dyn TransactionSource>,
    concurrency: Concurrency,
    max_parallel: Option<usize>,
}

impl Acquisition {
    pub fn new(
        source: Arc<dyn TransactionSource>,
        concurrency: Concurrency,
        max_parallel: Option<usize>,
    ) -> Self {
        Self {
            source,
            concurrency,
            max_parallel,
        }
    }

    /// Scrape every job. Results come back in job order whatever the completion order.
    pub async fn acquire(&self, jobs: Vec<ScrapeJob>) -> Vec<Acquired> {
        info!(
            source = self.source.name(),
            accounts = jobs.len(),
            mode = ?self.concurrency,
            "Acquiring transactions"
        );

        let results = match self.concurrency {
            Concurrency::Sequential => {
                let mut results = Vec::with_capacity(jobs.len());
                for job in jobs {
                    results.push(scrape_one(self.source.as_ref(), job).await);
                }
                results
            }
            Concurrency::All => self.acquire_parallel(jobs).await,
        };

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            succeeded = results.len() - failed,
            failed,
            "Acquisition finished"
        );
        results
    }

    async fn acquire_parallel(&self, jobs: Vec<ScrapeJob>) -> Vec<Acquired> {
        let permits = self.max_parallel.unwrap_or(jobs.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut slots: Vec<Option<Acquired>> = vec![None; jobs.len()];
        let fallback: Vec<ScrapeJob> = jobs.clone();

        let mut set = JoinSet::new();
        for (slot, job) in jobs.into_iter().enumerate() {
            let source = Arc::clone(&self.source);
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                // Never closed
                let _permit = semaphore.acquire_owned().await.ok();
                (slot, scrape_one(source.as_ref(), job).await)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, acquired)) => slots[slot] = Some(acquired),
                Err(e) => error!(error = %e, "Scrape task aborted"),
            }
        }

        slots
            .into_iter()
            .zip(fallback)
            .map(|(slot, job)| {
                slot.unwrap_or_else(|| Acquired {
                    account: job.account,
                    start_date: job.start_date,
                    result: Err("scrape task aborted".to_string()),
                })
            })
            .collect()
    }
}

async fn scrape_one(source: &dyn TransactionSource, job: ScrapeJob) -> Acquired {
    let key = job.account.key.clone();
    debug!(account = %key, start_date = %job.start_date, "Scraping");

    let result = match source
        .scrape(&job.account.account_type, &job.account.credentials, job.start_date)
        .await
    {
        Ok(scrape) if scrape.success => {
            let count: usize = scrape.accounts.iter().map(|a| a.transactions.len()).sum();
            info!(account = %key, transactions = count, "Scrape succeeded");
            Ok(scrape.accounts)
        }
        Ok(scrape) => {
            let reason = scrape.error_summary();
            warn!(account = %key, error = %reason, "Scrape failed");
            Err(reason)
        }
        Err(e) => {
            warn!(account = %key, error = %e, "Scrape request failed");
            Err(e.to_string())
        }
    };

    Acquired {
        account: job.account,
        start_date: job.start_date,
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::StaticSource;
    use crate::domain::{AccountKind, ScrapeResult};
    use serde_json::json;

    fn job(key: &str) -> ScrapeJob {
        ScrapeJob {
            account: SourceAccount {
                key: key.to_string(),
                account_type: key.to_string(),
                kind: AccountKind::Bank,
                credentials: json!({}),
            },
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        }
    }

    fn source() -> Arc<StaticSource> {
        Arc::new(
            StaticSource::new()
                .with_result(
                    "leumi",
                    ScrapeResult::ok(vec![ScrapedAccount {
                        account_number: "123".to_string(),
                        balance: None,
                        transactions: vec![],
                    }]),
                )
                .with_result("max", ScrapeResult::failed("INVALID_PASSWORD", "bad login"))
                .with_error("isracard", "connection reset"),
        )
    }

    #[tokio::test]
    async fn test_parallel_results_keep_job_order() {
        let acquisition = Acquisition::new(source(), Concurrency::All, Some(2));
        let results = acquisition
            .acquire(vec![job("max"), job("leumi"), job("isracard")])
            .await;

        let keys: Vec<_> = results.iter().map(|r| r.account.key.as_str()).collect();
        assert_eq!(keys, vec!["max", "leumi", "isracard"]);
        assert_eq!(results[0].result.as_ref().unwrap_err(), "INVALID_PASSWORD: bad login");
        assert!(results[1].is_success());
        assert!(results[2].result.as_ref().unwrap_err().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_sequential_calls_in_order() {
        let src = source();
        let acquisition = Acquisition::new(src.clone(), Concurrency::Sequential, None);
        let results = acquisition.acquire(vec![job("leumi"), job("max")]).await;

        assert_eq!(results.len(), 2);
        let called: Vec<_> = src.calls().into_iter().map(|(t, _)| t).collect();
        assert_eq!(called, vec!["leumi", "max"]);
    }

    #[tokio::test]
    async fn test_no_jobs() {
        let acquisition = Acquisition::new(source(), Concurrency::All, None);
        assert!(acquisition.acquire(vec![]).await.is_empty());
    }
}
