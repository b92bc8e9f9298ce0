//! Sync service - the end-to-end reconciliation pipeline
//!
//! acquire → normalize → settle credit cards → pair transfers → plan → execute

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{Config, SourceAccount};
use crate::domain::result::Result as DomainResult;
use crate::domain::{last_four, Account, AccountSpec, ReconciliationPlan, ScrapedAccount, TransactionRecord};
use crate::ports::{Ledger, TransactionSource};
use crate::services::acquisition::{Acquisition, ScrapeJob};
use crate::services::executor::{LedgerSyncExecutor, SyncReport};
use crate::services::identity::LedgerIndex;
use crate::services::normalize::Normalizer;
use crate::services::planner::ReconciliationPlanner;
use crate::services::run_context::RunContext;
use crate::services::settlement::SettlementMatcher;
use crate::services::transfer::{TransferOutcome, TransferPairMatcher};
use crate::services::watermark::{StartDatePolicy, WatermarkStore};

/// Per-run switches, mostly straight from the command line
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Compute everything but write nothing (accounts, transactions, watermarks)
    pub dry_run: bool,
    /// Fixed start date for every account
    pub since: Option<NaiveDate>,
    /// Ignore watermarks and go back `backfill_days`
    pub backfill: bool,
    /// Overrides `dateToleranceDays`
    pub date_tolerance_days: Option<i64>,
    /// Restrict the run to these account keys (empty = all)
    pub only_accounts: Vec<String>,
    /// Never patch records that already exist with the same type
    pub skip_edit: bool,
}

/// Sync service for acquiring, classifying and reconciling transactions
pub struct SyncService {
    ledger: Arc<dyn Ledger>,
    source: Arc<dyn TransactionSource>,
    config: Config,
}

impl SyncService {
    pub fn new(ledger: Arc<dyn Ledger>, source: Arc<dyn TransactionSource>, config: Config) -> Self {
        Self {
            ledger,
            source,
            config,
        }
    }

    /// Run the full pipeline and apply the resulting plan
    pub async fn sync(&self, options: &SyncOptions) -> Result<SyncResult> {
        let classified = self.classify_with_context(options).await?;
        let Pipeline {
            accounts,
            stats,
            records,
            transfers,
            index,
            succeeded,
            started_at,
        } = classified;

        let plan = ReconciliationPlanner::new(options.skip_edit).plan(
            records,
            &index,
            &transfers.duplicates_of_existing,
            &transfers.transfers,
        );

        if options.dry_run {
            info!(actions = plan.action_count(), "Dry run: nothing written");
            return Ok(SyncResult {
                dry_run: true,
                started_at: started_at.to_rfc3339(),
                accounts,
                transaction_stats: stats,
                plan,
                report: None,
                watermarks_saved: false,
            });
        }

        let report = LedgerSyncExecutor::new(Arc::clone(&self.ledger))
            .execute(&plan)
            .await;

        let watermarks_saved = self.save_watermarks(&succeeded, started_at).await;

        Ok(SyncResult {
            dry_run: false,
            started_at: started_at.to_rfc3339(),
            accounts,
            transaction_stats: stats,
            plan,
            report: Some(report),
            watermarks_saved,
        })
    }

    /// Run the pipeline up to classification; nothing is planned or written
    pub async fn list_transactions(&self, options: &SyncOptions) -> Result<Classification> {
        let options = SyncOptions {
            dry_run: true,
            ..options.clone()
        };
        let pipeline = self.classify_with_context(&options).await?;
        Ok(Classification {
            accounts: pipeline.accounts,
            transaction_stats: pipeline.stats,
            records: pipeline.records,
        })
    }

    async fn classify_with_context(&self, options: &SyncOptions) -> Result<Pipeline> {
        let started_at = Utc::now();
        let today = started_at.date_naive();
        let tolerance = options
            .date_tolerance_days
            .unwrap_or(self.config.date_tolerance_days)
            .max(0);

        let ledger_accounts = self
            .ledger
            .get_accounts()
            .await
            .context("Failed to fetch ledger accounts (is the ledger reachable?)")?;
        let mut ctx = RunContext::new(ledger_accounts, options.dry_run, self.config.default_currency.clone());

        let selected = self.selected_accounts(&options.only_accounts)?;
        let watermarks = WatermarkStore::new(Arc::clone(&self.ledger))
            .load()
            .await
            .context("Failed to load import watermarks")?;
        let policy = StartDatePolicy::from_config(&self.config);

        let jobs: Vec<ScrapeJob> = selected
            .into_iter()
            .map(|account| {
                let start_date =
                    policy.start_date(watermarks.get(&account.key), options.since, options.backfill, today);
                ScrapeJob { account, start_date }
            })
            .collect();
        let earliest = jobs
            .iter()
            .map(|job| job.start_date)
            .min()
            .unwrap_or_else(|| policy.start_date(None, options.since, options.backfill, today));

        let acquired = Acquisition::new(
            Arc::clone(&self.source),
            self.config.concurrency,
            self.config.max_parallel,
        )
        .acquire(jobs)
        .await;

        let normalizer = Normalizer::new(self.config.identity_strategy, self.config.default_currency.clone());
        let mut stats = TransactionStats::default();
        let mut records: Vec<TransactionRecord> = Vec::new();
        let mut accounts = Vec::with_capacity(acquired.len());
        let mut succeeded = Vec::new();

        for item in acquired {
            let mut result = AccountSyncResult {
                key: item.account.key.clone(),
                start_date: item.start_date.format("%Y-%m-%d").to_string(),
                transactions: 0,
                error: None,
            };

            match item.result {
                Ok(scraped_accounts) => {
                    for scraped in &scraped_accounts {
                        let account =
                            match resolve_ledger_account(&mut ctx, self.ledger.as_ref(), &item.account, scraped)
                                .await
                            {
                                Ok(account) => account,
                                Err(e) => {
                                    warn!(
                                        account = %item.account.key,
                                        number = %scraped.account_number,
                                        error = %e,
                                        "Could not resolve ledger account, skipping its transactions"
                                    );
                                    result.error = Some(format!(
                                        "account {}: {}",
                                        scraped.account_number, e
                                    ));
                                    continue;
                                }
                            };

                        for raw in &scraped.transactions {
                            stats.discovered += 1;
                            match normalizer.normalize(raw, &account) {
                                Ok(record) => {
                                    result.transactions += 1;
                                    records.push(record);
                                }
                                Err(e) => {
                                    stats.invalid += 1;
                                    warn!(
                                        account = %item.account.key,
                                        description = %raw.description,
                                        error = %e,
                                        "Skipping transaction that could not be normalized"
                                    );
                                }
                            }
                        }
                    }
                    if result.error.is_none() {
                        succeeded.push(item.account.key.clone());
                    }
                }
                Err(reason) => result.error = Some(reason),
            }

            accounts.push(result);
        }
        stats.normalized = records.len();

        let snapshot_since = earliest
            .checked_sub_days(Days::new(tolerance as u64))
            .unwrap_or(earliest);
        let snapshot = self
            .ledger
            .search_transactions(snapshot_since, None)
            .await
            .context("Failed to fetch existing ledger transactions")?;
        let index = LedgerIndex::build(snapshot);
        info!(entries = index.len(), since = %snapshot_since, "Loaded ledger snapshot");

        let settlement = SettlementMatcher::new(&self.config.settlement_rules)
            .run(records, &mut ctx, self.ledger.as_ref())
            .await;
        stats.settlements = settlement.transfers.len();

        let transfers = TransferPairMatcher::new(tolerance).match_pairs(settlement.into_records(), &index.transfers());
        stats.transfers = transfers.transfers.len();
        stats.duplicates_of_existing = transfers.duplicates_of_existing.len();
        stats.covered_legs = transfers.covered_legs.len();

        let mut records = transfers.records();
        if self.config.merchant_accounts {
            self.enrich_merchants(&mut records, &mut ctx).await;
        }

        Ok(Pipeline {
            accounts,
            stats,
            records,
            transfers,
            index,
            succeeded,
            started_at,
        })
    }

    fn selected_accounts(&self, only: &[String]) -> Result<Vec<SourceAccount>> {
        if only.is_empty() {
            return Ok(self.config.accounts.clone());
        }

        let known: HashSet<&str> = self.config.accounts.iter().map(|a| a.key.as_str()).collect();
        let unknown: Vec<&str> = only
            .iter()
            .map(String::as_str)
            .filter(|key| !known.contains(key))
            .collect();
        if !unknown.is_empty() {
            anyhow::bail!("Unknown account key(s): {}", unknown.join(", "));
        }

        Ok(self
            .config
            .accounts
            .iter()
            .filter(|account| only.contains(&account.key))
            .cloned()
            .collect())
    }

    /// Point unclassified withdrawals at an expense account named after the merchant
    async fn enrich_merchants(&self, records: &mut [TransactionRecord], ctx: &mut RunContext) {
        for record in records
            .iter_mut()
            .filter(|r| r.is_withdrawal() && r.destination_account_id.is_none())
        {
            match ctx.merchant_account(self.ledger.as_ref(), &record.description).await {
                Ok(id) => record.destination_account_id = Some(id),
                Err(e) => warn!(
                    external_id = %record.external_id,
                    merchant = %record.description,
                    error = %e,
                    "Could not resolve merchant account"
                ),
            }
        }
    }

    async fn save_watermarks(&self, keys: &[String], at: DateTime<Utc>) -> bool {
        if keys.is_empty() {
            return false;
        }
        let store = WatermarkStore::new(Arc::clone(&self.ledger));
        let result = async {
            let mut watermarks = store.load().await?;
            for key in keys {
                watermarks.set(key.clone(), at);
            }
            store.save(&watermarks).await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to save import watermarks");
                false
            }
        }
    }
}

/// Resolve a scraped account to a ledger account
///
/// Tries the full number, then the last four digits among accounts of the same
/// kind, then the name `{key} {number}`; creates the account if none fits.
async fn resolve_ledger_account(
    ctx: &mut RunContext,
    ledger: &dyn Ledger,
    source: &SourceAccount,
    scraped: &ScrapedAccount,
) -> DomainResult<Account> {
    let number = scraped.account_number.trim();

    if let Some(suffix) = last_four(number) {
        let existing = ctx.accounts().iter().find(|account| {
            account.kind == source.kind
                && (account.account_number.as_deref() == Some(number)
                    || account.number_suffix() == Some(suffix))
        });
        if let Some(account) = existing {
            return Ok(account.clone());
        }
    }

    let name = if number.is_empty() {
        source.key.clone()
    } else {
        format!("{} {}", source.key, number)
    };
    let mut spec = AccountSpec::new(name, source.kind, ctx.default_currency().to_string());
    if !number.is_empty() {
        spec = spec.with_number(number);
    }
    ctx.resolve_or_create(ledger, spec).await
}

struct Pipeline {
    accounts: Vec<AccountSyncResult>,
    stats: TransactionStats,
    records: Vec<TransactionRecord>,
    transfers: TransferOutcome,
    index: LedgerIndex,
    succeeded: Vec<String>,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SyncResult {
    pub dry_run: bool,
    pub started_at: String,
    pub accounts: Vec<AccountSyncResult>,
    pub transaction_stats: TransactionStats,
    pub plan: ReconciliationPlan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
    pub watermarks_saved: bool,
}

impl SyncResult {
    /// Accounts whose acquisition failed
    pub fn failed_accounts(&self) -> impl Iterator<Item = &AccountSyncResult> {
        self.accounts.iter().filter(|a| a.error.is_some())
    }
}

/// Classified records without planning, for inspection
#[derive(Debug, Serialize)]
pub struct Classification {
    pub accounts: Vec<AccountSyncResult>,
    pub transaction_stats: TransactionStats,
    pub records: Vec<TransactionRecord>,
}

#[derive(Debug, Serialize)]
pub struct AccountSyncResult {
    pub key: String,
    pub start_date: String,
    pub transactions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct TransactionStats {
    /// Raw transactions returned by the source
    pub discovered: usize,
    pub normalized: usize,
    /// Raw transactions rejected by the normalizer
    pub invalid: usize,
    /// Withdrawals reclassified as credit-card settlements
    pub settlements: usize,
    /// Transfers inferred from deposit/withdrawal pairs
    pub transfers: usize,
    pub duplicates_of_existing: usize,
    /// Single legs of a transfer stored by an earlier run
    pub covered_legs: usize,
}
