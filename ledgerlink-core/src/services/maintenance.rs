//! Maintenance service - one-off ledger cleanups

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::domain::{ReconciliationPlan, SuppressedDuplicate, SuppressionReason};
use crate::ports::Ledger;
use crate::services::executor::{LedgerSyncExecutor, SyncReport};
use crate::services::identity::LedgerIndex;
use crate::services::transfer::TransferPairMatcher;

/// Entries selected for deletion and, outside dry runs, what happened to them
#[derive(Debug, Serialize)]
pub struct MaintenanceResult {
    pub dry_run: bool,
    pub scanned: usize,
    pub candidates: Vec<SuppressedDuplicate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
}

pub struct MaintenanceService {
    ledger: Arc<dyn Ledger>,
    date_tolerance_days: i64,
}

impl MaintenanceService {
    pub fn new(ledger: Arc<dyn Ledger>, date_tolerance_days: i64) -> Self {
        Self {
            ledger,
            date_tolerance_days,
        }
    }

    /// Delete deposit/withdrawal legs that an existing transfer already represents
    pub async fn cleanup(&self, dry_run: bool) -> Result<MaintenanceResult> {
        let index = self.load_index().await?;

        let legs = index
            .entries()
            .iter()
            .filter(|entry| !entry.is_transfer())
            .filter_map(|entry| entry.to_record())
            .collect();
        let outcome = TransferPairMatcher::new(self.date_tolerance_days).match_pairs(legs, &index.transfers());

        let legs = outcome
            .duplicates_of_existing
            .iter()
            .flat_map(|pair| pair.legs())
            .chain(outcome.covered_legs.iter().map(|leg| leg.external_id.as_str()));

        let mut candidates = Vec::new();
        for leg in legs {
            if let Some(entry) = index.get(leg) {
                candidates.push(SuppressedDuplicate {
                    ledger_id: entry.id.clone(),
                    external_id: leg.to_string(),
                    reason: SuppressionReason::DuplicateOfExistingTransfer,
                });
            }
        }

        info!(scanned = index.len(), legs = candidates.len(), "Cleanup scan complete");
        self.apply(index.len(), candidates, dry_run).await
    }

    /// Delete every entry whose external id was already used by an earlier entry
    pub async fn remove_duplicates(&self, dry_run: bool) -> Result<MaintenanceResult> {
        let index = self.load_index().await?;

        let candidates: Vec<SuppressedDuplicate> = index
            .duplicates()
            .map(|entry| SuppressedDuplicate {
                ledger_id: entry.id.clone(),
                external_id: entry.external_id.clone().unwrap_or_default(),
                reason: SuppressionReason::DuplicateExternalId,
            })
            .collect();

        info!(scanned = index.len(), duplicates = candidates.len(), "Duplicate scan complete");
        self.apply(index.len(), candidates, dry_run).await
    }

    async fn load_index(&self) -> Result<LedgerIndex> {
        let entries = self
            .ledger
            .get_all_transactions()
            .await
            .context("Failed to fetch ledger transactions")?;
        Ok(LedgerIndex::build(entries))
    }

    async fn apply(
        &self,
        scanned: usize,
        candidates: Vec<SuppressedDuplicate>,
        dry_run: bool,
    ) -> Result<MaintenanceResult> {
        let report = if dry_run || candidates.is_empty() {
            None
        } else {
            let plan = ReconciliationPlan {
                suppressed_duplicates: candidates.clone(),
                ..Default::default()
            };
            Some(LedgerSyncExecutor::new(Arc::clone(&self.ledger)).execute(&plan).await)
        };

        Ok(MaintenanceResult {
            dry_run,
            scanned,
            candidates,
            report,
        })
    }
}
