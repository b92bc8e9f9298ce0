//! Ledger sync executor - applies a reconciliation plan

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::domain::result::Error;
use crate::domain::{PlannedUpdate, ReconciliationPlan};
use crate::ports::Ledger;

/// Kind of ledger write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Delete,
    TypeUpdate,
    AddDestination,
    FieldUpdate,
    Create,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanAction::Delete => "delete",
            PlanAction::TypeUpdate => "type update",
            PlanAction::AddDestination => "add destination",
            PlanAction::FieldUpdate => "field update",
            PlanAction::Create => "create",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionFailure {
    pub action: PlanAction,
    pub external_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_id: Option<String>,
    pub error: String,
}

/// What the executor managed to write
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub type_updated: usize,
    pub destinations_added: usize,
    pub fields_updated: usize,
    pub deleted: usize,
    pub failures: Vec<ActionFailure>,
}

impl SyncReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn succeeded(&self) -> usize {
        self.created + self.type_updated + self.destinations_added + self.fields_updated + self.deleted
    }

    fn record_failure(
        &mut self,
        action: PlanAction,
        external_id: &str,
        ledger_id: Option<&str>,
        err: &Error,
    ) {
        warn!(
            action = %action,
            external_id,
            ledger_id = ledger_id.unwrap_or("-"),
            error = %err,
            "Ledger write failed"
        );
        self.failures.push(ActionFailure {
            action,
            external_id: external_id.to_string(),
            ledger_id: ledger_id.map(str::to_string),
            error: err.to_string(),
        });
    }
}

/// Applies plans one write at a time
///
/// A failed write is recorded and the batch moves on; nothing is retried.
pub struct LedgerSyncExecutor {
    ledger: Arc<dyn Ledger>,
}

impl LedgerSyncExecutor {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Order: deletions, type updates, destination patches, field updates, creates
    pub async fn execute(&self, plan: &ReconciliationPlan) -> SyncReport {
        let mut report = SyncReport::default();

        for duplicate in &plan.suppressed_duplicates {
            match self.ledger.delete_transaction(&duplicate.ledger_id).await {
                Ok(()) => {
                    debug!(ledger_id = %duplicate.ledger_id, reason = ?duplicate.reason, "Deleted");
                    report.deleted += 1;
                }
                Err(e) => report.record_failure(
                    PlanAction::Delete,
                    &duplicate.external_id,
                    Some(&duplicate.ledger_id),
                    &e,
                ),
            }
        }

        for update in &plan.to_type_update {
            self.replace(update, &mut report).await;
        }

        for update in &plan.to_add_destination {
            if self.patch(update, PlanAction::AddDestination, &mut report).await {
                report.destinations_added += 1;
            }
        }

        for update in &plan.to_field_update {
            if self.patch(update, PlanAction::FieldUpdate, &mut report).await {
                report.fields_updated += 1;
            }
        }

        for record in &plan.to_create {
            match self.ledger.create_transaction(record).await {
                Ok(id) => {
                    debug!(external_id = %record.external_id, ledger_id = %id, "Created");
                    report.created += 1;
                }
                Err(e) => report.record_failure(PlanAction::Create, &record.external_id, None, &e),
            }
        }

        info!(
            created = report.created,
            type_updated = report.type_updated,
            destinations_added = report.destinations_added,
            fields_updated = report.fields_updated,
            deleted = report.deleted,
            failed = report.failed(),
            "Ledger sync applied"
        );

        report
    }

    /// Delete then recreate; not atomic
    async fn replace(&self, update: &PlannedUpdate, report: &mut SyncReport) {
        let external_id = update.record.external_id.as_str();
        if let Err(e) = self.ledger.delete_transaction(&update.ledger_id).await {
            report.record_failure(PlanAction::TypeUpdate, external_id, Some(&update.ledger_id), &e);
            return;
        }
        match self.ledger.create_transaction(&update.record).await {
            Ok(_) => report.type_updated += 1,
            Err(e) => {
                error!(
                    external_id,
                    ledger_id = %update.ledger_id,
                    "Deleted entry could not be recreated; the next run will create it"
                );
                report.record_failure(PlanAction::TypeUpdate, external_id, Some(&update.ledger_id), &e);
            }
        }
    }

    async fn patch(&self, update: &PlannedUpdate, action: PlanAction, report: &mut SyncReport) -> bool {
        match self.ledger.update_transaction(&update.ledger_id, &update.record).await {
            Ok(()) => true,
            Err(e) => {
                report.record_failure(action, &update.record.external_id, Some(&update.ledger_id), &e);
                false
            }
        }
    }
}
