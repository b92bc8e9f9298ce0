//! Reconciliation planner - diff classified records against the ledger

use std::collections::HashSet;

use tracing::{debug, info};

use crate::domain::{
    LedgerEntry, PlannedUpdate, ReconciliationPlan, SuppressedDuplicate, SuppressionReason,
    TransactionRecord, TransactionType,
};
use crate::services::identity::LedgerIndex;
use crate::services::transfer::{DuplicatePair, InferredTransfer};

/// Computes the create/update/delete sets for one run
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconciliationPlanner {
    skip_edit: bool,
}

impl ReconciliationPlanner {
    /// With `skip_edit`, records that exist with the same type are never patched
    pub fn new(skip_edit: bool) -> Self {
        Self { skip_edit }
    }

    pub fn plan(
        &self,
        records: Vec<TransactionRecord>,
        index: &LedgerIndex,
        duplicates_of_existing: &[DuplicatePair],
        inferred_transfers: &[InferredTransfer],
    ) -> ReconciliationPlan {
        let mut plan = ReconciliationPlan::default();

        let mut seen: HashSet<String> = HashSet::new();
        for record in records {
            if !seen.insert(record.external_id.clone()) {
                plan.duplicates_removed += 1;
                continue;
            }

            let Some(entry) = index.get(&record.external_id) else {
                plan.to_create.push(record);
                continue;
            };

            if entry.transaction_type != record.transaction_type {
                debug!(
                    external_id = %record.external_id,
                    from = %entry.transaction_type,
                    to = %record.transaction_type,
                    "Type changed"
                );
                plan.to_type_update.push(PlannedUpdate {
                    ledger_id: entry.id.clone(),
                    record,
                });
            } else if adds_destination(entry, &record) {
                plan.to_add_destination.push(PlannedUpdate {
                    ledger_id: entry.id.clone(),
                    record: merge_with_stored(entry, record),
                });
            } else if !self.skip_edit && fields_differ(entry, &record) {
                plan.to_field_update.push(PlannedUpdate {
                    ledger_id: entry.id.clone(),
                    record: merge_with_stored(entry, record),
                });
            }
        }

        if plan.duplicates_removed > 0 {
            info!(
                count = plan.duplicates_removed,
                "Dropped records with repeated external ids"
            );
        }

        let mut suppressed: HashSet<String> = HashSet::new();
        let duplicate_legs = duplicates_of_existing
            .iter()
            .flat_map(|pair| pair.legs())
            .map(|leg| (leg, SuppressionReason::DuplicateOfExistingTransfer));
        let superseded_legs = inferred_transfers
            .iter()
            .flat_map(|t| [t.withdrawal_id.as_str(), t.deposit_id.as_str()])
            .map(|leg| (leg, SuppressionReason::SupersededByTransfer));

        for (leg, reason) in duplicate_legs.chain(superseded_legs) {
            let Some(entry) = index.get(leg) else {
                continue;
            };
            if suppressed.insert(entry.id.clone()) {
                plan.suppressed_duplicates.push(SuppressedDuplicate {
                    ledger_id: entry.id.clone(),
                    external_id: leg.to_string(),
                    reason,
                });
            }
        }

        info!(
            create = plan.to_create.len(),
            type_update = plan.to_type_update.len(),
            add_destination = plan.to_add_destination.len(),
            field_update = plan.to_field_update.len(),
            delete = plan.suppressed_duplicates.len(),
            "Reconciliation plan ready"
        );

        plan
    }
}

/// Stored withdrawal lacking the destination the record now supplies
fn adds_destination(entry: &LedgerEntry, record: &TransactionRecord) -> bool {
    entry.transaction_type == TransactionType::Withdrawal
        && entry.destination_account_id.is_none()
        && record.destination_account_id.is_some()
        && entry.source_account_id == record.source_account_id
}

fn fields_differ(entry: &LedgerEntry, record: &TransactionRecord) -> bool {
    entry.description != record.description
        || entry.notes != record.notes
        || entry.amount.round_dp(2) != record.amount.round_dp(2)
        || entry.date != record.date
        || record
            .category_name
            .as_ref()
            .is_some_and(|category| entry.category_name.as_ref() != Some(category))
        || !record.tags.is_subset(&entry.tags)
}

/// Keep tags and category the ledger already has
fn merge_with_stored(entry: &LedgerEntry, mut record: TransactionRecord) -> TransactionRecord {
    record.tags.extend(entry.tags.iter().cloned());
    if record.category_name.is_none() {
        record.category_name = entry.category_name.clone();
    }
    record
}
