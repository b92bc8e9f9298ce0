//! Reconciliation plan: the diff between classified records and the ledger

use serde::Serialize;

use super::transaction::TransactionRecord;

/// A record paired with the ledger id of the entry it replaces or patches
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedUpdate {
    pub ledger_id: String,
    pub record: TransactionRecord,
}

/// Why a ledger entry is scheduled for deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    /// The deposit/withdrawal pair is already represented by a ledger transfer
    DuplicateOfExistingTransfer,
    /// A leg imported by an earlier run is now part of a newly inferred transfer
    SupersededByTransfer,
    /// A second ledger entry carrying an external id seen before
    DuplicateExternalId,
}

/// A ledger entry to delete
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuppressedDuplicate {
    pub ledger_id: String,
    pub external_id: String,
    pub reason: SuppressionReason,
}

/// Create/update/delete sets computed for one run. Consumed immediately by the executor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationPlan {
    pub to_create: Vec<TransactionRecord>,
    /// Type changed: delete then recreate
    pub to_type_update: Vec<PlannedUpdate>,
    pub to_add_destination: Vec<PlannedUpdate>,
    pub to_field_update: Vec<PlannedUpdate>,
    pub suppressed_duplicates: Vec<SuppressedDuplicate>,
    /// Records dropped from the input because their external id repeated
    pub duplicates_removed: usize,
}

impl ReconciliationPlan {
    /// True if applying this plan would not write anything
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty()
            && self.to_type_update.is_empty()
            && self.to_add_destination.is_empty()
            && self.to_field_update.is_empty()
            && self.suppressed_duplicates.is_empty()
    }

    pub fn action_count(&self) -> usize {
        self.to_create.len()
            + self.to_type_update.len()
            + self.to_add_destination.len()
            + self.to_field_update.len()
            + self.suppressed_duplicates.len()
    }
}
