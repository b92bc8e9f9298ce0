//! Transfer pair matcher
//!
//! Money moving between two of the user's own accounts shows up twice: a
//! withdrawal on one side and a deposit on the other, often a day or two apart.
//! This pass pairs them up and replaces both legs with a single transfer.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{LedgerEntry, TransactionRecord, TransactionType, AMOUNT_TOLERANCE};

const TRANSFER_ID_PREFIX: &str = "transfer_";

/// A transfer synthesized from a withdrawal/deposit pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferredTransfer {
    pub transfer: TransactionRecord,
    pub withdrawal_id: String,
    pub deposit_id: String,
}

/// A pair the ledger already holds as a transfer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicatePair {
    pub withdrawal_id: String,
    pub deposit_id: String,
    /// Ledger id of the transfer that already represents the pair
    pub existing_transfer_id: String,
}

impl DuplicatePair {
    pub fn legs(&self) -> [&str; 2] {
        [&self.withdrawal_id, &self.deposit_id]
    }
}

/// A single leg whose stored transfer was built from it in an earlier run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoveredLeg {
    pub external_id: String,
    pub existing_transfer_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct TransferOutcome {
    pub transfers: Vec<InferredTransfer>,
    pub duplicates_of_existing: Vec<DuplicatePair>,
    /// Unpaired legs already folded into a stored transfer
    pub covered_legs: Vec<CoveredLeg>,
    /// Unpaired, malformed and already-transfer records, in input order
    pub remaining: Vec<TransactionRecord>,
}

impl TransferOutcome {
    /// Final classified list: inferred transfers followed by the remainder
    pub fn records(&self) -> Vec<TransactionRecord> {
        self.transfers
            .iter()
            .map(|t| t.transfer.clone())
            .chain(self.remaining.iter().cloned())
            .collect()
    }
}

/// Greedy deposit/withdrawal pairing within a date tolerance
#[derive(Debug, Clone, Copy)]
pub struct TransferPairMatcher {
    date_tolerance_days: i64,
}

impl TransferPairMatcher {
    pub fn new(date_tolerance_days: i64) -> Self {
        Self {
            date_tolerance_days: date_tolerance_days.max(0),
        }
    }

    pub fn date_tolerance_days(&self) -> i64 {
        self.date_tolerance_days
    }

    /// Pair up deposits and withdrawals
    ///
    /// Records are visited in date order (stable, so ties keep input order). Each
    /// deposit takes the first unmatched withdrawal within tolerance; there is no
    /// global optimisation. A leg left without a partner is checked against the
    /// stored transfers, since the scrape window may cut a transfer in half.
    /// Every input record ends up in exactly one place: as a leg of a transfer,
    /// as a leg of a duplicate pair, as a covered leg, or in `remaining`.
    pub fn match_pairs(
        &self,
        records: Vec<TransactionRecord>,
        existing_transfers: &[LedgerEntry],
    ) -> TransferOutcome {
        let mut outcome = TransferOutcome::default();

        let mut candidates: Vec<TransactionRecord> = Vec::new();
        for record in records {
            if record.transaction_type == TransactionType::Transfer {
                outcome.remaining.push(record);
                continue;
            }
            if let Err(reason) = record.validate() {
                warn!(
                    external_id = %record.external_id,
                    reason,
                    "Malformed record excluded from transfer matching"
                );
                outcome.remaining.push(record);
                continue;
            }
            candidates.push(record);
        }

        candidates.sort_by_key(|record| record.date);

        let deposits: Vec<usize> = (0..candidates.len())
            .filter(|&i| candidates[i].is_deposit())
            .collect();
        let withdrawals: Vec<usize> = (0..candidates.len())
            .filter(|&i| candidates[i].is_withdrawal())
            .collect();

        let mut paired: Vec<Option<usize>> = vec![None; candidates.len()];
        let mut consumed = vec![false; candidates.len()];
        for &d in &deposits {
            let found = withdrawals
                .iter()
                .copied()
                .find(|&w| !consumed[w] && self.is_pair(&candidates[d], &candidates[w]));
            if let Some(w) = found {
                consumed[w] = true;
                consumed[d] = true;
                paired[d] = Some(w);
            }
        }

        let mut used_existing: HashSet<&str> = HashSet::new();
        let mut slots: Vec<Option<TransactionRecord>> = candidates.into_iter().map(Some).collect();

        for d in deposits {
            let Some(w) = paired[d] else { continue };
            let (Some(deposit), Some(withdrawal)) = (slots[d].take(), slots[w].take()) else {
                continue;
            };

            let existing = existing_transfers.iter().find(|entry| {
                !used_existing.contains(entry.id.as_str())
                    && self.reconciles(entry, &withdrawal, &deposit)
            });

            if let Some(existing) = existing {
                debug!(
                    withdrawal = %withdrawal.external_id,
                    deposit = %deposit.external_id,
                    existing = %existing.id,
                    "Pair already recorded as a transfer"
                );
                used_existing.insert(existing.id.as_str());
                outcome.duplicates_of_existing.push(DuplicatePair {
                    withdrawal_id: withdrawal.external_id,
                    deposit_id: deposit.external_id,
                    existing_transfer_id: existing.id.clone(),
                });
            } else {
                debug!(
                    withdrawal = %withdrawal.external_id,
                    deposit = %deposit.external_id,
                    amount = %deposit.amount,
                    "Inferred transfer"
                );
                outcome.transfers.push(InferredTransfer {
                    withdrawal_id: withdrawal.external_id.clone(),
                    deposit_id: deposit.external_id.clone(),
                    transfer: synthesize(withdrawal, deposit),
                });
            }
        }

        for record in slots.into_iter().flatten() {
            match existing_transfers.iter().find(|entry| covers(entry, &record)) {
                Some(existing) => {
                    debug!(
                        leg = %record.external_id,
                        existing = %existing.id,
                        "Leg already part of a stored transfer"
                    );
                    outcome.covered_legs.push(CoveredLeg {
                        external_id: record.external_id,
                        existing_transfer_id: existing.id.clone(),
                    });
                }
                None => outcome.remaining.push(record),
            }
        }

        info!(
            transfers = outcome.transfers.len(),
            duplicates = outcome.duplicates_of_existing.len(),
            covered = outcome.covered_legs.len(),
            remaining = outcome.remaining.len(),
            "Transfer matching complete"
        );

        outcome
    }

    fn within_tolerance(&self, a: NaiveDate, b: NaiveDate) -> bool {
        (a - b).num_days().abs() <= self.date_tolerance_days
    }

    fn is_pair(&self, deposit: &TransactionRecord, withdrawal: &TransactionRecord) -> bool {
        self.within_tolerance(deposit.date, withdrawal.date)
            && (deposit.amount - withdrawal.amount).abs() <= AMOUNT_TOLERANCE
            && deposit.destination_account_id != withdrawal.source_account_id
    }

    fn reconciles(
        &self,
        existing: &LedgerEntry,
        withdrawal: &TransactionRecord,
        deposit: &TransactionRecord,
    ) -> bool {
        existing.is_transfer()
            && (existing.amount - deposit.amount).abs() <= AMOUNT_TOLERANCE
            && existing.source_account_id == withdrawal.source_account_id
            && existing.destination_account_id == deposit.destination_account_id
            && self.within_tolerance(existing.date, withdrawal.date)
            && self.within_tolerance(existing.date, deposit.date)
    }
}

/// Whether a stored transfer was synthesized from this leg
///
/// Inferred transfers carry `transfer_{withdrawal}_{deposit}` as external id, so
/// the leg's own id plus the matching account side identifies it.
fn covers(existing: &LedgerEntry, leg: &TransactionRecord) -> bool {
    let Some(ids) = existing
        .external_id
        .as_deref()
        .and_then(|id| id.strip_prefix(TRANSFER_ID_PREFIX))
    else {
        return false;
    };
    if !existing.is_transfer() || (existing.amount - leg.amount).abs() > AMOUNT_TOLERANCE {
        return false;
    }

    match leg.transaction_type {
        TransactionType::Withdrawal => {
            existing.source_account_id == leg.source_account_id
                && ids
                    .strip_prefix(leg.external_id.as_str())
                    .is_some_and(|rest| rest.starts_with('_'))
        }
        TransactionType::Deposit => {
            existing.destination_account_id == leg.destination_account_id
                && ids
                    .strip_suffix(leg.external_id.as_str())
                    .is_some_and(|rest| rest.ends_with('_'))
        }
        TransactionType::Transfer => false,
    }
}

/// Merge two legs into one transfer record
fn synthesize(withdrawal: TransactionRecord, deposit: TransactionRecord) -> TransactionRecord {
    let description = if withdrawal.description == deposit.description {
        withdrawal.description.clone()
    } else {
        format!("{} → {}", withdrawal.description, deposit.description)
    };

    let mut notes = String::new();
    for part in [&withdrawal.notes, &deposit.notes] {
        let part = part.trim();
        if part.is_empty() || notes == part {
            continue;
        }
        if !notes.is_empty() {
            notes.push('\n');
        }
        notes.push_str(part);
    }

    let mut tags = withdrawal.tags.clone();
    tags.extend(deposit.tags.iter().cloned());

    let currency_code = if deposit.currency_code.is_empty() {
        withdrawal.currency_code.clone()
    } else {
        deposit.currency_code.clone()
    };

    TransactionRecord {
        transaction_type: TransactionType::Transfer,
        date: withdrawal.date,
        amount: deposit.amount,
        description,
        notes,
        external_id: format!("{}{}_{}", TRANSFER_ID_PREFIX, withdrawal.external_id, deposit.external_id),
        currency_code,
        category_name: None,
        internal_reference: withdrawal.internal_reference.or(deposit.internal_reference),
        tags,
        process_date: withdrawal.process_date.or(deposit.process_date),
        source_account_id: withdrawal.source_account_id,
        destination_account_id: deposit.destination_account_id,
    }
}
