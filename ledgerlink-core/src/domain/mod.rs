//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod account;
mod ledger_entry;
pub mod plan;
pub mod result;
mod source;
mod transaction;

pub use account::{Account, AccountKind, AccountSpec};
pub(crate) use account::last_four;
pub use ledger_entry::LedgerEntry;
pub use plan::{PlannedUpdate, ReconciliationPlan, SuppressedDuplicate, SuppressionReason};
pub use source::{RawTransaction, ScrapeResult, ScrapedAccount};
pub(crate) use source::deserialize_id;
pub use transaction::{TransactionRecord, TransactionType, AMOUNT_TOLERANCE};
