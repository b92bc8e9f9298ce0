//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The core domain
//! depends only on these traits, not on concrete implementations.

mod ledger;
mod source;

pub use ledger::Ledger;
pub use source::TransactionSource;
