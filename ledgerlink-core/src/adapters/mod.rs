//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - HTTP ledger API client for the Ledger port
//! - Scraper service HTTP client for the TransactionSource port
//! - In-memory ledger and canned source for tests and dry experiments

pub mod http_ledger;
pub mod memory;
pub mod scraper;

#[cfg(test)]
pub mod ledger_mock;
