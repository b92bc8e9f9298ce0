//! Identity & dedup index over a ledger snapshot

use std::collections::HashMap;

use crate::domain::LedgerEntry;

/// Read-only index of existing ledger entries keyed by external id
///
/// When two entries share an external id the first one fetched is indexed and the
/// later ones are kept aside as duplicates.
#[derive(Debug, Default)]
pub struct LedgerIndex {
    entries: Vec<LedgerEntry>,
    by_external_id: HashMap<String, usize>,
    duplicates: Vec<usize>,
}

impl LedgerIndex {
    pub fn build(entries: Vec<LedgerEntry>) -> Self {
        let mut by_external_id = HashMap::new();
        let mut duplicates = Vec::new();

        for (position, entry) in entries.iter().enumerate() {
            let Some(external_id) = entry.external_id.as_deref().filter(|id| !id.is_empty())
            else {
                continue;
            };
            if by_external_id.contains_key(external_id) {
                duplicates.push(position);
            } else {
                by_external_id.insert(external_id.to_string(), position);
            }
        }

        Self {
            entries,
            by_external_id,
            duplicates,
        }
    }

    pub fn get(&self, external_id: &str) -> Option<&LedgerEntry> {
        self.by_external_id
            .get(external_id)
            .map(|&position| &self.entries[position])
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.by_external_id.contains_key(external_id)
    }

    /// Every entry in fetch order, duplicates included
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Entries whose external id was already taken by an earlier entry
    pub fn duplicates(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.duplicates.iter().map(|&position| &self.entries[position])
    }

    /// Existing transfers, with or without an external id
    pub fn transfers(&self) -> Vec<LedgerEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.is_transfer())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionRecord;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn entry(id: &str, external_id: Option<&str>) -> LedgerEntry {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let record = TransactionRecord::deposit(external_id.unwrap_or(""), date, Decimal::ONE, "A");
        let mut entry = LedgerEntry::from_record(id, &record);
        entry.external_id = external_id.map(str::to_string);
        entry
    }

    #[test]
    fn test_first_entry_wins() {
        let index = LedgerIndex::build(vec![
            entry("1", Some("x")),
            entry("2", Some("y")),
            entry("3", Some("x")),
        ]);

        assert_eq!(index.get("x").map(|e| e.id.as_str()), Some("1"));
        assert_eq!(index.get("y").map(|e| e.id.as_str()), Some("2"));
        let duplicates: Vec<_> = index.duplicates().map(|e| e.id.as_str()).collect();
        assert_eq!(duplicates, vec!["3"]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_entries_without_external_id_are_not_indexed() {
        let index = LedgerIndex::build(vec![entry("1", None), entry("2", Some(""))]);
        assert!(!index.contains(""));
        assert_eq!(index.duplicates().count(), 0);
        assert_eq!(index.entries().len(), 2);
    }

    #[test]
    fn test_transfers() {
        let mut transfer = entry("9", None);
        transfer.transaction_type = crate::domain::TransactionType::Transfer;
        let index = LedgerIndex::build(vec![entry("1", Some("x")), transfer]);
        let transfers = index.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].id, "9");
    }
}
