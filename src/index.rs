use std::collections::HashMap;
use std::sync::Arc;

use crate::record::{Record, SharedRecord};

/// Key → records in insertion order. Never holds an empty key.
#[derive(Debug, Default, Clone)]
pub struct RecordIndex {
    entries: HashMap<String, Vec<SharedRecord>>,
    record_count: usize,
}

/// Read-only slice of the index handed to a matching job.
pub type IndexSubset = HashMap<String, Vec<SharedRecord>>;

impl RecordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false (and drops the record) when its key is empty.
    pub fn insert(&mut self, record: Record) -> bool {
        if record.key.trim().is_empty() {
            return false;
        }
        self.entries
            .entry(record.key.clone())
            .or_default()
            .push(Arc::new(record));
        self.record_count += 1;
        true
    }

    pub fn get(&self, key: &str) -> Option<&[SharedRecord]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.record_count = 0;
    }

    /// Cheap copy of the entries for `keys`; records are shared, not cloned.
    pub fn subset<'a, I>(&self, keys: I) -> IndexSubset
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut subset = IndexSubset::new();
        for key in keys {
            if subset.contains_key(key) {
                continue;
            }
            if let Some(records) = self.entries.get(key) {
                subset.insert(key.to_string(), records.clone());
            }
        }
        subset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Header, Row};

    fn record(key: &str, source: &str, position: usize) -> Record {
        let header = Arc::new(Header::new(vec!["email".to_string()]));
        Record {
            key: key.to_string(),
            first_name: "Jon".to_string(),
            last_name: "Doe".to_string(),
            source_id: source.to_string(),
            row_position: position,
            original_row: Row::new(header, vec![key.to_string()]),
        }
    }

    #[test]
    fn test_insert_keeps_order_per_key() {
        let mut index = RecordIndex::new();
        assert!(index.insert(record("a@x.com", "basis.csv", 0)));
        assert!(index.insert(record("a@x.com", "other.csv", 7)));
        assert!(index.insert(record("b@x.com", "basis.csv", 1)));

        let records = index.get("a@x.com").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source_id, "basis.csv");
        assert_eq!(records[1].row_position, 7);
        assert_eq!(index.len(), 2);
        assert_eq!(index.record_count(), 3);
    }

    #[test]
    fn test_rejects_empty_key() {
        let mut index = RecordIndex::new();
        assert!(!index.insert(record("  ", "basis.csv", 0)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_subset_shares_records() {
        let mut index = RecordIndex::new();
        index.insert(record("a@x.com", "basis.csv", 0));
        index.insert(record("b@x.com", "basis.csv", 1));

        let subset = index.subset(["a@x.com", "a@x.com", "missing@x.com"]);
        assert_eq!(subset.len(), 1);
        assert!(Arc::ptr_eq(&subset["a@x.com"][0], &index.get("a@x.com").unwrap()[0]));
    }

    #[test]
    fn test_clear() {
        let mut index = RecordIndex::new();
        index.insert(record("a@x.com", "basis.csv", 0));
        index.clear();
        assert!(!index.contains_key("a@x.com"));
        assert_eq!(index.record_count(), 0);
    }
}
