use std::sync::Arc;

use crate::constants::{CLASSIFICATION_COLUMN, MATCHED_SOURCES_COLUMN, MULTI_VALUE_SEPARATOR};
use crate::ingest::RowBatch;
use crate::record::{Header, Row};

/// Retained basis content: header plus every data row, in source order,
/// with the augmentation columns written by phases 1 and 2.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasisTable {
    source_name: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl BasisTable {
    pub fn new(source_name: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            headers: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends the rows of one batch. The first batch fixes the header.
    pub fn append_batch(&mut self, batch: &RowBatch) {
        if self.headers.is_empty() {
            if let Some(header) = batch.header() {
                self.headers = header.names().to_vec();
            }
        }
        self.rows
            .extend(batch.rows.iter().map(|row| row.values().to_vec()));
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        Header::new(self.headers.clone()).position(name)
    }

    /// Index of `name`, appending an empty column if it is missing.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column(name) {
            return idx;
        }
        self.headers.push(name.to_string());
        self.headers.len() - 1
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|values| values.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Overwrites one cell, padding short rows. Out-of-range rows are ignored.
    pub fn set_cell(&mut self, row: usize, column: usize, value: &str) {
        let Some(values) = self.rows.get_mut(row) else {
            return;
        };
        if values.len() <= column {
            values.resize(column + 1, String::new());
        }
        values[column] = value.to_string();
    }

    /// Adds `value` to a `;`-separated cell unless it is already listed.
    pub fn merge_cell(&mut self, row: usize, column: usize, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        let current = self.cell(row, column);
        let mut parts: Vec<&str> = current
            .split(MULTI_VALUE_SEPARATOR)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.contains(&value) {
            return;
        }
        parts.push(value);
        let merged = parts.join(MULTI_VALUE_SEPARATOR);
        self.set_cell(row, column, &merged);
    }

    /// Records that basis row `row` was matched from `matched_source`,
    /// with the labels the match produced.
    pub fn augment(&mut self, row: usize, matched_source: &str, labels: &[String]) {
        if row >= self.rows.len() {
            return;
        }
        let sources = self.ensure_column(MATCHED_SOURCES_COLUMN);
        self.merge_cell(row, sources, matched_source);
        if !labels.is_empty() {
            let classification = self.ensure_column(CLASSIFICATION_COLUMN);
            for label in labels {
                self.merge_cell(row, classification, label);
            }
        }
    }

    /// Rows re-cut into batches sharing one header, for rebuilding an index.
    pub fn to_batches(&self, batch_size: usize) -> Vec<RowBatch> {
        let header = Arc::new(Header::new(self.headers.clone()));
        let total = self.rows.len().max(1);
        self.rows
            .chunks(batch_size.max(1))
            .scan(0usize, |first_row, chunk| {
                let start = *first_row;
                *first_row += chunk.len();
                Some(RowBatch {
                    source_name: self.source_name.clone(),
                    first_row: start,
                    rows: chunk
                        .iter()
                        .map(|values| Row::new(Arc::clone(&header), values.clone()))
                        .collect(),
                    consumed_fraction: *first_row as f64 / total as f64,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BasisTable {
        let header = Arc::new(Header::new(vec!["email".to_string(), "first_name".to_string()]));
        let batch = RowBatch {
            source_name: "basis.csv".to_string(),
            first_row: 0,
            rows: vec![
                Row::new(Arc::clone(&header), vec!["a@x.com".to_string(), "Jon".to_string()]),
                Row::new(Arc::clone(&header), vec!["b@y.com".to_string()]),
            ],
            consumed_fraction: 1.0,
        };
        let mut table = BasisTable::new("basis.csv");
        table.append_batch(&batch);
        table
    }

    #[test]
    fn test_append_keeps_header_and_order() {
        let table = table();
        assert_eq!(table.headers(), &["email", "first_name"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(1, 0), "b@y.com");
        assert_eq!(table.cell(1, 1), "");
    }

    #[test]
    fn test_augment_merges_distinct_values() {
        let mut table = table();
        table.augment(0, "crm.csv", &["gold".to_string()]);
        table.augment(0, "crm.csv", &["gold".to_string(), "vip".to_string()]);
        table.augment(0, "shop.csv", &[]);

        let sources = table.column(MATCHED_SOURCES_COLUMN).unwrap();
        let classification = table.column(CLASSIFICATION_COLUMN).unwrap();
        assert_eq!(table.cell(0, sources), "crm.csv;shop.csv");
        assert_eq!(table.cell(0, classification), "gold;vip");
        assert_eq!(table.cell(1, sources), "");
    }

    #[test]
    fn test_augment_out_of_range_is_ignored() {
        let mut table = table();
        table.augment(9, "crm.csv", &[]);
        assert!(table.column(MATCHED_SOURCES_COLUMN).is_none());
    }

    #[test]
    fn test_to_batches_positions() {
        let table = table();
        let batches = table.to_batches(1);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].first_row, 1);
        assert_eq!(batches[1].consumed_fraction, 1.0);
        assert_eq!(batches[0].rows[0].get("email"), Some("a@x.com"));
    }
}
