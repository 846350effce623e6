use crate::constants::ROW_YIELD_INTERVAL;
use crate::ingest::RowBatch;
use crate::mapping::ColumnMapping;
use crate::record::Record;

/// Output of one index-building job.
#[derive(Debug, Default)]
pub struct BuiltBatch {
    pub records: Vec<Record>,
    pub rows_seen: usize,
    pub rows_skipped: usize,
}

/// Turns a batch into records. Runs on a pool unit; the caller merges the
/// records into the index.
pub fn build_index_batch(batch: &RowBatch, mapping: &ColumnMapping) -> BuiltBatch {
    let mut built = BuiltBatch {
        records: Vec::with_capacity(batch.rows.len()),
        ..Default::default()
    };
    let Some(header) = batch.header() else {
        return built;
    };
    let resolved = mapping.resolve(&header);

    for (offset, row) in batch.rows.iter().enumerate() {
        if offset > 0 && offset % ROW_YIELD_INTERVAL == 0 {
            let _ = rayon::yield_now();
        }
        built.rows_seen += 1;

        let Some(key) = resolved.key(row) else {
            built.rows_skipped += 1;
            continue;
        };
        let names = resolved.names(row);
        built.records.push(Record {
            key,
            first_name: names.first_name,
            last_name: names.last_name,
            source_id: batch.source_name.clone(),
            row_position: batch.first_row + offset,
            original_row: row.clone(),
        });
    }

    built
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Header, Row};
    use std::sync::Arc;

    fn batch(names: &[&str], rows: &[&[&str]], first_row: usize) -> RowBatch {
        let header = Arc::new(Header::new(names.iter().map(|s| s.to_string()).collect()));
        RowBatch {
            source_name: "basis.csv".to_string(),
            first_row,
            rows: rows
                .iter()
                .map(|values| Row::new(Arc::clone(&header), values.iter().map(|s| s.to_string()).collect()))
                .collect(),
            consumed_fraction: 1.0,
        }
    }

    #[test]
    fn test_builds_records_and_skips_bad_keys() {
        let b = batch(
            &["email", "first_name", "last_name"],
            &[
                &[" A@X.com ", "Jon", "Doe"],
                &["", "No", "Key"],
                &["b@x.com", "", ""],
                &["c d@x.com", "Bad", "Key"],
            ],
            100,
        );
        let built = build_index_batch(&b, &ColumnMapping::default());

        assert_eq!(built.rows_seen, 4);
        assert_eq!(built.rows_skipped, 2);
        assert_eq!(built.records.len(), 2);
        assert_eq!(built.records[0].key, "a@x.com");
        assert_eq!(built.records[0].row_position, 100);
        assert_eq!(built.records[0].source_id, "basis.csv");
        assert_eq!(built.records[1].key, "b@x.com");
        assert_eq!(built.records[1].row_position, 102);
        assert_eq!(built.records[1].first_name, "");
    }

    #[test]
    fn test_combined_name_split() {
        let b = batch(&["email", "name"], &[&["a@x.com", "Mary Ann Smith"], &["b@x.com", "Prince"]], 0);
        let built = build_index_batch(&b, &ColumnMapping::combined("email", "name"));

        assert_eq!(built.records[0].first_name, "Mary");
        assert_eq!(built.records[0].last_name, "Ann Smith");
        assert_eq!(built.records[1].first_name, "Prince");
        assert_eq!(built.records[1].last_name, "");
    }

    #[test]
    fn test_empty_batch() {
        let b = batch(&["email"], &[], 0);
        let built = build_index_batch(&b, &ColumnMapping::default());
        assert_eq!(built.rows_seen, 0);
        assert!(built.records.is_empty());
    }
}
