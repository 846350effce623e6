use serde::{Deserialize, Serialize};

use crate::classify::ClassificationTables;
use crate::constants::{ACCEPTANCE_THRESHOLD, CONFIDENCE_COMPONENTS, KEY_MATCH_WEIGHT, ROW_YIELD_INTERVAL};
use crate::index::IndexSubset;
use crate::ingest::RowBatch;
use crate::mapping::ColumnMapping;

/// A probable duplicate found in a comparison source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateResult {
    /// Assigned by the controller in append order.
    pub id: u64,
    pub key: String,
    pub first_name: String,
    pub last_name: String,
    pub source_id: String,
    pub confidence: f64,
    pub row_position: usize,
    pub matched_source: String,
    pub matched_row_position: usize,
    #[serde(default)]
    pub classification: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MatchedBatch {
    pub results: Vec<DuplicateResult>,
    pub rows_seen: usize,
    pub rows_skipped: usize,
}

/// Positional character agreement over the shared prefix, divided by the
/// longer length. Case-insensitive, trimmed.
pub fn positional_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longer = a.len().max(b.len());
    let agreeing = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    agreeing as f64 / longer as f64
}

/// (1 + first name similarity + last name similarity) / 3; the leading 1
/// stands for the exact key match.
pub fn confidence(first_similarity: f64, last_similarity: f64) -> f64 {
    ((KEY_MATCH_WEIGHT + first_similarity + last_similarity) / CONFIDENCE_COMPONENTS).clamp(0.0, 1.0)
}

pub fn is_accepted(confidence: f64) -> bool {
    confidence >= ACCEPTANCE_THRESHOLD
}

/// Scores every row of `batch` against the candidate records in `subset`.
/// Records from the batch's own source are never candidates; the first
/// accepted candidate wins for a row.
pub fn match_batch(
    batch: &RowBatch,
    subset: &IndexSubset,
    mapping: &ColumnMapping,
    classification: &ClassificationTables,
) -> MatchedBatch {
    let mut matched = MatchedBatch::default();
    let Some(header) = batch.header() else {
        return matched;
    };
    let resolved = mapping.resolve(&header);

    for (offset, row) in batch.rows.iter().enumerate() {
        if offset > 0 && offset % ROW_YIELD_INTERVAL == 0 {
            let _ = rayon::yield_now();
        }
        matched.rows_seen += 1;

        let Some(key) = resolved.key(row) else {
            matched.rows_skipped += 1;
            continue;
        };
        let Some(candidates) = subset.get(&key) else {
            continue;
        };
        let names = resolved.names(row);

        let accepted = candidates
            .iter()
            .filter(|record| record.source_id != batch.source_name)
            .find_map(|record| {
                let score = confidence(
                    positional_similarity(&names.first_name, &record.first_name),
                    positional_similarity(&names.last_name, &record.last_name),
                );
                is_accepted(score).then_some((record, score))
            });

        if let Some((record, score)) = accepted {
            let labels = match (resolved.classifier_field.as_deref(), resolved.classifier_value(row)) {
                (Some(field), Some(raw)) => classification.classify(field, raw),
                _ => Vec::new(),
            };
            matched.results.push(DuplicateResult {
                id: 0,
                key,
                first_name: names.first_name,
                last_name: names.last_name,
                source_id: batch.source_name.clone(),
                confidence: score,
                row_position: batch.first_row + offset,
                matched_source: record.source_id.clone(),
                matched_row_position: record.row_position,
                classification: labels,
            });
        }
    }

    matched
}
