use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::CLASSIFIER_CODE_SEPARATORS;

/// Lookup tables keyed by classifier field. Contents are business data
/// supplied through configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationTables {
    #[serde(default)]
    pub tables: HashMap<String, HashMap<String, String>>,
}

impl ClassificationTables {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn insert(&mut self, field: &str, code: &str, label: &str) {
        self.tables
            .entry(field.trim().to_lowercase())
            .or_default()
            .insert(code.trim().to_lowercase(), label.to_string());
    }

    fn table_for(&self, field: &str) -> Option<&HashMap<String, String>> {
        let wanted = field.trim().to_lowercase();
        self.tables
            .iter()
            .find(|(name, _)| name.trim().to_lowercase() == wanted)
            .map(|(_, table)| table)
    }

    /// Maps each code of `raw` through the table selected by `field`.
    /// Unknown codes produce nothing; labels come back deduplicated in
    /// order of first appearance.
    pub fn classify(&self, field: &str, raw: &str) -> Vec<String> {
        let Some(table) = self.table_for(field) else {
            return Vec::new();
        };

        let mut labels: Vec<String> = Vec::new();
        for code in raw.split(CLASSIFIER_CODE_SEPARATORS) {
            let code = code.trim().to_lowercase();
            if code.is_empty() {
                continue;
            }
            let label = table
                .get(&code)
                .or_else(|| table.iter().find(|(k, _)| k.trim().to_lowercase() == code).map(|(_, v)| v));
            if let Some(label) = label {
                if !labels.contains(label) {
                    labels.push(label.clone());
                }
            }
        }
        labels
    }
}
