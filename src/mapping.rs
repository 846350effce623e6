use serde::{Deserialize, Serialize};

use crate::record::{normalize_key, split_combined_name, Header, NameParts, Row};

/// Which columns of a source carry the key, the names and the optional
/// classifier code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub key_field: String,
    pub first_name_field: String,
    pub last_name_field: String,
    #[serde(default)]
    pub split_combined_name: bool,
    #[serde(default)]
    pub classifier_field: Option<String>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            key_field: "email".to_string(),
            first_name_field: "first_name".to_string(),
            last_name_field: "last_name".to_string(),
            split_combined_name: false,
            classifier_field: None,
        }
    }
}

impl ColumnMapping {
    pub fn new(key_field: &str, first_name_field: &str, last_name_field: &str) -> Self {
        Self {
            key_field: key_field.to_string(),
            first_name_field: first_name_field.to_string(),
            last_name_field: last_name_field.to_string(),
            split_combined_name: false,
            classifier_field: None,
        }
    }

    /// Mapping that reads both names out of one combined column.
    pub fn combined(key_field: &str, name_field: &str) -> Self {
        Self {
            key_field: key_field.to_string(),
            first_name_field: name_field.to_string(),
            last_name_field: name_field.to_string(),
            split_combined_name: true,
            classifier_field: None,
        }
    }

    pub fn with_classifier(mut self, field: &str) -> Self {
        self.classifier_field = Some(field.to_string());
        self
    }

    pub fn resolve(&self, header: &Header) -> ResolvedMapping {
        ResolvedMapping {
            key_idx: header.position(&self.key_field),
            first_name_idx: header.position(&self.first_name_field),
            last_name_idx: if self.split_combined_name {
                None
            } else {
                header.position(&self.last_name_field)
            },
            split_combined_name: self.split_combined_name,
            classifier_idx: self
                .classifier_field
                .as_deref()
                .and_then(|field| header.position(field)),
            classifier_field: self.classifier_field.clone(),
        }
    }
}

/// Source-name pattern that swaps in a known mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingOverride {
    pub pattern: String,
    pub mapping: ColumnMapping,
}

impl MappingOverride {
    pub fn matches(&self, source_name: &str) -> bool {
        let pattern = self.pattern.trim().to_lowercase();
        !pattern.is_empty() && source_name.to_lowercase().contains(&pattern)
    }
}

/// Export layouts of well-known contact tools.
pub fn builtin_overrides() -> Vec<MappingOverride> {
    vec![
        MappingOverride {
            pattern: "mailchimp".to_string(),
            mapping: ColumnMapping::new("Email Address", "First Name", "Last Name"),
        },
        MappingOverride {
            pattern: "salesforce".to_string(),
            mapping: ColumnMapping::new("Email", "FirstName", "LastName"),
        },
        MappingOverride {
            pattern: "hubspot".to_string(),
            mapping: ColumnMapping::new("Email", "First Name", "Last Name"),
        },
        MappingOverride {
            pattern: "outlook".to_string(),
            mapping: ColumnMapping::new("E-mail Address", "First Name", "Last Name"),
        },
        MappingOverride {
            pattern: "google_contacts".to_string(),
            mapping: ColumnMapping::combined("E-mail 1 - Value", "Name"),
        },
    ]
}

#[derive(Debug, Clone)]
pub struct MappingTable {
    overrides: Vec<MappingOverride>,
}

impl MappingTable {
    /// Configured overrides are consulted before the built-in table.
    pub fn new(configured: Vec<MappingOverride>) -> Self {
        let mut overrides = configured;
        overrides.extend(builtin_overrides());
        Self { overrides }
    }

    pub fn mapping_for(&self, source_name: &str, default: &ColumnMapping) -> ColumnMapping {
        self.overrides
            .iter()
            .find(|o| o.matches(source_name))
            .map(|o| o.mapping.clone())
            .unwrap_or_else(|| default.clone())
    }
}

impl Default for MappingTable {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// A mapping bound to column positions of one header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMapping {
    pub key_idx: Option<usize>,
    pub first_name_idx: Option<usize>,
    pub last_name_idx: Option<usize>,
    pub split_combined_name: bool,
    pub classifier_idx: Option<usize>,
    pub classifier_field: Option<String>,
}

impl ResolvedMapping {
    pub fn key(&self, row: &Row) -> Option<String> {
        normalize_key(row.value_at(self.key_idx?))
    }

    pub fn names(&self, row: &Row) -> NameParts {
        let first = self
            .first_name_idx
            .map(|idx| row.value_at(idx))
            .unwrap_or("");
        if self.split_combined_name {
            return split_combined_name(first);
        }
        let last = self
            .last_name_idx
            .map(|idx| row.value_at(idx))
            .unwrap_or("");
        NameParts {
            first_name: first.trim().to_string(),
            last_name: last.trim().to_string(),
        }
    }

    pub fn classifier_value<'a>(&self, row: &'a Row) -> Option<&'a str> {
        self.classifier_idx.map(|idx| row.value_at(idx))
    }
}
