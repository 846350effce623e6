use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Ordered field names shared by every row of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    names: Vec<String>,
}

impl Header {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Exact name match first, then a case-insensitive trimmed match.
    pub fn position(&self, name: &str) -> Option<usize> {
        if let Some(idx) = self.names.iter().position(|n| n == name) {
            return Some(idx);
        }
        let wanted = name.trim().to_lowercase();
        self.names
            .iter()
            .position(|n| n.trim().to_lowercase() == wanted)
    }
}

/// One parsed row: values positionally aligned with a shared header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    header: Arc<Header>,
    values: Vec<String>,
}

impl Row {
    pub fn new(header: Arc<Header>, values: Vec<String>) -> Self {
        Self { header, values }
    }

    pub fn header(&self) -> &Arc<Header> {
        &self.header
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Short rows read as empty for missing trailing columns.
    pub fn value_at(&self, idx: usize) -> &str {
        self.values.get(idx).map(String::as_str).unwrap_or("")
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.header.position(field).map(|idx| self.value_at(idx))
    }

    /// Field name to value pairs in header order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header
            .names()
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), self.value_at(idx)))
    }
}

/// An indexed basis record. Immutable once built; shared between the index
/// and the subsets handed to pool units.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: String,
    pub first_name: String,
    pub last_name: String,
    pub source_id: String,
    pub row_position: usize,
    pub original_row: Row,
}

pub type SharedRecord = Arc<Record>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NameParts {
    pub first_name: String,
    pub last_name: String,
}

/// Lowercase + trim. Returns `None` for keys that cannot be indexed:
/// empty after trimming, or containing internal whitespace.
pub fn normalize_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return None;
    }
    Some(trimmed.to_lowercase())
}

/// Splits a combined name at its first space. No space means the whole
/// string is the first name.
pub fn split_combined_name(combined: &str) -> NameParts {
    let trimmed = combined.trim();
    match trimmed.split_once(' ') {
        Some((first, rest)) => NameParts {
            first_name: first.to_string(),
            last_name: rest.trim().to_string(),
        },
        None => NameParts {
            first_name: trimmed.to_string(),
            last_name: String::new(),
        },
    }
}

/// Domain part of a key (text after the last `@`), lowercased.
pub fn key_domain(key: &str) -> Option<String> {
    let (_, domain) = key.rsplit_once('@')?;
    let domain = domain.trim().to_lowercase();
    if domain.is_empty() {
        None
    } else {
        Some(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(names: &[&str]) -> Arc<Header> {
        Arc::new(Header::new(names.iter().map(|s| s.to_string()).collect()))
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  A@X.com "), Some("a@x.com".to_string()));
        assert_eq!(normalize_key("   "), None);
        assert_eq!(normalize_key(""), None);
        assert_eq!(normalize_key("a b@x.com"), None);
    }

    #[test]
    fn test_split_combined_name() {
        let parts = split_combined_name("Jon Van Doe");
        assert_eq!(parts.first_name, "Jon");
        assert_eq!(parts.last_name, "Van Doe");

        let parts = split_combined_name("  Cher ");
        assert_eq!(parts.first_name, "Cher");
        assert_eq!(parts.last_name, "");

        assert_eq!(split_combined_name(""), NameParts::default());
    }

    #[test]
    fn test_key_domain() {
        assert_eq!(key_domain("a@X.com"), Some("x.com".to_string()));
        assert_eq!(key_domain("weird@name@sub.x.com"), Some("sub.x.com".to_string()));
        assert_eq!(key_domain("no-at-sign"), None);
        assert_eq!(key_domain("trailing@"), None);
    }

    #[test]
    fn test_row_field_access() {
        let row = Row::new(header(&["Email", "First Name"]), vec!["a@x.com".to_string()]);
        assert_eq!(row.get("Email"), Some("a@x.com"));
        assert_eq!(row.get("first name"), Some(""));
        assert_eq!(row.get("missing"), None);

        let fields: Vec<_> = row.fields().collect();
        assert_eq!(fields, vec![("Email", "a@x.com"), ("First Name", "")]);
    }
}
