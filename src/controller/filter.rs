use chrono::Local;
use std::fmt;

use crate::cache::RecentCache;
use crate::constants::LOG_TIMESTAMP_FORMAT;
use crate::controller::basis::BasisTable;
use crate::record::{key_domain, normalize_key};

/// What a phase-3 pass did with one basis row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Kept,
    Cleared,
    SkippedNoKey,
}

impl fmt::Display for FilterDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FilterDecision::Kept => "kept",
            FilterDecision::Cleared => "cleared",
            FilterDecision::SkippedNoKey => "skipped-no-key",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterSummary {
    pub kept: usize,
    pub cleared: usize,
    pub skipped: usize,
    /// Filled in by the controller once results are reconciled.
    pub results_removed: usize,
}

/// Basis content after a phase-3 pass, plus its diagnostic log.
#[derive(Debug, Clone, Default)]
pub struct FilteredBasis {
    pub table: BasisTable,
    pub log: Vec<String>,
    pub summary: FilterSummary,
}

/// Target domains for phase 3. A filter domain `d` matches a key domain
/// equal to `d` or ending in `.d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainFilter {
    domains: Vec<String>,
}

impl DomainFilter {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for domain in domains {
            let domain = domain.as_ref().trim().trim_start_matches('@').to_lowercase();
            if !domain.is_empty() && !normalized.contains(&domain) {
                normalized.push(domain);
            }
        }
        Self { domains: normalized }
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn matches_domain(&self, domain: &str) -> bool {
        self.domains.iter().any(|target| {
            domain == target
                || domain
                    .strip_suffix(target.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// Decision for one key, memoised per domain.
    pub fn matches_key(&self, key: &str, cache: &mut RecentCache<String, bool>) -> bool {
        match key_domain(key) {
            Some(domain) => {
                cache.get_or_insert_with(domain.clone(), || self.matches_domain(&domain))
            }
            None => false,
        }
    }

    /// Clears the key cell of every row whose key domain matches. Rows are
    /// never dropped.
    pub fn apply(
        &self,
        basis: &BasisTable,
        key_column: Option<usize>,
        cache: &mut RecentCache<String, bool>,
    ) -> FilteredBasis {
        let mut table = basis.clone();
        let mut log = Vec::with_capacity(basis.len());
        let mut summary = FilterSummary::default();

        for row in 0..table.len() {
            let raw = key_column.map(|col| table.cell(row, col).to_string());
            let key = raw.as_deref().and_then(normalize_key);
            let decision = match (&key, key_column) {
                (Some(key), Some(col)) if self.matches_key(key, cache) => {
                    table.set_cell(row, col, "");
                    summary.cleared += 1;
                    FilterDecision::Cleared
                }
                (Some(_), _) => {
                    summary.kept += 1;
                    FilterDecision::Kept
                }
                (None, _) => {
                    summary.skipped += 1;
                    FilterDecision::SkippedNoKey
                }
            };
            log.push(format_log_line(row, decision, key.as_deref().unwrap_or("")));
        }

        FilteredBasis { table, log, summary }
    }
}

pub fn format_log_line(row: usize, decision: FilterDecision, key: &str) -> String {
    format!(
        "{} row {} {}: {}",
        Local::now().format(LOG_TIMESTAMP_FORMAT),
        row,
        decision,
        key
    )
}
