//! Structured field filters.
//!
//! Every field is multi-valued. Category and complexity use exact membership,
//! frameworks and providers match when the record shares at least one value.
//! Values are compared as normalised labels; a value outside the vocabulary
//! simply matches nothing. The pseudo-value `all` and empty strings are
//! ignored.

use crate::models::{normalize_label, AgentRecord, Vocabulary};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SearchFilters {
    pub categories: Vec<String>,
    pub frameworks: Vec<String>,
    pub providers: Vec<String>,
    pub complexities: Vec<String>,
    /// Keep only records that run against local models.
    pub local_only: bool,
}

fn canonical(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = values
        .iter()
        .map(|v| normalize_label(v))
        .filter(|v| !v.is_empty() && v != "all")
        .collect();
    out.sort();
    out.dedup();
    out
}

impl SearchFilters {
    /// Returns a canonical form: normalised, sorted, de-duplicated, with
    /// `all` and blanks removed. Two filters that select the same records
    /// produce the same canonical value, which makes it usable as a cache key.
    pub fn normalized(self) -> Self {
        Self {
            categories: canonical(self.categories),
            frameworks: canonical(self.frameworks),
            providers: canonical(self.providers),
            complexities: canonical(self.complexities),
            local_only: self.local_only,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.local_only
            && self.categories.is_empty()
            && self.frameworks.is_empty()
            && self.providers.is_empty()
            && self.complexities.is_empty()
    }

    /// Expects a filter that has already been through [`normalized`](Self::normalized).
    pub fn matches(&self, record: &AgentRecord) -> bool {
        if self.local_only && !record.supports_local_models {
            return false;
        }
        if !self.categories.is_empty()
            && !self.categories.iter().any(|c| c == record.category.as_str())
        {
            return false;
        }
        if !self.complexities.is_empty()
            && !self
                .complexities
                .iter()
                .any(|c| c == record.complexity.as_str())
        {
            return false;
        }
        if !self.frameworks.is_empty()
            && !record
                .frameworks
                .iter()
                .any(|f| self.frameworks.iter().any(|w| w == f.as_str()))
        {
            return false;
        }
        if !self.providers.is_empty()
            && !record
                .llm_providers
                .iter()
                .any(|p| self.providers.iter().any(|w| w == p.as_str()))
        {
            return false;
        }
        true
    }
}

/// Splits a comma-separated query-string value into its parts.
pub fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
