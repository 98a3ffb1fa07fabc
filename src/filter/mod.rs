//! Keyword filter shared by sources
//!
//! A filter is a list of expressions evaluated against a paper's title and
//! abstract:
//! - `+term` is required: every required term must match
//! - `-term` is excluded: no excluded term may match
//! - `term` is optional: when any optional terms exist, at least one must match
//!
//! `*` inside a term matches any run of characters. Matching is
//! case-insensitive. Required terms are checked first, then excluded terms,
//! then optional terms.

mod matcher;

pub use matcher::TermMatcher;

use crate::ConfigError;

/// A parsed set of keyword expressions
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    required: Vec<TermMatcher>,
    excluded: Vec<TermMatcher>,
    optional: Vec<TermMatcher>,
}

impl KeywordFilter {
    /// Parses keyword expressions
    ///
    /// Blank expressions are ignored. An empty list yields a filter that
    /// accepts everything.
    pub fn parse<S: AsRef<str>>(expressions: &[S]) -> Result<Self, ConfigError> {
        let mut filter = Self::default();

        for raw in expressions {
            let expr = raw.as_ref().trim();
            if expr.is_empty() {
                continue;
            }

            let (bucket, term) = if let Some(term) = expr.strip_prefix('+') {
                (&mut filter.required, term)
            } else if let Some(term) = expr.strip_prefix('-') {
                (&mut filter.excluded, term)
            } else {
                (&mut filter.optional, expr)
            };

            let matcher = TermMatcher::new(term).map_err(|e| ConfigError::InvalidField {
                key: "keywords".to_string(),
                reason: format!("invalid keyword '{}': {}", expr, e),
            })?;
            bucket.push(matcher);
        }

        Ok(filter)
    }

    /// Returns true if the filter has no terms
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.excluded.is_empty() && self.optional.is_empty()
    }

    /// Evaluates the filter against already lowercased text
    pub fn matches_text(&self, text: &str) -> bool {
        if !self.required.iter().all(|term| term.matches(text)) {
            return false;
        }

        if self.excluded.iter().any(|term| term.matches(text)) {
            return false;
        }

        self.optional.is_empty() || self.optional.iter().any(|term| term.matches(text))
    }

    /// Evaluates the filter against a paper's title and abstract
    pub fn matches_paper(&self, title: &str, abstract_text: Option<&str>) -> bool {
        if self.is_empty() {
            return true;
        }
        let text = format!("{} {}", title, abstract_text.unwrap_or("")).to_lowercase();
        self.matches_text(&text)
    }
}
