//! Duplicate detection for fetched papers
//!
//! Matching is an ordered cascade where the first hit wins:
//! 1. BibTeX key
//! 2. arXiv ID
//! 3. DOI
//! 4. Normalized title
//!
//! Lookups are read-only and, when an owner is given, restricted to papers
//! that appear in one of that owner's collections.

mod normalize;

pub use normalize::normalize_title;

use crate::sources::FetchedPaper;
use crate::storage::{PaperKey, PaperRecord, PaperStore, StorageResult};
use serde::{Deserialize, Serialize};

/// Which cascade step produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    BibtexKey,
    ArxivId,
    Doi,
    Title,
}

impl MatchType {
    fn key(&self) -> PaperKey {
        match self {
            Self::BibtexKey => PaperKey::BibtexKey,
            Self::ArxivId => PaperKey::ArxivId,
            Self::Doi => PaperKey::Doi,
            Self::Title => PaperKey::NormalizedTitle,
        }
    }
}

/// Audit details for a detected duplicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateInfo {
    /// Best available identifier of the incoming record
    pub entry_id: String,
    pub new_title: String,
    pub existing_paper_id: String,
    pub existing_title: String,
    pub match_type: MatchType,
    /// The value that matched; the normalized form for title matches
    pub match_value: String,
    pub new_authors: Option<Vec<String>>,
    pub existing_authors: Option<Vec<String>>,
    pub new_year: Option<i32>,
    pub existing_year: Option<i32>,
    pub new_venue: Option<String>,
    pub existing_venue: Option<String>,
}

/// An existing paper matched by the cascade
#[derive(Debug, Clone)]
pub struct DuplicateMatch {
    pub existing: PaperRecord,
    pub info: DuplicateInfo,
}

/// Finds an existing paper that `candidate` duplicates
///
/// # Arguments
///
/// * `store` - The paper store to search
/// * `candidate` - The incoming record
/// * `owner_scope` - Restrict the search to this user's collections
pub fn find_duplicate<S: PaperStore + ?Sized>(
    store: &S,
    candidate: &FetchedPaper,
    owner_scope: Option<&str>,
) -> StorageResult<Option<DuplicateMatch>> {
    let normalized = normalize_title(&candidate.title);
    let cascade = [
        (MatchType::BibtexKey, candidate.bibtex_key.as_deref()),
        (MatchType::ArxivId, candidate.arxiv_id.as_deref()),
        (MatchType::Doi, candidate.doi.as_deref()),
        (MatchType::Title, Some(normalized.as_str())),
    ];

    for (match_type, value) in cascade {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            continue;
        };

        if let Some(existing) = store.find_paper_by(match_type.key(), value, owner_scope)? {
            let info = describe(candidate, &existing, match_type, value);
            return Ok(Some(DuplicateMatch { existing, info }));
        }
    }

    Ok(None)
}

fn describe(
    candidate: &FetchedPaper,
    existing: &PaperRecord,
    match_type: MatchType,
    value: &str,
) -> DuplicateInfo {
    let entry_id = candidate
        .bibtex_key
        .as_ref()
        .or(candidate.arxiv_id.as_ref())
        .or(candidate.doi.as_ref())
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());

    DuplicateInfo {
        entry_id,
        new_title: candidate.title.clone(),
        existing_paper_id: existing.id.clone(),
        existing_title: existing.title.clone(),
        match_type,
        match_value: value.to_string(),
        new_authors: candidate.authors.clone(),
        existing_authors: existing.authors.clone(),
        new_year: candidate.year,
        existing_year: existing.year,
        new_venue: candidate.venue.clone(),
        existing_venue: existing.venue.clone(),
    }
}
