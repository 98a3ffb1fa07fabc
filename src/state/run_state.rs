//! Run-level and paper-level state definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the state of one execution of a crawl task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Execution has started and has not been finalized
    Running,

    // ===== Terminal States =====
    /// Completed without any error
    Success,

    /// Completed, but some fetched items could not be processed
    Partial,

    /// A precondition or the fetch itself failed
    Failed,
}

impl RunStatus {
    /// Returns true if the run has been finalized
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Whether a paper can be read, derived from its URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperStatus {
    Accessible,
    NoAccess,
}

impl PaperStatus {
    /// Derives the status from the arXiv and PDF URLs
    ///
    /// This is always recomputed from the record, never copied from elsewhere.
    pub fn from_urls(url_arxiv: Option<&str>, url_pdf: Option<&str>) -> Self {
        if url_arxiv.is_some() || url_pdf.is_some() {
            Self::Accessible
        } else {
            Self::NoAccess
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Accessible => "accessible",
            Self::NoAccess => "no_access",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "accessible" => Some(Self::Accessible),
            "no_access" => Some(Self::NoAccess),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_roundtrip() {
        for status in &[
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Partial,
            RunStatus::Failed,
        ] {
            let parsed = RunStatus::from_db_string(status.to_db_string());
            assert_eq!(Some(*status), parsed);
        }
    }

    #[test]
    fn test_run_status_invalid() {
        assert_eq!(RunStatus::from_db_string("completed"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Partial.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_paper_status_from_urls() {
        assert_eq!(
            PaperStatus::from_urls(Some("https://arxiv.org/abs/1"), None),
            PaperStatus::Accessible
        );
        assert_eq!(
            PaperStatus::from_urls(None, Some("https://x.org/a.pdf")),
            PaperStatus::Accessible
        );
        assert_eq!(PaperStatus::from_urls(None, None), PaperStatus::NoAccess);
    }
}
