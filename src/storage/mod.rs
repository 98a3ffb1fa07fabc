//! Storage module for persisting crawl data
//!
//! This module defines the stores the crawl subsystem talks to, and a SQLite
//! implementation of all of them:
//! - Paper store (lookup by external identifier, insert, update)
//! - Collection store (resolve/create collections, ordered membership rows)
//! - User settings store (opaque per-user secrets)
//! - Task store (crawl task definitions and their run audit records)

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{
    CollectionStore, CrawlStore, PaperStore, StorageError, StorageResult, TaskStore,
    Transactional, UserSettingsStore,
};

use crate::sources::FetchedPaper;
use crate::state::{
    DuplicateStrategy, PaperStatus, RunStatus, ScheduleType, TargetMode,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Opaque per-user key-value settings, such as API keys
pub type UserSettings = HashMap<String, String>;

/// A store shared between the scheduler loop and ad-hoc executions
pub type SharedStore = Arc<Mutex<dyn CrawlStore + Send>>;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Wraps a storage backend so it can be shared across tasks
pub fn share<S: CrawlStore + Send + 'static>(storage: S) -> SharedStore {
    Arc::new(Mutex::new(storage))
}

/// Locks a shared store
///
/// The guard must never be held across an `.await`.
pub fn lock_store(
    store: &SharedStore,
) -> StorageResult<MutexGuard<'_, dyn CrawlStore + Send + 'static>> {
    store.lock().map_err(|_| StorageError::LockPoisoned)
}

/// Runs `f` inside a transaction, committing on success and rolling back on error
pub fn in_transaction<T, F>(store: &mut (dyn CrawlStore + Send), f: F) -> StorageResult<T>
where
    F: FnOnce(&mut (dyn CrawlStore + Send)) -> StorageResult<T>,
{
    store.begin()?;
    match f(store) {
        Ok(value) => {
            if let Err(e) = store.commit() {
                if let Err(rollback_err) = store.rollback() {
                    tracing::error!("Rollback after failed commit failed: {}", rollback_err);
                }
                return Err(e);
            }
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = store.rollback() {
                tracing::error!("Rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

/// Formats a timestamp for storage
///
/// Fixed precision keeps stored timestamps lexically ordered.
pub fn to_db_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a stored timestamp
pub fn from_db_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("invalid timestamp '{}': {}", s, e)))
}

/// External identifier kinds a paper can be looked up by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperKey {
    BibtexKey,
    ArxivId,
    Doi,
    NormalizedTitle,
}

impl PaperKey {
    /// The papers column holding this identifier
    pub fn column(&self) -> &'static str {
        match self {
            Self::BibtexKey => "bibtex_key",
            Self::ArxivId => "arxiv_id",
            Self::Doi => "doi",
            Self::NormalizedTitle => "normalized_title",
        }
    }
}

/// Represents a paper in the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: String,
    pub title: String,
    pub authors: Option<Vec<String>>,
    pub venue: Option<String>,
    pub year: Option<i32>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub status: PaperStatus,
    pub bibtex_key: Option<String>,
    pub arxiv_id: Option<String>,
    pub doi: Option<String>,
    pub url_arxiv: Option<String>,
    pub url_pdf: Option<String>,
    pub url_code: Option<String>,
    pub url_project: Option<String>,
    pub tags: Option<Vec<String>>,
    pub created_at: String,
    pub updated_at: String,
}

impl PaperRecord {
    /// Overwrites every field that is present in `fetched`
    ///
    /// Absent fields keep their current value. The status is recomputed from
    /// the merged URLs afterwards.
    pub fn apply(&mut self, fetched: &FetchedPaper) {
        fn overwrite<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        }

        self.title = fetched.title.clone();
        overwrite(&mut self.authors, &fetched.authors);
        overwrite(&mut self.venue, &fetched.venue);
        overwrite(&mut self.year, &fetched.year);
        overwrite(&mut self.abstract_text, &fetched.abstract_text);
        overwrite(&mut self.bibtex_key, &fetched.bibtex_key);
        overwrite(&mut self.arxiv_id, &fetched.arxiv_id);
        overwrite(&mut self.doi, &fetched.doi);
        overwrite(&mut self.url_arxiv, &fetched.url_arxiv);
        overwrite(&mut self.url_pdf, &fetched.url_pdf);
        overwrite(&mut self.url_code, &fetched.url_code);
        overwrite(&mut self.url_project, &fetched.url_project);
        overwrite(&mut self.tags, &fetched.tags);
        self.status =
            PaperStatus::from_urls(self.url_arxiv.as_deref(), self.url_pdf.as_deref());
    }
}

/// Represents a collection in the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_by: String,
    pub visibility: String,
    pub task_type: String,
    pub task_source: Option<String>,
    pub task_source_display: Option<String>,
    pub created_at: String,
}

/// Fields for creating a collection
#[derive(Debug, Clone)]
pub struct NewCollection {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_by: String,
    pub task_type: String,
    pub task_source: Option<String>,
    pub task_source_display: Option<String>,
}

/// A paper's membership in a collection
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipRecord {
    pub collection_id: String,
    pub paper_id: String,
    pub group_name: Option<String>,
    pub group_tag: Option<String>,
    pub section_name: Option<String>,
    pub display_order: i64,
}

/// Where a crawl task writes its papers
///
/// Exactly one of a target collection or a new-collection prefix exists,
/// depending on the mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target_mode", rename_all = "snake_case")]
pub enum CrawlTarget {
    Append {
        #[serde(rename = "target_collection_id")]
        collection_id: String,
    },
    CreateNew {
        #[serde(rename = "new_collection_prefix")]
        prefix: String,
    },
}

impl CrawlTarget {
    pub fn mode(&self) -> TargetMode {
        match self {
            Self::Append { .. } => TargetMode::Append,
            Self::CreateNew { .. } => TargetMode::CreateNew,
        }
    }

    fn from_columns(
        mode: &str,
        collection_id: Option<String>,
        prefix: Option<String>,
    ) -> StorageResult<Self> {
        match (TargetMode::from_db_string(mode), collection_id, prefix) {
            (Some(TargetMode::Append), Some(collection_id), _) => {
                Ok(Self::Append { collection_id })
            }
            (Some(TargetMode::CreateNew), _, Some(prefix)) => Ok(Self::CreateNew { prefix }),
            _ => Err(StorageError::Serialization(format!(
                "inconsistent crawl target for mode '{}'",
                mode
            ))),
        }
    }

    fn to_columns(&self) -> (&'static str, Option<&str>, Option<&str>) {
        match self {
            Self::Append { collection_id } => {
                (TargetMode::Append.to_db_string(), Some(collection_id.as_str()), None)
            }
            Self::CreateNew { prefix } => {
                (TargetMode::CreateNew.to_db_string(), None, Some(prefix.as_str()))
            }
        }
    }
}

/// Represents a crawl task definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlTask {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub source_type: String,
    pub source_config: serde_json::Value,
    pub schedule_type: ScheduleType,
    #[serde(flatten)]
    pub target: CrawlTarget,
    pub duplicate_strategy: DuplicateStrategy,
    pub is_enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<RunStatus>,
    pub last_run_result: Option<serde_json::Value>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Represents one execution of a crawl task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlTaskRun {
    pub id: String,
    pub task_id: String,
    pub status: RunStatus,
    pub result: Option<serde_json::Value>,
    pub collection_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Task fields written after an execution
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub last_run_at: DateTime<Utc>,
    pub status: RunStatus,
    pub result: serde_json::Value,
    pub next_run_at: Option<DateTime<Utc>>,
    /// Clears `is_enabled`; leaves it unchanged otherwise
    pub disable: bool,
}
