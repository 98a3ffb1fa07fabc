//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types. Each store is a separate trait so that
//! components can depend on the narrowest surface they use; `CrawlStore`
//! bundles all of them for the shared handle.

use crate::sources::FetchedPaper;
use crate::state::RunStatus;
use crate::storage::{
    CollectionRecord, CrawlTask, CrawlTaskRun, MembershipRecord, NewCollection, PaperKey,
    PaperRecord, TaskOutcome, UserSettings,
};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Paper not found: {0}")]
    PaperNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run {0} was already finalized")]
    RunAlreadyFinalized(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Lookup and write access to the global paper table
pub trait PaperStore {
    /// Finds a paper whose `key` column equals `value`
    ///
    /// With `owner_scope`, only papers that belong to at least one collection
    /// created by that user are considered. When several papers match, the
    /// earliest inserted one is returned.
    fn find_paper_by(
        &self,
        key: PaperKey,
        value: &str,
        owner_scope: Option<&str>,
    ) -> StorageResult<Option<PaperRecord>>;

    /// Gets a paper by ID
    fn get_paper(&self, paper_id: &str) -> StorageResult<PaperRecord>;

    /// Inserts a new paper and returns its ID
    ///
    /// Status is derived from the URLs; the normalized title is stored
    /// alongside for title lookups.
    fn insert_paper(&mut self, paper: &FetchedPaper) -> StorageResult<String>;

    /// Overwrites the present fields of `paper` onto an existing paper
    fn update_paper(&mut self, paper_id: &str, paper: &FetchedPaper) -> StorageResult<()>;
}

/// Collections and their ordered membership rows
pub trait CollectionStore {
    fn get_collection(&self, collection_id: &str) -> StorageResult<Option<CollectionRecord>>;

    /// Creates a collection; fails with a constraint violation if the ID is taken
    fn create_collection(&mut self, collection: &NewCollection) -> StorageResult<()>;

    /// Deletes a collection and its memberships
    fn delete_collection(&mut self, collection_id: &str) -> StorageResult<()>;

    /// Highest display order in the collection, or 0 when empty
    fn max_display_order(&self, collection_id: &str) -> StorageResult<i64>;

    fn membership_exists(&self, collection_id: &str, paper_id: &str) -> StorageResult<bool>;

    fn add_membership(&mut self, membership: &MembershipRecord) -> StorageResult<()>;

    /// Memberships of a collection ordered by display order
    fn list_memberships(&self, collection_id: &str) -> StorageResult<Vec<MembershipRecord>>;
}

/// Per-user opaque settings
pub trait UserSettingsStore {
    fn get_settings(&self, user_id: &str) -> StorageResult<UserSettings>;

    fn put_setting(&mut self, user_id: &str, key: &str, value: &str) -> StorageResult<()>;
}

/// Crawl task definitions and run audit records
pub trait TaskStore {
    // ===== Task Management =====

    fn insert_task(&mut self, task: &CrawlTask) -> StorageResult<()>;

    fn get_task(&self, task_id: &str) -> StorageResult<Option<CrawlTask>>;

    /// Lists tasks, newest first, optionally restricted to one owner
    fn list_tasks(&self, user_id: Option<&str>) -> StorageResult<Vec<CrawlTask>>;

    /// Enabled tasks whose `next_run_at` is at or before `now`
    fn due_tasks(&self, now: DateTime<Utc>) -> StorageResult<Vec<CrawlTask>>;

    /// Writes the definition fields of a task
    ///
    /// Run bookkeeping columns are left untouched.
    fn update_task(&mut self, task: &CrawlTask) -> StorageResult<()>;

    /// Deletes a task together with its runs
    fn delete_task(&mut self, task_id: &str) -> StorageResult<()>;

    /// Writes the post-execution fields of a task
    fn record_task_outcome(&mut self, task_id: &str, outcome: &TaskOutcome) -> StorageResult<()>;

    /// Disables a task whose append target no longer exists
    ///
    /// Records a failed status and the result; `next_run_at` is left as is.
    fn mark_target_deleted(
        &mut self,
        task_id: &str,
        result: &serde_json::Value,
    ) -> StorageResult<()>;

    // ===== Run Management =====

    /// Creates a run in the running state and returns its ID
    fn create_run(&mut self, task_id: &str, started_at: DateTime<Utc>) -> StorageResult<String>;

    /// Finalizes a running run
    ///
    /// A run leaves the running state exactly once; finalizing it again is
    /// an error.
    fn finish_run(
        &mut self,
        run_id: &str,
        status: RunStatus,
        result: &serde_json::Value,
        collection_id: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    fn get_run(&self, run_id: &str) -> StorageResult<CrawlTaskRun>;

    /// Runs of a task, most recent first
    fn list_runs(&self, task_id: &str, limit: usize) -> StorageResult<Vec<CrawlTaskRun>>;
}

/// Explicit transaction control
///
/// Savepoints nest inside an open transaction and are used to isolate the
/// writes of a single item.
pub trait Transactional {
    fn begin(&mut self) -> StorageResult<()>;

    fn commit(&mut self) -> StorageResult<()>;

    fn rollback(&mut self) -> StorageResult<()>;

    fn savepoint(&mut self, name: &str) -> StorageResult<()>;

    fn release_savepoint(&mut self, name: &str) -> StorageResult<()>;

    fn rollback_to_savepoint(&mut self, name: &str) -> StorageResult<()>;
}

/// Every store the crawl subsystem needs, behind one handle
pub trait CrawlStore:
    PaperStore + CollectionStore + UserSettingsStore + TaskStore + Transactional
{
}

impl<T> CrawlStore for T where
    T: PaperStore + CollectionStore + UserSettingsStore + TaskStore + Transactional
{
}
