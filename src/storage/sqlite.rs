//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of every store trait.

use crate::dedup::normalize_title;
use crate::sources::FetchedPaper;
use crate::state::{DuplicateStrategy, PaperStatus, RunStatus, ScheduleType};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    CollectionStore, PaperStore, StorageError, StorageResult, TaskStore, Transactional,
    UserSettingsStore,
};
use crate::storage::{
    from_db_timestamp, to_db_timestamp, CollectionRecord, CrawlTarget, CrawlTask, CrawlTaskRun,
    MembershipRecord, NewCollection, PaperKey, PaperRecord, TaskOutcome, UserSettings,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use uuid::Uuid;

const PAPER_COLUMNS: &str = "p.id, p.title, p.authors, p.venue, p.year, p.abstract, p.status,
     p.bibtex_key, p.arxiv_id, p.doi, p.url_arxiv, p.url_pdf, p.url_code, p.url_project,
     p.tags, p.created_at, p.updated_at";

const TASK_COLUMNS: &str = "id, user_id, name, source_type, source_config, schedule_type,
     target_mode, target_collection_id, new_collection_prefix, duplicate_strategy, is_enabled,
     last_run_at, last_run_status, last_run_result, next_run_at, created_at, updated_at";

const RUN_COLUMNS: &str =
    "id, task_id, status, result, collection_id, started_at, finished_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn to_json_list(values: &Option<Vec<String>>) -> StorageResult<Option<String>> {
    values
        .as_ref()
        .map(|v| serde_json::to_string(v))
        .transpose()
        .map_err(StorageError::from)
}

fn from_json_list(text: Option<String>) -> StorageResult<Option<Vec<String>>> {
    text.map(|t| serde_json::from_str(&t))
        .transpose()
        .map_err(StorageError::from)
}

fn map_constraint(e: rusqlite::Error, what: &str) -> StorageError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            StorageError::ConstraintViolation(format!("{}: {}", what, e))
        }
        _ => StorageError::Sqlite(e),
    }
}

/// Raw paper row before JSON columns are decoded
struct PaperRow {
    record: PaperRecord,
    authors: Option<String>,
    tags: Option<String>,
}

fn read_paper_row(row: &Row<'_>) -> rusqlite::Result<PaperRow> {
    Ok(PaperRow {
        record: PaperRecord {
            id: row.get(0)?,
            title: row.get(1)?,
            authors: None,
            venue: row.get(3)?,
            year: row.get(4)?,
            abstract_text: row.get(5)?,
            status: PaperStatus::from_db_string(&row.get::<_, String>(6)?)
                .unwrap_or(PaperStatus::NoAccess),
            bibtex_key: row.get(7)?,
            arxiv_id: row.get(8)?,
            doi: row.get(9)?,
            url_arxiv: row.get(10)?,
            url_pdf: row.get(11)?,
            url_code: row.get(12)?,
            url_project: row.get(13)?,
            tags: None,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        },
        authors: row.get(2)?,
        tags: row.get(14)?,
    })
}

impl PaperRow {
    fn decode(self) -> StorageResult<PaperRecord> {
        let mut record = self.record;
        record.authors = from_json_list(self.authors)?;
        record.tags = from_json_list(self.tags)?;
        Ok(record)
    }
}

/// Raw task row; timestamps and enums are decoded afterwards
struct TaskRow {
    id: String,
    user_id: String,
    name: String,
    source_type: String,
    source_config: String,
    schedule_type: String,
    target_mode: String,
    target_collection_id: Option<String>,
    new_collection_prefix: Option<String>,
    duplicate_strategy: String,
    is_enabled: bool,
    last_run_at: Option<String>,
    last_run_status: Option<String>,
    last_run_result: Option<String>,
    next_run_at: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_task_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        source_type: row.get(3)?,
        source_config: row.get(4)?,
        schedule_type: row.get(5)?,
        target_mode: row.get(6)?,
        target_collection_id: row.get(7)?,
        new_collection_prefix: row.get(8)?,
        duplicate_strategy: row.get(9)?,
        is_enabled: row.get(10)?,
        last_run_at: row.get(11)?,
        last_run_status: row.get(12)?,
        last_run_result: row.get(13)?,
        next_run_at: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn optional_timestamp(value: Option<String>) -> StorageResult<Option<DateTime<Utc>>> {
    value.as_deref().map(from_db_timestamp).transpose()
}

fn optional_json(value: Option<String>) -> StorageResult<Option<serde_json::Value>> {
    value
        .map(|v| serde_json::from_str(&v))
        .transpose()
        .map_err(StorageError::from)
}

impl TaskRow {
    fn decode(self) -> StorageResult<CrawlTask> {
        let schedule_type = ScheduleType::from_db_string(&self.schedule_type).ok_or_else(|| {
            StorageError::Serialization(format!("unknown schedule type '{}'", self.schedule_type))
        })?;
        let last_run_status = match self.last_run_status {
            Some(s) => Some(RunStatus::from_db_string(&s).ok_or_else(|| {
                StorageError::Serialization(format!("unknown run status '{}'", s))
            })?),
            None => None,
        };

        Ok(CrawlTask {
            target: CrawlTarget::from_columns(
                &self.target_mode,
                self.target_collection_id,
                self.new_collection_prefix,
            )?,
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            source_type: self.source_type,
            source_config: serde_json::from_str(&self.source_config)?,
            schedule_type,
            duplicate_strategy: DuplicateStrategy::from_db_string(&self.duplicate_strategy),
            is_enabled: self.is_enabled,
            last_run_at: optional_timestamp(self.last_run_at)?,
            last_run_status,
            last_run_result: optional_json(self.last_run_result)?,
            next_run_at: optional_timestamp(self.next_run_at)?,
            created_at: from_db_timestamp(&self.created_at)?,
            updated_at: from_db_timestamp(&self.updated_at)?,
        })
    }
}

struct RunRow {
    id: String,
    task_id: String,
    status: String,
    result: Option<String>,
    collection_id: Option<String>,
    started_at: String,
    finished_at: Option<String>,
}

fn read_run_row(row: &Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        id: row.get(0)?,
        task_id: row.get(1)?,
        status: row.get(2)?,
        result: row.get(3)?,
        collection_id: row.get(4)?,
        started_at: row.get(5)?,
        finished_at: row.get(6)?,
    })
}

impl RunRow {
    fn decode(self) -> StorageResult<CrawlTaskRun> {
        Ok(CrawlTaskRun {
            status: RunStatus::from_db_string(&self.status).ok_or_else(|| {
                StorageError::Serialization(format!("unknown run status '{}'", self.status))
            })?,
            id: self.id,
            task_id: self.task_id,
            result: optional_json(self.result)?,
            collection_id: self.collection_id,
            started_at: from_db_timestamp(&self.started_at)?,
            finished_at: optional_timestamp(self.finished_at)?,
        })
    }
}

impl PaperStore for SqliteStorage {
    fn find_paper_by(
        &self,
        key: PaperKey,
        value: &str,
        owner_scope: Option<&str>,
    ) -> StorageResult<Option<PaperRecord>> {
        let row = match owner_scope {
            Some(owner) => {
                let sql = format!(
                    "SELECT {} FROM papers p
                     WHERE p.{} = ?1
                       AND EXISTS (
                           SELECT 1 FROM collection_papers cp
                           JOIN collections c ON c.id = cp.collection_id
                           WHERE cp.paper_id = p.id AND c.created_by = ?2
                       )
                     ORDER BY p.rowid LIMIT 1",
                    PAPER_COLUMNS,
                    key.column()
                );
                self.conn
                    .query_row(&sql, params![value, owner], read_paper_row)
                    .optional()?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM papers p WHERE p.{} = ?1 ORDER BY p.rowid LIMIT 1",
                    PAPER_COLUMNS,
                    key.column()
                );
                self.conn
                    .query_row(&sql, params![value], read_paper_row)
                    .optional()?
            }
        };

        row.map(PaperRow::decode).transpose()
    }

    fn get_paper(&self, paper_id: &str) -> StorageResult<PaperRecord> {
        let sql = format!("SELECT {} FROM papers p WHERE p.id = ?1", PAPER_COLUMNS);
        self.conn
            .query_row(&sql, params![paper_id], read_paper_row)
            .optional()?
            .ok_or_else(|| StorageError::PaperNotFound(paper_id.to_string()))?
            .decode()
    }

    fn insert_paper(&mut self, paper: &FetchedPaper) -> StorageResult<String> {
        let id = Uuid::new_v4().to_string();
        let now = to_db_timestamp(&Utc::now());

        self.conn
            .execute(
                "INSERT INTO papers (id, title, normalized_title, authors, venue, year, abstract,
                 status, bibtex_key, arxiv_id, doi, url_arxiv, url_pdf, url_code, url_project,
                 tags, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)",
                params![
                    id,
                    paper.title,
                    normalize_title(&paper.title),
                    to_json_list(&paper.authors)?,
                    paper.venue,
                    paper.year,
                    paper.abstract_text,
                    paper.status().to_db_string(),
                    paper.bibtex_key,
                    paper.arxiv_id,
                    paper.doi,
                    paper.url_arxiv,
                    paper.url_pdf,
                    paper.url_code,
                    paper.url_project,
                    to_json_list(&paper.tags)?,
                    now,
                ],
            )
            .map_err(|e| map_constraint(e, "insert paper"))?;

        Ok(id)
    }

    fn update_paper(&mut self, paper_id: &str, paper: &FetchedPaper) -> StorageResult<()> {
        let mut record = self.get_paper(paper_id)?;
        record.apply(paper);

        self.conn.execute(
            "UPDATE papers SET title = ?1, normalized_title = ?2, authors = ?3, venue = ?4,
             year = ?5, abstract = ?6, status = ?7, bibtex_key = ?8, arxiv_id = ?9, doi = ?10,
             url_arxiv = ?11, url_pdf = ?12, url_code = ?13, url_project = ?14, tags = ?15,
             updated_at = ?16
             WHERE id = ?17",
            params![
                record.title,
                normalize_title(&record.title),
                to_json_list(&record.authors)?,
                record.venue,
                record.year,
                record.abstract_text,
                record.status.to_db_string(),
                record.bibtex_key,
                record.arxiv_id,
                record.doi,
                record.url_arxiv,
                record.url_pdf,
                record.url_code,
                record.url_project,
                to_json_list(&record.tags)?,
                to_db_timestamp(&Utc::now()),
                paper_id,
            ],
        )?;

        Ok(())
    }
}

impl CollectionStore for SqliteStorage {
    fn get_collection(&self, collection_id: &str) -> StorageResult<Option<CollectionRecord>> {
        let collection = self
            .conn
            .query_row(
                "SELECT id, title, description, created_by, visibility, task_type, task_source,
                 task_source_display, created_at
                 FROM collections WHERE id = ?1",
                params![collection_id],
                |row| {
                    Ok(CollectionRecord {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        description: row.get(2)?,
                        created_by: row.get(3)?,
                        visibility: row.get(4)?,
                        task_type: row.get(5)?,
                        task_source: row.get(6)?,
                        task_source_display: row.get(7)?,
                        created_at: row.get(8)?,
                    })
                },
            )
            .optional()?;

        Ok(collection)
    }

    fn create_collection(&mut self, collection: &NewCollection) -> StorageResult<()> {
        self.conn
            .execute(
                "INSERT INTO collections (id, title, description, created_by, visibility,
                 task_type, task_source, task_source_display, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'private', ?5, ?6, ?7, ?8)",
                params![
                    collection.id,
                    collection.title,
                    collection.description,
                    collection.created_by,
                    collection.task_type,
                    collection.task_source,
                    collection.task_source_display,
                    to_db_timestamp(&Utc::now()),
                ],
            )
            .map_err(|e| map_constraint(e, "create collection"))?;
        Ok(())
    }

    fn delete_collection(&mut self, collection_id: &str) -> StorageResult<()> {
        self.conn.execute(
            "DELETE FROM collections WHERE id = ?1",
            params![collection_id],
        )?;
        Ok(())
    }

    fn max_display_order(&self, collection_id: &str) -> StorageResult<i64> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(display_order) FROM collection_papers WHERE collection_id = ?1",
            params![collection_id],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0))
    }

    fn membership_exists(&self, collection_id: &str, paper_id: &str) -> StorageResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM collection_papers WHERE collection_id = ?1 AND paper_id = ?2)",
            params![collection_id, paper_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn add_membership(&mut self, membership: &MembershipRecord) -> StorageResult<()> {
        self.conn
            .execute(
                "INSERT INTO collection_papers (collection_id, paper_id, group_name, group_tag,
                 section_name, display_order)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    membership.collection_id,
                    membership.paper_id,
                    membership.group_name,
                    membership.group_tag,
                    membership.section_name,
                    membership.display_order,
                ],
            )
            .map_err(|e| map_constraint(e, "add membership"))?;
        Ok(())
    }

    fn list_memberships(&self, collection_id: &str) -> StorageResult<Vec<MembershipRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT collection_id, paper_id, group_name, group_tag, section_name, display_order
             FROM collection_papers WHERE collection_id = ?1
             ORDER BY display_order",
        )?;

        let memberships = stmt
            .query_map(params![collection_id], |row| {
                Ok(MembershipRecord {
                    collection_id: row.get(0)?,
                    paper_id: row.get(1)?,
                    group_name: row.get(2)?,
                    group_tag: row.get(3)?,
                    section_name: row.get(4)?,
                    display_order: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(memberships)
    }
}

impl UserSettingsStore for SqliteStorage {
    fn get_settings(&self, user_id: &str) -> StorageResult<UserSettings> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM user_settings WHERE user_id = ?1")?;

        let settings = stmt
            .query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<UserSettings, _>>()?;

        Ok(settings)
    }

    fn put_setting(&mut self, user_id: &str, key: &str, value: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO user_settings (user_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, key) DO UPDATE SET value = excluded.value",
            params![user_id, key, value],
        )?;
        Ok(())
    }
}

impl TaskStore for SqliteStorage {
    // ===== Task Management =====

    fn insert_task(&mut self, task: &CrawlTask) -> StorageResult<()> {
        let (mode, collection_id, prefix) = task.target.to_columns();

        self.conn
            .execute(
                &format!(
                    "INSERT INTO crawl_tasks ({}) VALUES
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                    TASK_COLUMNS
                ),
                params![
                    task.id,
                    task.user_id,
                    task.name,
                    task.source_type,
                    serde_json::to_string(&task.source_config)?,
                    task.schedule_type.to_db_string(),
                    mode,
                    collection_id,
                    prefix,
                    task.duplicate_strategy.to_db_string(),
                    task.is_enabled,
                    task.last_run_at.as_ref().map(to_db_timestamp),
                    task.last_run_status.map(|s| s.to_db_string()),
                    task.last_run_result
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    task.next_run_at.as_ref().map(to_db_timestamp),
                    to_db_timestamp(&task.created_at),
                    to_db_timestamp(&task.updated_at),
                ],
            )
            .map_err(|e| map_constraint(e, "insert task"))?;

        Ok(())
    }

    fn get_task(&self, task_id: &str) -> StorageResult<Option<CrawlTask>> {
        let sql = format!("SELECT {} FROM crawl_tasks WHERE id = ?1", TASK_COLUMNS);
        self.conn
            .query_row(&sql, params![task_id], read_task_row)
            .optional()?
            .map(TaskRow::decode)
            .transpose()
    }

    fn list_tasks(&self, user_id: Option<&str>) -> StorageResult<Vec<CrawlTask>> {
        let rows = match user_id {
            Some(user) => {
                let sql = format!(
                    "SELECT {} FROM crawl_tasks WHERE user_id = ?1 ORDER BY created_at DESC",
                    TASK_COLUMNS
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![user], read_task_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM crawl_tasks ORDER BY created_at DESC",
                    TASK_COLUMNS
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], read_task_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        rows.into_iter().map(TaskRow::decode).collect()
    }

    fn due_tasks(&self, now: DateTime<Utc>) -> StorageResult<Vec<CrawlTask>> {
        let sql = format!(
            "SELECT {} FROM crawl_tasks
             WHERE is_enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at",
            TASK_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![to_db_timestamp(&now)], read_task_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(TaskRow::decode).collect()
    }

    fn update_task(&mut self, task: &CrawlTask) -> StorageResult<()> {
        let (mode, collection_id, prefix) = task.target.to_columns();

        let updated = self.conn.execute(
            "UPDATE crawl_tasks SET name = ?1, source_config = ?2, schedule_type = ?3,
             target_mode = ?4, target_collection_id = ?5, new_collection_prefix = ?6,
             duplicate_strategy = ?7, is_enabled = ?8, next_run_at = ?9, updated_at = ?10
             WHERE id = ?11",
            params![
                task.name,
                serde_json::to_string(&task.source_config)?,
                task.schedule_type.to_db_string(),
                mode,
                collection_id,
                prefix,
                task.duplicate_strategy.to_db_string(),
                task.is_enabled,
                task.next_run_at.as_ref().map(to_db_timestamp),
                to_db_timestamp(&task.updated_at),
                task.id,
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::TaskNotFound(task.id.clone()));
        }
        Ok(())
    }

    fn delete_task(&mut self, task_id: &str) -> StorageResult<()> {
        self.conn
            .execute("DELETE FROM crawl_tasks WHERE id = ?1", params![task_id])?;
        Ok(())
    }

    fn record_task_outcome(&mut self, task_id: &str, outcome: &TaskOutcome) -> StorageResult<()> {
        let now = to_db_timestamp(&Utc::now());
        let updated = self.conn.execute(
            "UPDATE crawl_tasks SET last_run_at = ?1, last_run_status = ?2, last_run_result = ?3,
             next_run_at = ?4, is_enabled = CASE WHEN ?5 THEN 0 ELSE is_enabled END,
             updated_at = ?6
             WHERE id = ?7",
            params![
                to_db_timestamp(&outcome.last_run_at),
                outcome.status.to_db_string(),
                serde_json::to_string(&outcome.result)?,
                outcome.next_run_at.as_ref().map(to_db_timestamp),
                outcome.disable,
                now,
                task_id,
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    fn mark_target_deleted(
        &mut self,
        task_id: &str,
        result: &serde_json::Value,
    ) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE crawl_tasks SET is_enabled = 0, last_run_status = ?1, last_run_result = ?2,
             updated_at = ?3
             WHERE id = ?4",
            params![
                RunStatus::Failed.to_db_string(),
                serde_json::to_string(result)?,
                to_db_timestamp(&Utc::now()),
                task_id,
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    // ===== Run Management =====

    fn create_run(&mut self, task_id: &str, started_at: DateTime<Utc>) -> StorageResult<String> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO crawl_task_runs (id, task_id, status, started_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id,
                    task_id,
                    RunStatus::Running.to_db_string(),
                    to_db_timestamp(&started_at)
                ],
            )
            .map_err(|e| map_constraint(e, "create run"))?;
        Ok(id)
    }

    fn finish_run(
        &mut self,
        run_id: &str,
        status: RunStatus,
        result: &serde_json::Value,
        collection_id: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE crawl_task_runs SET status = ?1, result = ?2, collection_id = ?3,
             finished_at = ?4
             WHERE id = ?5 AND finished_at IS NULL",
            params![
                status.to_db_string(),
                serde_json::to_string(result)?,
                collection_id,
                to_db_timestamp(&finished_at),
                run_id,
            ],
        )?;

        if updated == 0 {
            // Distinguish a missing run from one that was already finalized
            self.get_run(run_id)?;
            return Err(StorageError::RunAlreadyFinalized(run_id.to_string()));
        }
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> StorageResult<CrawlTaskRun> {
        let sql = format!("SELECT {} FROM crawl_task_runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![run_id], read_run_row)
            .optional()?
            .ok_or_else(|| StorageError::RunNotFound(run_id.to_string()))?
            .decode()
    }

    fn list_runs(&self, task_id: &str, limit: usize) -> StorageResult<Vec<CrawlTaskRun>> {
        let sql = format!(
            "SELECT {} FROM crawl_task_runs WHERE task_id = ?1
             ORDER BY started_at DESC, rowid DESC LIMIT ?2",
            RUN_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![task_id, limit as i64], read_run_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RunRow::decode).collect()
    }
}

impl Transactional for SqliteStorage {
    fn begin(&mut self) -> StorageResult<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn savepoint(&mut self, name: &str) -> StorageResult<()> {
        self.conn.execute_batch(&format!("SAVEPOINT {}", name))?;
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> StorageResult<()> {
        self.conn.execute_batch(&format!("RELEASE SAVEPOINT {}", name))?;
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> StorageResult<()> {
        // ROLLBACK TO leaves the savepoint open; release it as well
        self.conn.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"
        ))?;
        Ok(())
    }
}
