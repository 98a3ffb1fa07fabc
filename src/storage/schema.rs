//! Database schema definitions
//!
//! Tables for the paper library, collections, user settings and crawl tasks.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Global paper library
CREATE TABLE IF NOT EXISTS papers (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    normalized_title TEXT NOT NULL,
    authors TEXT,
    venue TEXT,
    year INTEGER,
    abstract TEXT,
    status TEXT NOT NULL,
    bibtex_key TEXT,
    arxiv_id TEXT,
    doi TEXT,
    url_arxiv TEXT,
    url_pdf TEXT,
    url_code TEXT,
    url_project TEXT,
    tags TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_papers_bibtex_key ON papers(bibtex_key);
CREATE INDEX IF NOT EXISTS idx_papers_arxiv_id ON papers(arxiv_id);
CREATE INDEX IF NOT EXISTS idx_papers_doi ON papers(doi);
CREATE INDEX IF NOT EXISTS idx_papers_normalized_title ON papers(normalized_title);

-- Collections of papers
CREATE TABLE IF NOT EXISTS collections (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    created_by TEXT NOT NULL,
    visibility TEXT NOT NULL DEFAULT 'private',
    task_type TEXT NOT NULL,
    task_source TEXT,
    task_source_display TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_collections_created_by ON collections(created_by);

-- Ordered membership of papers in collections
CREATE TABLE IF NOT EXISTS collection_papers (
    collection_id TEXT NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    paper_id TEXT NOT NULL REFERENCES papers(id),
    group_name TEXT,
    group_tag TEXT,
    section_name TEXT,
    display_order INTEGER NOT NULL,
    PRIMARY KEY (collection_id, paper_id)
);

CREATE INDEX IF NOT EXISTS idx_collection_papers_paper ON collection_papers(paper_id);

-- Opaque per-user settings (API keys and the like)
CREATE TABLE IF NOT EXISTS user_settings (
    user_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (user_id, key)
);

-- Scheduled crawl task definitions
-- The target collection is deliberately not a foreign key: a task outlives
-- the collection it appends to and is disabled when it finds it gone.
CREATE TABLE IF NOT EXISTS crawl_tasks (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    source_type TEXT NOT NULL,
    source_config TEXT NOT NULL,
    schedule_type TEXT NOT NULL,
    target_mode TEXT NOT NULL,
    target_collection_id TEXT,
    new_collection_prefix TEXT,
    duplicate_strategy TEXT NOT NULL,
    is_enabled INTEGER NOT NULL DEFAULT 1,
    last_run_at TEXT,
    last_run_status TEXT,
    last_run_result TEXT,
    next_run_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_tasks_user ON crawl_tasks(user_id);
CREATE INDEX IF NOT EXISTS idx_crawl_tasks_due ON crawl_tasks(is_enabled, next_run_at);

-- One row per execution of a task
CREATE TABLE IF NOT EXISTS crawl_task_runs (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL REFERENCES crawl_tasks(id) ON DELETE CASCADE,
    status TEXT NOT NULL,
    result TEXT,
    collection_id TEXT,
    started_at TEXT NOT NULL,
    finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_crawl_task_runs_task ON crawl_task_runs(task_id, started_at);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
