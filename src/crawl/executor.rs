//! Crawl executor - runs one task against its source and target collection
//!
//! A single execution:
//! - Resolves (or creates) the target collection
//! - Validates the task's source configuration
//! - Fetches papers from the source
//! - Reconciles each paper against the store and links it into the collection
//! - Commits the whole batch at once
//!
//! Per-item failures are recorded in the result and never abort the batch.

use crate::dedup::find_duplicate;
use crate::sources::{FetchedPaper, SourceRegistry};
use crate::state::RunStatus;
use crate::storage::{
    lock_store, CollectionStore, CrawlStore, CrawlTarget, CrawlTask, MembershipRecord,
    NewCollection, PaperStore, SharedStore, StorageError, StorageResult, TaskStore, Transactional,
    UserSettings, UserSettingsStore,
};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Group label given to memberships created by a crawl
pub const CRAWLED_GROUP_NAME: &str = "Crawled";
pub const CRAWLED_GROUP_TAG: &str = "crawled";
pub const CRAWLED_SECTION_NAME: &str = "All Papers";

/// Collection `task_type` marking a collection created by a crawl task
pub const CRAWL_TASK_COLLECTION_TYPE: &str = "crawl_task";

const ITEM_SAVEPOINT: &str = "crawl_item";
const MAX_SLUG_CHARS: usize = 40;

/// Why an execution failed as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The append target no longer exists; the task has been disabled
    TargetCollectionDeleted,
    FetchFailed,
    InvalidConfig,
    CommitFailed,
    /// Anything unexpected, such as a storage failure outside the batch
    ExecutionFailed,
}

/// A failure attributed to one fetched item, or to the fetch itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub reason: String,
}

/// Outcome of one execution, stored as JSON on the run and the task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub new_papers: u32,
    pub skipped: u32,
    pub updated: u32,
    /// Items repeating a paper an earlier item of the same run linked
    pub already_linked: u32,
    pub errors: Vec<ItemError>,
    pub collection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecutionResult {
    /// A result for an execution that failed before or during the batch
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            error: Some(kind),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// `failed` when a fatal error is set, `partial` when some items failed
    pub fn status(&self) -> RunStatus {
        if self.error.is_some() {
            RunStatus::Failed
        } else if !self.errors.is_empty() {
            RunStatus::Partial
        } else {
            RunStatus::Success
        }
    }

    pub fn is_target_deleted(&self) -> bool {
        self.error == Some(FailureKind::TargetCollectionDeleted)
    }

    /// Number of fetched items the batch accounted for
    pub fn processed(&self) -> u32 {
        self.new_papers + self.skipped + self.updated + self.already_linked
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Inserted => self.new_papers += 1,
            ItemOutcome::Updated => self.updated += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::AlreadyLinked => self.already_linked += 1,
        }
    }
}

/// What happened to a single fetched item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Inserted,
    Updated,
    Skipped,
    AlreadyLinked,
}

/// Runs crawl tasks
pub struct CrawlExecutor {
    store: SharedStore,
    registry: SourceRegistry,
}

impl CrawlExecutor {
    pub fn new(store: SharedStore, registry: SourceRegistry) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Executes a task now
    pub async fn execute(&self, task: &CrawlTask) -> Result<ExecutionResult> {
        self.execute_at(task, Utc::now()).await
    }

    /// Executes a task as of `started_at`
    ///
    /// # Arguments
    ///
    /// * `task` - The task to run
    /// * `started_at` - Execution start time; dates new collections
    ///
    /// # Returns
    ///
    /// * `Ok(ExecutionResult)` - The run completed, possibly with a fatal
    ///   `error` recorded in the result
    /// * `Err(CrawlError)` - The source is unknown or the store failed
    ///   outside the batch
    pub async fn execute_at(
        &self,
        task: &CrawlTask,
        started_at: DateTime<Utc>,
    ) -> Result<ExecutionResult> {
        let source = self.registry.get(&task.source_type)?;

        if let CrawlTarget::Append { collection_id } = &task.target {
            if !self.collection_exists(collection_id)? {
                return Ok(self.disable_for_deleted_target(task, collection_id)?);
            }
        }

        let config = match source.validate_config(&task.source_config) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Crawl task {} has invalid configuration: {}", task.id, e);
                let mut result = ExecutionResult::failed(FailureKind::InvalidConfig, e.to_string());
                if let CrawlTarget::Append { collection_id } = &task.target {
                    result.collection_id = Some(collection_id.clone());
                }
                return Ok(result);
            }
        };

        let (collection_id, settings) = self.prepare(task, started_at)?;

        let papers = match source
            .fetch(&config, task.last_run_at, &settings)
            .await
        {
            Ok(papers) => papers,
            Err(e) => {
                tracing::error!(
                    "Fetch failed for crawl task {} ({}): {}",
                    task.name,
                    task.source_type,
                    e
                );
                let reason = e.to_string();
                let mut result = ExecutionResult::failed(FailureKind::FetchFailed, reason.clone());
                result.collection_id = Some(collection_id);
                result.errors.push(ItemError {
                    title: None,
                    reason,
                });
                return Ok(result);
            }
        };

        tracing::debug!(
            "Crawl task {} fetched {} papers from {}",
            task.id,
            papers.len(),
            task.source_type
        );

        let result = self.import_batch(task, &collection_id, &papers)?;
        tracing::info!(
            "Crawl task {} into {}: {} new, {} skipped, {} updated, {} already linked, {} errors",
            task.name,
            collection_id,
            result.new_papers,
            result.skipped,
            result.updated,
            result.already_linked,
            result.errors.len()
        );
        Ok(result)
    }

    fn collection_exists(&self, collection_id: &str) -> StorageResult<bool> {
        let store = lock_store(&self.store)?;
        Ok(store.get_collection(collection_id)?.is_some())
    }

    fn disable_for_deleted_target(
        &self,
        task: &CrawlTask,
        collection_id: &str,
    ) -> StorageResult<ExecutionResult> {
        tracing::error!(
            "Target collection {} of crawl task {} no longer exists, disabling task",
            collection_id,
            task.id
        );
        let result = ExecutionResult::failed(
            FailureKind::TargetCollectionDeleted,
            format!("Collection '{}' no longer exists", collection_id),
        );
        let mut store = lock_store(&self.store)?;
        store.mark_target_deleted(&task.id, &result.to_json())?;
        Ok(result)
    }

    /// Resolves the target collection and loads the owner's settings
    fn prepare(
        &self,
        task: &CrawlTask,
        started_at: DateTime<Utc>,
    ) -> StorageResult<(String, UserSettings)> {
        let mut store = lock_store(&self.store)?;
        let collection_id = match &task.target {
            CrawlTarget::Append { collection_id } => collection_id.clone(),
            CrawlTarget::CreateNew { prefix } => {
                create_target_collection(&mut *store, task, prefix, started_at)?
            }
        };
        let settings = store.get_settings(&task.user_id)?;
        Ok((collection_id, settings))
    }

    /// Imports every fetched paper in one transaction
    fn import_batch(
        &self,
        task: &CrawlTask,
        collection_id: &str,
        papers: &[FetchedPaper],
    ) -> StorageResult<ExecutionResult> {
        let mut store = lock_store(&self.store)?;
        let mut result = ExecutionResult {
            collection_id: Some(collection_id.to_string()),
            ..ExecutionResult::default()
        };

        store.begin()?;
        let imported = import_papers(&mut *store, task, collection_id, papers, &mut result)
            .and_then(|()| store.commit());

        if let Err(e) = imported {
            if let Err(rollback_err) = store.rollback() {
                tracing::error!("Rollback failed: {}", rollback_err);
            }
            tracing::error!("Crawl task {} batch was rolled back: {}", task.id, e);
            let mut failed = ExecutionResult::failed(FailureKind::CommitFailed, e.to_string());
            failed.collection_id = Some(collection_id.to_string());
            return Ok(failed);
        }

        Ok(result)
    }
}

/// Creates the dated collection a `create_new` task writes into
///
/// The ID is `{slug}-{date}`, with a short random suffix appended when that
/// ID is taken.
fn create_target_collection(
    store: &mut (dyn CrawlStore + Send),
    task: &CrawlTask,
    prefix: &str,
    started_at: DateTime<Utc>,
) -> StorageResult<String> {
    let prefix = if prefix.trim().is_empty() {
        task.name.as_str()
    } else {
        prefix
    };
    let date = started_at.format("%Y-%m-%d").to_string();
    let base_id = format!("{}-{}", collection_slug(prefix), date);

    let mut collection_id = base_id.clone();
    while store.get_collection(&collection_id)?.is_some() {
        let suffix = Uuid::new_v4().simple().to_string();
        collection_id = format!("{}-{}", base_id, &suffix[..4]);
    }

    store.create_collection(&NewCollection {
        id: collection_id.clone(),
        title: format!("{} - {}", prefix, date),
        description: Some(format!("Auto-created by crawl task: {}", task.name)),
        created_by: task.user_id.clone(),
        task_type: CRAWL_TASK_COLLECTION_TYPE.to_string(),
        task_source: Some(task.source_type.clone()),
        task_source_display: Some(task.name.clone()),
    })?;

    tracing::info!(
        "Created collection {} for crawl task {}",
        collection_id,
        task.id
    );
    Ok(collection_id)
}

/// Lowercased, spaces to hyphens, at most 40 characters
fn collection_slug(prefix: &str) -> String {
    prefix
        .to_lowercase()
        .replace(' ', "-")
        .chars()
        .take(MAX_SLUG_CHARS)
        .collect()
}

/// Imports papers inside an open transaction
///
/// Each item runs under its own savepoint so that a failing item leaves no
/// writes behind. Only savepoint failures abort the batch.
fn import_papers(
    store: &mut (dyn CrawlStore + Send),
    task: &CrawlTask,
    collection_id: &str,
    papers: &[FetchedPaper],
    result: &mut ExecutionResult,
) -> StorageResult<()> {
    let mut max_order = store.max_display_order(collection_id)?;
    // Papers this run has already counted and linked
    let mut handled: HashSet<String> = HashSet::new();

    for paper in papers {
        store.savepoint(ITEM_SAVEPOINT)?;
        match import_paper(store, task, collection_id, paper, max_order + 1, &handled) {
            Ok(imported) => {
                store.release_savepoint(ITEM_SAVEPOINT)?;
                if imported.linked {
                    max_order += 1;
                }
                handled.insert(imported.paper_id);
                result.record(imported.outcome);
            }
            Err(e) => {
                store.rollback_to_savepoint(ITEM_SAVEPOINT)?;
                tracing::warn!("Failed to import '{}': {}", paper.title, e);
                result.errors.push(ItemError {
                    title: Some(paper.title.clone()),
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(())
}

struct ImportedItem {
    paper_id: String,
    outcome: ItemOutcome,
    /// A membership row was added
    linked: bool,
}

/// Reconciles one paper and links it into the collection
///
/// A duplicate of a paper an earlier item of the same run already handled
/// is left untouched and not counted again.
fn import_paper(
    store: &mut (dyn CrawlStore + Send),
    task: &CrawlTask,
    collection_id: &str,
    paper: &FetchedPaper,
    display_order: i64,
    handled: &HashSet<String>,
) -> StorageResult<ImportedItem> {
    if paper.title.trim().is_empty() {
        return Err(StorageError::ConstraintViolation(
            "paper title is empty".to_string(),
        ));
    }

    let (paper_id, outcome) = match find_duplicate(&*store, paper, Some(&task.user_id))? {
        Some(duplicate) if handled.contains(&duplicate.existing.id) => {
            tracing::debug!(
                "'{}' repeats {} within this run",
                paper.title,
                duplicate.existing.id
            );
            return Ok(ImportedItem {
                paper_id: duplicate.existing.id,
                outcome: ItemOutcome::AlreadyLinked,
                linked: false,
            });
        }
        Some(duplicate) => {
            let paper_id = duplicate.existing.id;
            if task.duplicate_strategy.overwrites() {
                store.update_paper(&paper_id, paper)?;
                (paper_id, ItemOutcome::Updated)
            } else {
                (paper_id, ItemOutcome::Skipped)
            }
        }
        None => (store.insert_paper(paper)?, ItemOutcome::Inserted),
    };

    if store.membership_exists(collection_id, &paper_id)? {
        return Ok(ImportedItem {
            paper_id,
            outcome,
            linked: false,
        });
    }

    store.add_membership(&MembershipRecord {
        collection_id: collection_id.to_string(),
        paper_id: paper_id.clone(),
        group_name: Some(CRAWLED_GROUP_NAME.to_string()),
        group_tag: Some(CRAWLED_GROUP_TAG.to_string()),
        section_name: Some(CRAWLED_SECTION_NAME.to_string()),
        display_order,
    })?;

    Ok(ImportedItem {
        paper_id,
        outcome,
        linked: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::test_support::*;
    use crate::state::DuplicateStrategy;
    use crate::CrawlError;
    use serde_json::json;
    use std::sync::Arc;

    fn executor(store: &SharedStore, stub: &Arc<StubSource>) -> CrawlExecutor {
        CrawlExecutor::new(store.clone(), registry_with(stub.clone()))
    }

    fn link(store: &SharedStore, collection_id: &str, paper_id: &str, order: i64) {
        lock_store(store)
            .unwrap()
            .add_membership(&MembershipRecord {
                collection_id: collection_id.to_string(),
                paper_id: paper_id.to_string(),
                group_name: None,
                group_tag: None,
                section_name: None,
                display_order: order,
            })
            .unwrap();
    }

    #[test]
    fn test_result_status() {
        let mut result = ExecutionResult::default();
        assert_eq!(result.status(), RunStatus::Success);

        result.errors.push(ItemError {
            title: Some("A".to_string()),
            reason: "boom".to_string(),
        });
        assert_eq!(result.status(), RunStatus::Partial);

        result.error = Some(FailureKind::CommitFailed);
        assert_eq!(result.status(), RunStatus::Failed);
    }

    #[test]
    fn test_result_json_shape() {
        let result = ExecutionResult::failed(FailureKind::TargetCollectionDeleted, "gone");
        let value = result.to_json();
        assert_eq!(value["error"], "target_collection_deleted");
        assert_eq!(value["message"], "gone");
        assert_eq!(value["new_papers"], 0);
        assert!(value["collection_id"].is_null());

        let ok = ExecutionResult::default().to_json();
        assert!(ok.get("error").is_none());
        assert_eq!(ok["errors"], json!([]));
    }

    #[test]
    fn test_collection_slug() {
        assert_eq!(collection_slug("Weekly NLP Digest"), "weekly-nlp-digest");
        let long = "a".repeat(60);
        assert_eq!(collection_slug(&long).len(), 40);
    }

    #[tokio::test]
    async fn test_deleted_append_target_disables_task() {
        let store = memory_store();
        let stub = Arc::new(StubSource::new(vec![paper("Never fetched")]));
        let task = task("t1", append_to("gone"));
        lock_store(&store).unwrap().insert_task(&task).unwrap();

        let result = executor(&store, &stub).execute(&task).await.unwrap();

        assert_eq!(result.error, Some(FailureKind::TargetCollectionDeleted));
        assert_eq!(result.status(), RunStatus::Failed);
        assert_eq!(stub.calls(), 0);

        let stored = lock_store(&store).unwrap().get_task("t1").unwrap().unwrap();
        assert!(!stored.is_enabled);
        assert_eq!(stored.last_run_status, Some(RunStatus::Failed));
        assert_eq!(stored.next_run_at, task.next_run_at);
        assert_eq!(
            stored.last_run_result.unwrap()["error"],
            "target_collection_deleted"
        );
    }

    #[tokio::test]
    async fn test_mixed_batch() {
        let store = memory_store();
        add_collection(&store, "target", "alice");
        let existing_id = lock_store(&store)
            .unwrap()
            .insert_paper(&FetchedPaper {
                title: "Old title".to_string(),
                doi: Some("10.1000/xyz".to_string()),
                ..FetchedPaper::default()
            })
            .unwrap();
        link(&store, "target", &existing_id, 1);

        let stub = Arc::new(StubSource::new(vec![
            FetchedPaper {
                title: "Attention Revisited".to_string(),
                doi: Some("10.1000/xyz".to_string()),
                venue: Some("ACL".to_string()),
                ..FetchedPaper::default()
            },
            paper("Brand New Paper"),
            paper("Brand new paper!"),
        ]));
        let mut task = task("t1", append_to("target"));
        task.duplicate_strategy = DuplicateStrategy::Update;

        let result = executor(&store, &stub).execute(&task).await.unwrap();

        assert_eq!(result.new_papers, 1);
        assert_eq!(result.updated, 1);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.already_linked, 1);
        assert!(result.errors.is_empty());
        assert_eq!(result.collection_id.as_deref(), Some("target"));

        let guard = lock_store(&store).unwrap();
        let members = guard.list_memberships("target").unwrap();
        assert_eq!(members.len(), 2);
        let added = members.iter().find(|m| m.paper_id != existing_id).unwrap();
        assert_eq!(added.display_order, 2);
        assert_eq!(added.group_name.as_deref(), Some(CRAWLED_GROUP_NAME));
        assert_eq!(added.section_name.as_deref(), Some(CRAWLED_SECTION_NAME));

        let updated = guard.get_paper(&existing_id).unwrap();
        assert_eq!(updated.title, "Attention Revisited");
        assert_eq!(updated.venue.as_deref(), Some("ACL"));
    }

    #[tokio::test]
    async fn test_skip_leaves_existing_record() {
        let store = memory_store();
        add_collection(&store, "archive", "alice");
        add_collection(&store, "target", "alice");
        let existing_id = lock_store(&store)
            .unwrap()
            .insert_paper(&FetchedPaper {
                title: "Original".to_string(),
                arxiv_id: Some("2401.00001".to_string()),
                ..FetchedPaper::default()
            })
            .unwrap();
        link(&store, "archive", &existing_id, 1);

        let stub = Arc::new(StubSource::new(vec![FetchedPaper {
            title: "Renamed".to_string(),
            arxiv_id: Some("2401.00001".to_string()),
            ..FetchedPaper::default()
        }]));
        let task = task("t1", append_to("target"));

        let result = executor(&store, &stub).execute(&task).await.unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.new_papers, 0);

        let guard = lock_store(&store).unwrap();
        assert_eq!(guard.get_paper(&existing_id).unwrap().title, "Original");
        assert!(guard.membership_exists("target", &existing_id).unwrap());
    }

    #[tokio::test]
    async fn test_fetch_failure_records_single_error() {
        let store = memory_store();
        add_collection(&store, "target", "alice");
        let stub = Arc::new(StubSource::failing());
        let task = task("t1", append_to("target"));

        let result = executor(&store, &stub).execute(&task).await.unwrap();

        assert_eq!(result.error, Some(FailureKind::FetchFailed));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].reason.contains("503"));
        assert_eq!(result.new_papers, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_skips_fetch() {
        let store = memory_store();
        add_collection(&store, "target", "alice");
        let stub = Arc::new(StubSource::new(vec![paper("A")]));
        let mut task = task("t1", append_to("target"));
        task.source_config = json!({"unrelated": true});

        let result = executor(&store, &stub).execute(&task).await.unwrap();

        assert_eq!(result.error, Some(FailureKind::InvalidConfig));
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let store = memory_store();
        let stub = Arc::new(StubSource::new(Vec::new()));
        let mut task = task("t1", append_to("target"));
        task.source_type = "gopher".to_string();

        let err = executor(&store, &stub).execute(&task).await.unwrap_err();
        assert!(matches!(err, CrawlError::UnknownSource(s) if s == "gopher"));
    }

    #[tokio::test]
    async fn test_item_failure_does_not_abort_batch() {
        let store = memory_store();
        add_collection(&store, "target", "alice");
        let stub = Arc::new(StubSource::new(vec![
            paper("First"),
            paper("   "),
            paper("Third"),
        ]));
        let task = task("t1", append_to("target"));

        let result = executor(&store, &stub).execute(&task).await.unwrap();

        assert_eq!(result.new_papers, 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.status(), RunStatus::Partial);

        let members = lock_store(&store)
            .unwrap()
            .list_memberships("target")
            .unwrap();
        let mut orders: Vec<i64> = members.iter().map(|m| m.display_order).collect();
        orders.sort();
        assert_eq!(orders, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_create_new_collections_are_unique() {
        let store = memory_store();
        let stub = Arc::new(StubSource::new(vec![paper("A"), paper("B")]));
        let task = task(
            "t1",
            CrawlTarget::CreateNew {
                prefix: "NLP Digest".to_string(),
            },
        );
        let executor = executor(&store, &stub);

        let first = executor.execute_at(&task, start_time()).await.unwrap();
        assert_eq!(first.collection_id.as_deref(), Some("nlp-digest-2024-03-15"));
        assert_eq!(first.new_papers, 2);

        let second = executor.execute_at(&task, start_time()).await.unwrap();
        let second_id = second.collection_id.clone().unwrap();
        assert!(second_id.starts_with("nlp-digest-2024-03-15-"));
        assert_eq!(second_id.len(), "nlp-digest-2024-03-15".len() + 5);
        assert_eq!(second.new_papers, 0);
        assert_eq!(second.skipped, 2);

        let guard = lock_store(&store).unwrap();
        let collection = guard
            .get_collection("nlp-digest-2024-03-15")
            .unwrap()
            .unwrap();
        assert_eq!(collection.title, "NLP Digest - 2024-03-15");
        assert_eq!(collection.created_by, "alice");
        assert_eq!(collection.task_type, CRAWL_TASK_COLLECTION_TYPE);
        assert_eq!(collection.task_source.as_deref(), Some(STUB_SOURCE));
        assert_eq!(guard.list_memberships(&second_id).unwrap().len(), 2);
    }
}
