//! Stub source and fixtures shared by the crawl unit tests

use crate::sources::{
    CrawlSource, FetchError, FetchedPaper, FieldType, SourceConfig, SourceConfigField, SourceMeta,
    SourceRegistry,
};
use crate::state::{DuplicateStrategy, ScheduleType};
use crate::storage::{
    lock_store, share, CollectionStore, CrawlTarget, CrawlTask, NewCollection, SharedStore,
    SqliteStorage, UserSettings,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub const STUB_SOURCE: &str = "stub";

/// A source returning canned papers
pub struct StubSource {
    meta: SourceMeta,
    papers: Vec<FetchedPaper>,
    fail: bool,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl StubSource {
    pub fn new(papers: Vec<FetchedPaper>) -> Self {
        Self {
            meta: SourceMeta {
                source_type: STUB_SOURCE,
                display_name: "Stub",
                description: "Returns canned papers",
                config_fields: vec![SourceConfigField::new("query", "Query", FieldType::Text)],
                supported_schedules: vec![
                    ScheduleType::Daily,
                    ScheduleType::Weekly,
                    ScheduleType::Monthly,
                ],
                rate_limit: 0.0,
            },
            papers,
            fail: false,
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Every fetch fails with HTTP 503
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    /// Fetches block until `gate` is notified
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CrawlSource for StubSource {
    fn meta(&self) -> &SourceMeta {
        &self.meta
    }

    async fn fetch(
        &self,
        _config: &SourceConfig,
        _since: Option<DateTime<Utc>>,
        _user_settings: &UserSettings,
    ) -> Result<Vec<FetchedPaper>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(FetchError::Status {
                url: "stub://papers".to_string(),
                status: 503,
            });
        }
        Ok(self.papers.clone())
    }
}

pub fn registry_with(stub: Arc<StubSource>) -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    registry.register(stub);
    registry
}

pub fn memory_store() -> SharedStore {
    share(SqliteStorage::open_in_memory().unwrap())
}

pub fn add_collection(store: &SharedStore, id: &str, owner: &str) {
    lock_store(store)
        .unwrap()
        .create_collection(&NewCollection {
            id: id.to_string(),
            title: id.to_string(),
            description: None,
            created_by: owner.to_string(),
            task_type: "manual".to_string(),
            task_source: None,
            task_source_display: None,
        })
        .unwrap();
}

pub fn paper(title: &str) -> FetchedPaper {
    FetchedPaper {
        title: title.to_string(),
        ..FetchedPaper::default()
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 8, 30, 0).unwrap()
}

pub fn task(id: &str, target: CrawlTarget) -> CrawlTask {
    let created = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    CrawlTask {
        id: id.to_string(),
        user_id: "alice".to_string(),
        name: "Weekly NLP".to_string(),
        source_type: STUB_SOURCE.to_string(),
        source_config: json!({"query": "transformers"}),
        schedule_type: ScheduleType::Daily,
        target,
        duplicate_strategy: DuplicateStrategy::Skip,
        is_enabled: true,
        last_run_at: None,
        last_run_status: None,
        last_run_result: None,
        next_run_at: Some(created),
        created_at: created,
        updated_at: created,
    }
}

pub fn append_to(collection_id: &str) -> CrawlTarget {
    CrawlTarget::Append {
        collection_id: collection_id.to_string(),
    }
}
