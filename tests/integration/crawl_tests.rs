//! Integration tests for the crawl subsystem
//!
//! These tests use wiremock to stand in for arXiv and Semantic Scholar and
//! run tasks end-to-end against an on-disk SQLite database.

use chrono::Utc;
use serde_json::json;
use sharebib_crawl::config::{HttpConfig, SourceHttpConfig, UserAgentConfig};
use sharebib_crawl::crawl::{CrawlExecutor, CrawlScheduler, NewCrawlTask, TaskService};
use sharebib_crawl::sources::{
    build_http_client, ArxivRssSource, CrawlSource, FetchError, SemanticScholarSource,
    SourceRegistry,
};
use sharebib_crawl::state::{DuplicateStrategy, RunStatus, ScheduleType};
use sharebib_crawl::storage::{
    lock_store, open_storage, share, CollectionStore, CrawlTarget, NewCollection, SharedStore,
    PaperStore, TaskStore, UserSettings, UserSettingsStore,
};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Source settings pointing at the mock server, without pacing
fn mock_settings(base_url: String) -> SourceHttpConfig {
    SourceHttpConfig {
        base_url: Some(base_url),
        request_interval_ms: Some(0),
        retry_delay_ms: 10,
        max_retries: 3,
    }
}

fn http_client() -> reqwest::Client {
    build_http_client(&UserAgentConfig::default(), &HttpConfig::default())
        .expect("Failed to build HTTP client")
}

fn arxiv_source(server: &MockServer) -> ArxivRssSource {
    ArxivRssSource::new(http_client(), &mock_settings(format!("{}/rss", server.uri())))
}

fn scholar_source(server: &MockServer) -> SemanticScholarSource {
    SemanticScholarSource::new(http_client(), &mock_settings(format!("{}/graph/v1", server.uri())))
}

/// Renders an RSS 2.0 arXiv feed; items are (arXiv ID, title, abstract)
fn rss_feed(category: &str, items: &[(&str, &str, &str)]) -> String {
    let mut body = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss xmlns:dc="http://purl.org/dc/elements/1.1/" version="2.0">
  <channel>
    <title>{category} updates on arXiv.org</title>
    <link>http://rss.arxiv.org/rss/{category}</link>"#
    );
    for (id, title, abstract_text) in items {
        body.push_str(&format!(
            r#"
    <item>
      <title>{title}</title>
      <link>https://arxiv.org/abs/{id}</link>
      <description>arXiv:{id}v1 Announce Type: new
Abstract: {abstract_text}</description>
      <category>{category}</category>
      <dc:creator>Ada Lovelace, Alan Turing</dc:creator>
    </item>"#
        ));
    }
    body.push_str("\n  </channel>\n</rss>");
    body
}

async fn mount_feed(server: &MockServer, category: &str, items: &[(&str, &str, &str)]) {
    Mock::given(method("GET"))
        .and(path(format!("/rss/{}", category)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss_feed(category, items))
                .insert_header("content-type", "application/rss+xml"),
        )
        .mount(server)
        .await;
}

fn add_collection(store: &SharedStore, id: &str, owner: &str) {
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

/// Everything needed to run tasks against one database
struct Harness {
    store: SharedStore,
    scheduler: CrawlScheduler,
    tasks: TaskService,
}

fn harness(db_path: &Path, registry: SourceRegistry) -> Harness {
    let store = share(open_storage(db_path).expect("Failed to open database"));
    let executor = CrawlExecutor::new(store.clone(), registry.clone());
    let scheduler = CrawlScheduler::new(store.clone(), executor, Duration::from_secs(3600));
    let tasks = TaskService::new(store.clone(), registry, scheduler.running_tasks());
    Harness {
        store,
        scheduler,
        tasks,
    }
}

fn arxiv_task(target: CrawlTarget, strategy: DuplicateStrategy) -> NewCrawlTask {
    NewCrawlTask {
        user_id: "alice".to_string(),
        name: "NLP feed".to_string(),
        source_type: "arxiv_rss".to_string(),
        source_config: json!({"categories": ["cs.CL", "cs.LG"]}),
        schedule_type: ScheduleType::Daily,
        target,
        duplicate_strategy: strategy,
    }
}

#[tokio::test]
async fn test_arxiv_fetch_filters_and_dedupes_categories() {
    let server = MockServer::start().await;
    mount_feed(
        &server,
        "cs.CL",
        &[
            ("2401.00001", "Neural GPT Models", "We scale neural nets."),
            ("2401.00002", "A Survey of GPT Architectures", "A neural survey."),
        ],
    )
    .await;
    mount_feed(
        &server,
        "cs.LG",
        &[
            ("2401.00001", "Neural GPT Models", "We scale neural nets."),
            ("2401.00003", "Neural Tangents", "Kernels for gpt."),
        ],
    )
    .await;

    let source = arxiv_source(&server);
    let config = source
        .validate_config(&json!({
            "categories": ["cs.CL", "cs.LG"],
            "filter_keywords": ["+neural", "-survey", "gpt"],
        }))
        .unwrap();

    let papers = source
        .fetch(&config, None, &UserSettings::new())
        .await
        .unwrap();

    let ids: Vec<&str> = papers
        .iter()
        .filter_map(|p| p.arxiv_id.as_deref())
        .collect();
    assert_eq!(ids, vec!["2401.00001", "2401.00003"]);

    let first = &papers[0];
    assert_eq!(first.title, "Neural GPT Models");
    assert_eq!(first.abstract_text.as_deref(), Some("We scale neural nets."));
    assert_eq!(
        first.authors,
        Some(vec!["Ada Lovelace".to_string(), "Alan Turing".to_string()])
    );
    assert_eq!(
        first.url_pdf.as_deref(),
        Some("https://arxiv.org/pdf/2401.00001.pdf")
    );
}

#[tokio::test]
async fn test_arxiv_category_failure_fails_fetch() {
    let server = MockServer::start().await;
    mount_feed(&server, "cs.CL", &[("2401.00001", "Neural", "Text.")]).await;
    Mock::given(method("GET"))
        .and(path("/rss/cs.LG"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let source = arxiv_source(&server);
    let config = source
        .validate_config(&json!({"categories": ["cs.CL", "cs.LG"]}))
        .unwrap();

    let err = source
        .fetch(&config, None, &UserSettings::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 500, .. }));
}

#[tokio::test]
async fn test_semantic_scholar_pagination_and_api_key() {
    let server = MockServer::start().await;

    // Second page first: the more specific mock must win
    Mock::given(method("GET"))
        .and(path("/graph/v1/paper/search/bulk"))
        .and(query_param("token", "page-2"))
        .and(header("x-api-key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 3,
            "data": [{"paperId": "c", "title": "Third Paper", "year": 2023}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/graph/v1/paper/search/bulk"))
        .and(query_param("query", "language models"))
        .and(query_param("minCitationCount", "10"))
        .and(header("x-api-key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 3,
            "token": "page-2",
            "data": [
                {
                    "paperId": "a",
                    "title": "First Paper",
                    "externalIds": {"DOI": "10.1000/first"},
                    "authors": [{"name": "Ada Lovelace"}]
                },
                {
                    "paperId": "b",
                    "title": "Second Paper",
                    "externalIds": {"ArXiv": "2402.00002"},
                    "openAccessPdf": {"url": "https://example.org/second.pdf"}
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let source = scholar_source(&server);
    let config = source
        .validate_config(&json!({"query": "language models", "min_citation_count": 10}))
        .unwrap();
    let mut settings = UserSettings::new();
    settings.insert("semantic_scholar_api_key".to_string(), "secret".to_string());

    let papers = source.fetch(&config, None, &settings).await.unwrap();

    let titles: Vec<&str> = papers.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, vec!["First Paper", "Second Paper", "Third Paper"]);
    assert_eq!(papers[0].doi.as_deref(), Some("10.1000/first"));
    assert_eq!(
        papers[1].url_pdf.as_deref(),
        Some("https://example.org/second.pdf")
    );
}

#[tokio::test]
async fn test_semantic_scholar_respects_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graph/v1/paper/search/bulk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "more",
            "data": [
                {"paperId": "a", "title": "A"},
                {"paperId": "b", "title": "B"},
                {"paperId": "c", "title": "C"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let source = scholar_source(&server);
    let config = source
        .validate_config(&json!({"query": "graphs", "limit": 2}))
        .unwrap();

    let papers = source
        .fetch(&config, None, &UserSettings::new())
        .await
        .unwrap();
    assert_eq!(papers.len(), 2);
}

#[tokio::test]
async fn test_semantic_scholar_backs_off_on_429() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graph/v1/paper/search/bulk"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/graph/v1/paper/search/bulk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"paperId": "a", "title": "Eventually"}]
        })))
        .mount(&server)
        .await;

    let source = scholar_source(&server);
    let config = source.validate_config(&json!({"query": "x"})).unwrap();

    let papers = source
        .fetch(&config, None, &UserSettings::new())
        .await
        .unwrap();
    assert_eq!(papers.len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_semantic_scholar_gives_up_after_repeated_429() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graph/v1/paper/search/bulk"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let source = scholar_source(&server);
    let config = source.validate_config(&json!({"query": "x"})).unwrap();

    let err = source
        .fetch(&config, None, &UserSettings::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::RateLimited { attempts: 3, .. }));
}

#[tokio::test]
async fn test_end_to_end_append_run_is_idempotent() {
    let server = MockServer::start().await;
    mount_feed(
        &server,
        "cs.CL",
        &[
            ("2401.00001", "Neural GPT Models", "We scale neural nets."),
            ("2401.00002", "Speech Transformers", "Audio."),
        ],
    )
    .await;
    mount_feed(
        &server,
        "cs.LG",
        &[("2401.00003", "Optimizers Revisited", "Adam again.")],
    )
    .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("sharebib.db");
    let mut registry = SourceRegistry::new();
    registry.register(std::sync::Arc::new(arxiv_source(&server)));
    let app = harness(&db_path, registry);
    add_collection(&app.store, "reading-list", "alice");

    let task = app
        .tasks
        .create_task(
            arxiv_task(
                CrawlTarget::Append {
                    collection_id: "reading-list".to_string(),
                },
                DuplicateStrategy::Skip,
            ),
            Utc::now(),
        )
        .unwrap();

    assert!(app.scheduler.run_task_now(&task.id).await.unwrap());
    let first = app.tasks.get_task(&task.id).unwrap();
    assert_eq!(first.last_run_status, Some(RunStatus::Success));
    let result = first.last_run_result.clone().unwrap();
    assert_eq!(result["new_papers"], 3);
    assert_eq!(result["collection_id"], "reading-list");

    assert!(app.scheduler.run_task_now(&task.id).await.unwrap());
    let second = app.tasks.get_task(&task.id).unwrap();
    let result = second.last_run_result.unwrap();
    assert_eq!(result["new_papers"], 0);
    assert_eq!(result["skipped"], 3);
    assert_eq!(
        second.next_run_at,
        Some(second.last_run_at.unwrap() + chrono::Duration::days(1))
    );

    let runs = app.tasks.list_runs(&task.id).unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == RunStatus::Success));

    drop(app);

    // Everything was committed to disk
    let reopened = open_storage(&db_path).unwrap();
    let members = reopened.list_memberships("reading-list").unwrap();
    assert_eq!(members.len(), 3);
    let mut orders: Vec<i64> = members.iter().map(|m| m.display_order).collect();
    orders.sort();
    assert_eq!(orders, vec![1, 2, 3]);
    assert!(members
        .iter()
        .all(|m| m.group_name.as_deref() == Some("Crawled")));
}

#[tokio::test]
async fn test_end_to_end_create_new_with_update_strategy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graph/v1/paper/search/bulk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"paperId": "a", "title": "Graph Networks", "venue": "ICLR",
                 "externalIds": {"DOI": "10.1000/graph"}},
                {"paperId": "b", "title": "Message Passing", "year": 2021}
            ]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut registry = SourceRegistry::new();
    registry.register(std::sync::Arc::new(scholar_source(&server)));
    let app = harness(&dir.path().join("sharebib.db"), registry);

    // A copy of the first paper already sits in one of alice's collections
    add_collection(&app.store, "archive", "alice");
    let existing_id = {
        let mut store = lock_store(&app.store).unwrap();
        let id = store
            .insert_paper(&sharebib_crawl::FetchedPaper {
                title: "Graph Networks (preprint)".to_string(),
                doi: Some("10.1000/graph".to_string()),
                ..Default::default()
            })
            .unwrap();
        store
            .add_membership(&sharebib_crawl::storage::MembershipRecord {
                collection_id: "archive".to_string(),
                paper_id: id.clone(),
                group_name: None,
                group_tag: None,
                section_name: None,
                display_order: 1,
            })
            .unwrap();
        id
    };

    let task = app
        .tasks
        .create_task(
            NewCrawlTask {
                user_id: "alice".to_string(),
                name: "GNN watch".to_string(),
                source_type: "semantic_scholar".to_string(),
                source_config: json!({"query": "graph neural networks"}),
                schedule_type: ScheduleType::Weekly,
                target: CrawlTarget::CreateNew {
                    prefix: "GNN Watch".to_string(),
                },
                duplicate_strategy: DuplicateStrategy::Update,
            },
            Utc::now(),
        )
        .unwrap();

    assert!(app.scheduler.run_task_now(&task.id).await.unwrap());

    let runs = app.tasks.list_runs(&task.id).unwrap();
    let run = &runs[0];
    assert_eq!(run.status, RunStatus::Success);
    let collection_id = run.collection_id.clone().unwrap();
    let today = Utc::now().format("%Y-%m-%d").to_string();
    assert!(collection_id.starts_with(&format!("gnn-watch-{}", today)));

    let result = run.result.clone().unwrap();
    assert_eq!(result["new_papers"], 1);
    assert_eq!(result["updated"], 1);

    let store = lock_store(&app.store).unwrap();
    let collection = store.get_collection(&collection_id).unwrap().unwrap();
    assert_eq!(collection.task_type, "crawl_task");
    assert_eq!(collection.task_source.as_deref(), Some("semantic_scholar"));
    assert_eq!(store.list_memberships(&collection_id).unwrap().len(), 2);

    let updated = store.get_paper(&existing_id).unwrap();
    assert_eq!(updated.title, "Graph Networks");
    assert_eq!(updated.venue.as_deref(), Some("ICLR"));
}

#[tokio::test]
async fn test_deleted_target_disables_task_without_fetching() {
    let server = MockServer::start().await;
    mount_feed(&server, "cs.CL", &[("2401.00001", "Neural", "Text.")]).await;
    mount_feed(&server, "cs.LG", &[]).await;

    let dir = TempDir::new().unwrap();
    let mut registry = SourceRegistry::new();
    registry.register(std::sync::Arc::new(arxiv_source(&server)));
    let app = harness(&dir.path().join("sharebib.db"), registry);
    add_collection(&app.store, "doomed", "alice");

    let task = app
        .tasks
        .create_task(
            arxiv_task(
                CrawlTarget::Append {
                    collection_id: "doomed".to_string(),
                },
                DuplicateStrategy::Skip,
            ),
            Utc::now(),
        )
        .unwrap();
    let before = app.tasks.get_task(&task.id).unwrap();
    lock_store(&app.store)
        .unwrap()
        .delete_collection("doomed")
        .unwrap();

    assert!(app.scheduler.run_task_now(&task.id).await.unwrap());

    assert!(server.received_requests().await.unwrap().is_empty());
    let after = app.tasks.get_task(&task.id).unwrap();
    assert!(!after.is_enabled);
    assert_eq!(after.last_run_status, Some(RunStatus::Failed));
    assert_eq!(after.next_run_at, before.next_run_at);
    assert_eq!(
        after.last_run_result.unwrap()["error"],
        "target_collection_deleted"
    );

    let runs = app.tasks.list_runs(&task.id).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(runs[0].finished_at.is_some());
}

#[tokio::test]
async fn test_settings_are_passed_to_sources() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graph/v1/paper/search/bulk"))
        .and(header("x-api-key", "bob-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"paperId": "a", "title": "Keyed"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut registry = SourceRegistry::new();
    registry.register(std::sync::Arc::new(scholar_source(&server)));
    let app = harness(&dir.path().join("sharebib.db"), registry);
    add_collection(&app.store, "bob-list", "bob");
    lock_store(&app.store)
        .unwrap()
        .put_setting("bob", "semantic_scholar_api_key", "bob-key")
        .unwrap();

    let task = app
        .tasks
        .create_task(
            NewCrawlTask {
                user_id: "bob".to_string(),
                name: "Keyed search".to_string(),
                source_type: "semantic_scholar".to_string(),
                source_config: json!({"query": "anything"}),
                schedule_type: ScheduleType::Once,
                target: CrawlTarget::Append {
                    collection_id: "bob-list".to_string(),
                },
                duplicate_strategy: DuplicateStrategy::Skip,
            },
            Utc::now(),
        )
        .unwrap();

    // One-off tasks are due immediately
    assert_eq!(app.scheduler.run_due_tasks().await.unwrap(), 1);

    let after = lock_store(&app.store).unwrap().get_task(&task.id).unwrap().unwrap();
    assert!(!after.is_enabled);
    assert_eq!(after.next_run_at, None);
    assert_eq!(after.last_run_result.unwrap()["new_papers"], 1);
}
