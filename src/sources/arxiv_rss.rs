//! arXiv RSS source
//!
//! Fetches the daily announcement feed of each configured category and turns
//! every item into a paper. Both the RSS 2.0 feeds served by rss.arxiv.org and
//! the older RDF feeds are understood.

use crate::config::SourceHttpConfig;
use crate::sources::http::{read_body, send_with_backoff, RequestPacer, RetryPolicy};
use crate::sources::types::{
    FetchedPaper, FieldType, SelectOption, SourceConfig, SourceConfigField, SourceMeta,
};
use crate::sources::{CrawlSource, FetchError};
use crate::state::ScheduleType;
use crate::storage::UserSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use regex::Regex;
use reqwest::Client;
use scraper::Html;
use std::collections::HashSet;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://rss.arxiv.org/rss";

static NEW_STYLE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:arxiv\.org/(?:abs|pdf|html)/)?(\d{4}\.\d{4,5}(?:v\d+)?)").expect("valid regex")
});
static OLD_STYLE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:arxiv\.org/(?:abs|pdf)/)?([a-z-]+/\d{7}(?:v\d+)?)").expect("valid regex")
});
static VERSION_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"v\d+$").expect("valid regex"));
static CATEGORY_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\([^)]+\)\s*").expect("valid regex"));
static ARXIV_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(arXiv:[^)]*\)\s*$").expect("valid regex"));
static ANNOUNCE_PREAMBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*arXiv:\S+\s+Announce Type:\s*\S+\s*Abstract:\s*").expect("valid regex")
});
static AUTHOR_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*,\s*(?:and\s+)?|\s+and\s+").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

const CATEGORIES: &[SelectOption] = &[
    SelectOption { value: "cs.AI", label: "Artificial Intelligence" },
    SelectOption { value: "cs.CL", label: "Computation and Language" },
    SelectOption { value: "cs.CC", label: "Computational Complexity" },
    SelectOption { value: "cs.CE", label: "Computational Engineering" },
    SelectOption { value: "cs.CG", label: "Computational Geometry" },
    SelectOption { value: "cs.GT", label: "Computer Science and Game Theory" },
    SelectOption { value: "cs.CV", label: "Computer Vision and Pattern Recognition" },
    SelectOption { value: "cs.CY", label: "Computers and Society" },
    SelectOption { value: "cs.CR", label: "Cryptography and Security" },
    SelectOption { value: "cs.DS", label: "Data Structures and Algorithms" },
    SelectOption { value: "cs.DB", label: "Databases" },
    SelectOption { value: "cs.DL", label: "Digital Libraries" },
    SelectOption { value: "cs.DM", label: "Discrete Mathematics" },
    SelectOption { value: "cs.DC", label: "Distributed, Parallel, and Cluster Computing" },
    SelectOption { value: "cs.ET", label: "Emerging Technologies" },
    SelectOption { value: "cs.FL", label: "Formal Languages and Automata Theory" },
    SelectOption { value: "cs.GL", label: "General Literature" },
    SelectOption { value: "cs.GR", label: "Graphics" },
    SelectOption { value: "cs.AR", label: "Hardware Architecture" },
    SelectOption { value: "cs.HC", label: "Human-Computer Interaction" },
    SelectOption { value: "cs.IR", label: "Information Retrieval" },
    SelectOption { value: "cs.IT", label: "Information Theory" },
    SelectOption { value: "cs.LG", label: "Machine Learning" },
    SelectOption { value: "cs.LO", label: "Logic in Computer Science" },
    SelectOption { value: "cs.MA", label: "Multiagent Systems" },
    SelectOption { value: "cs.MM", label: "Multimedia" },
    SelectOption { value: "cs.MS", label: "Mathematical Software" },
    SelectOption { value: "cs.NA", label: "Numerical Analysis" },
    SelectOption { value: "cs.NE", label: "Neural and Evolutionary Computing" },
    SelectOption { value: "cs.NI", label: "Networking and Internet Architecture" },
    SelectOption { value: "cs.OH", label: "Other Computer Science" },
    SelectOption { value: "cs.OS", label: "Operating Systems" },
    SelectOption { value: "cs.PF", label: "Performance" },
    SelectOption { value: "cs.PL", label: "Programming Languages" },
    SelectOption { value: "cs.RO", label: "Robotics" },
    SelectOption { value: "cs.SC", label: "Symbolic Computation" },
    SelectOption { value: "cs.SD", label: "Sound" },
    SelectOption { value: "cs.SE", label: "Software Engineering" },
    SelectOption { value: "cs.SI", label: "Social and Information Networks" },
    SelectOption { value: "cs.SY", label: "Systems and Control" },
    SelectOption { value: "stat.ML", label: "Statistics - Machine Learning" },
    SelectOption { value: "eess.AS", label: "Audio and Speech Processing" },
    SelectOption { value: "eess.IV", label: "Image and Video Processing" },
    SelectOption { value: "eess.SP", label: "Signal Processing" },
    SelectOption { value: "math.OC", label: "Optimization and Control" },
];

fn meta() -> SourceMeta {
    SourceMeta {
        source_type: "arxiv_rss",
        display_name: "arXiv RSS",
        description: "Subscribe to daily new papers by arXiv category",
        config_fields: vec![
            SourceConfigField::new("categories", "Categories", FieldType::Multiselect)
                .with_options(CATEGORIES),
            SourceConfigField::new("filter_keywords", "Filter Keywords", FieldType::Keywords)
                .optional()
                .with_description(
                    "Only include papers whose title/abstract contains these keywords (leave empty for all)",
                ),
        ],
        supported_schedules: vec![ScheduleType::Daily],
        rate_limit: 3.0,
    }
}

/// Source that reads arXiv category feeds
pub struct ArxivRssSource {
    meta: SourceMeta,
    client: Client,
    base_url: String,
    request_interval: Duration,
    retry: RetryPolicy,
}

impl ArxivRssSource {
    pub fn new(client: Client, settings: &SourceHttpConfig) -> Self {
        let meta = meta();
        Self {
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            request_interval: settings.request_interval(&meta),
            retry: settings.retry_policy(),
            meta,
            client,
        }
    }

    fn feed_url(&self, category: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), category)
    }
}

#[async_trait]
impl CrawlSource for ArxivRssSource {
    fn meta(&self) -> &SourceMeta {
        &self.meta
    }

    // The feed only carries the latest announcement, so `since` is not needed
    async fn fetch(
        &self,
        config: &SourceConfig,
        _since: Option<DateTime<Utc>>,
        _user_settings: &UserSettings,
    ) -> Result<Vec<FetchedPaper>, FetchError> {
        let filter = config.keyword_filter("filter_keywords")?;
        let mut pacer = RequestPacer::new(self.request_interval);
        let mut seen_ids = HashSet::new();
        let mut results = Vec::new();

        for category in config.get_strings("categories") {
            let url = self.feed_url(&category);
            tracing::debug!("Fetching arXiv feed {}", url);

            let response =
                send_with_backoff(|| self.client.get(&url), &url, &self.retry, &mut pacer).await?;
            let body = read_body(response, &url).await?;
            let items = parse_feed(&body).map_err(|message| FetchError::Parse {
                url: url.clone(),
                message,
            })?;

            let total = items.len();
            let mut kept = 0;
            for item in items {
                let Some(paper) = item.into_paper() else {
                    continue;
                };
                let id = paper.arxiv_id.clone().unwrap_or_default();
                if seen_ids.contains(&id) {
                    continue;
                }
                if filter.matches_paper(&paper.title, paper.abstract_text.as_deref()) {
                    seen_ids.insert(id);
                    results.push(paper);
                    kept += 1;
                }
            }
            tracing::info!("arXiv {}: {} items, {} kept", category, total, kept);
        }

        Ok(results)
    }
}

/// One raw feed item
#[derive(Debug, Default, Clone, PartialEq)]
struct FeedItem {
    title: String,
    link: String,
    description: String,
    creators: Vec<String>,
    categories: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum ItemField {
    Title,
    Link,
    Description,
    Creator,
    Category,
}

impl ItemField {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Self::Title),
            b"link" => Some(Self::Link),
            b"description" => Some(Self::Description),
            b"creator" => Some(Self::Creator),
            b"category" | b"subject" => Some(Self::Category),
            _ => None,
        }
    }
}

/// Extracts the items of an RSS 2.0 or RDF feed
fn parse_feed(xml: &str) -> Result<Vec<FeedItem>, String> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();
    let mut items = Vec::new();
    let mut current: Option<FeedItem> = None;
    let mut field: Option<ItemField> = None;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| format!("XML error at byte {}: {}", reader.buffer_position(), e))?;

        match event {
            Event::Start(ref e) => {
                let name = e.local_name();
                if name.as_ref() == b"item" {
                    current = Some(FeedItem::default());
                } else if current.is_some() {
                    field = ItemField::from_local_name(name.as_ref());
                    text.clear();
                }
            }
            Event::Text(ref e) => {
                if field.is_some() {
                    match e.unescape() {
                        Ok(t) => text.push_str(&t),
                        Err(_) => text.push_str(&String::from_utf8_lossy(e)),
                    }
                }
            }
            Event::CData(ref e) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Event::End(ref e) => {
                let name = e.local_name();
                if name.as_ref() == b"item" {
                    if let Some(item) = current.take() {
                        items.push(item);
                    }
                    field = None;
                } else if let (Some(item), Some(f)) = (current.as_mut(), field.take()) {
                    let value = std::mem::take(&mut text);
                    match f {
                        ItemField::Title => item.title = value,
                        ItemField::Link => item.link = value.trim().to_string(),
                        ItemField::Description => item.description = value,
                        ItemField::Creator => item.creators.push(value),
                        ItemField::Category => item.categories.push(value.trim().to_string()),
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }

        buf.clear();
    }

    Ok(items)
}

impl FeedItem {
    /// Converts the item into a paper; items without a title or ID are dropped
    fn into_paper(self) -> Option<FetchedPaper> {
        let title = clean_title(&self.title);
        if title.is_empty() {
            return None;
        }

        let arxiv_id = extract_arxiv_id(&self.link)?;
        let id = VERSION_SUFFIX.replace(&arxiv_id, "").to_string();

        let authors: Vec<String> = self
            .creators
            .iter()
            .flat_map(|c| split_authors(&strip_html(c)))
            .collect();
        let abstract_text = clean_abstract(&self.description);
        let tags: Vec<String> = self.categories.into_iter().filter(|c| !c.is_empty()).collect();

        Some(FetchedPaper {
            title,
            authors: (!authors.is_empty()).then_some(authors),
            abstract_text: (!abstract_text.is_empty()).then_some(abstract_text),
            url_arxiv: Some(format!("https://arxiv.org/abs/{}", id)),
            url_pdf: Some(format!("https://arxiv.org/pdf/{}.pdf", id)),
            arxiv_id: Some(id),
            tags: (!tags.is_empty()).then_some(tags),
            ..FetchedPaper::default()
        })
    }
}

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

fn strip_html(s: &str) -> String {
    Html::parse_fragment(s).root_element().text().collect()
}

/// Removes a leading category tag and a trailing arXiv reference
fn clean_title(raw: &str) -> String {
    let title = CATEGORY_PREFIX.replace(raw, "");
    let title = ARXIV_SUFFIX.replace(&title, "");
    collapse_whitespace(&title)
}

fn clean_abstract(raw: &str) -> String {
    let text = strip_html(raw);
    let text = ANNOUNCE_PREAMBLE.replace(&text, "");
    collapse_whitespace(&text)
}

fn split_authors(raw: &str) -> Vec<String> {
    AUTHOR_SEPARATOR
        .split(raw.trim())
        .map(collapse_whitespace)
        .filter(|a| !a.is_empty())
        .collect()
}

/// Extracts an arXiv identifier (new or old style) from a URL
fn extract_arxiv_id(url: &str) -> Option<String> {
    NEW_STYLE_ID
        .captures(url)
        .or_else(|| OLD_STYLE_ID.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
