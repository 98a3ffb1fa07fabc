//! Semantic Scholar bulk search source

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
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";

/// User setting holding the Semantic Scholar API key
pub const API_KEY_SETTING: &str = "semantic_scholar_api_key";

const FIELDS: &str =
    "title,abstract,authors,year,venue,externalIds,openAccessPdf,citationCount,publicationDate";

const MAX_LIMIT: i64 = 1000;

const FIELDS_OF_STUDY: &[SelectOption] = &[
    SelectOption { value: "Computer Science", label: "Computer Science" },
    SelectOption { value: "Mathematics", label: "Mathematics" },
    SelectOption { value: "Physics", label: "Physics" },
    SelectOption { value: "Biology", label: "Biology" },
    SelectOption { value: "Medicine", label: "Medicine" },
    SelectOption { value: "Chemistry", label: "Chemistry" },
    SelectOption { value: "Engineering", label: "Engineering" },
    SelectOption { value: "Materials Science", label: "Materials Science" },
    SelectOption { value: "Environmental Science", label: "Environmental Science" },
    SelectOption { value: "Economics", label: "Economics" },
    SelectOption { value: "Business", label: "Business" },
    SelectOption { value: "Political Science", label: "Political Science" },
    SelectOption { value: "Psychology", label: "Psychology" },
    SelectOption { value: "Sociology", label: "Sociology" },
    SelectOption { value: "Linguistics", label: "Linguistics" },
    SelectOption { value: "Philosophy", label: "Philosophy" },
    SelectOption { value: "Geography", label: "Geography" },
    SelectOption { value: "History", label: "History" },
    SelectOption { value: "Art", label: "Art" },
    SelectOption { value: "Education", label: "Education" },
];

fn meta() -> SourceMeta {
    SourceMeta {
        source_type: "semantic_scholar",
        display_name: "Semantic Scholar",
        description: "Search papers via Semantic Scholar API (200M+ papers)",
        config_fields: vec![
            SourceConfigField::new("query", "Search Query", FieldType::Text)
                .with_description("Keywords to search for in paper titles and abstracts"),
            SourceConfigField::new("fields_of_study", "Fields of Study", FieldType::Multiselect)
                .optional()
                .with_options(FIELDS_OF_STUDY)
                .with_description("Filter by academic discipline (leave empty for all)"),
            SourceConfigField::new("year", "Year Range", FieldType::Text)
                .optional()
                .with_description("e.g. \"2024\" or \"2023-2025\" or \"2024-\""),
            SourceConfigField::new("min_citation_count", "Min Citations", FieldType::Number)
                .optional()
                .with_default(json!(0))
                .with_bounds(0, 100_000)
                .with_description("Minimum citation count (0 = no filter)"),
            SourceConfigField::new("limit", "Max Papers", FieldType::Number)
                .optional()
                .with_default(json!(100))
                .with_bounds(1, MAX_LIMIT)
                .with_description("Maximum number of papers to fetch per run"),
            SourceConfigField::new("filter_keywords", "Local Filter Keywords", FieldType::Keywords)
                .optional()
                .with_description("Additional local filtering on results (same syntax as arXiv RSS)"),
        ],
        supported_schedules: vec![
            ScheduleType::Daily,
            ScheduleType::Weekly,
            ScheduleType::Monthly,
        ],
        rate_limit: 1.0,
    }
}

#[derive(Debug, Deserialize)]
struct BulkSearchPage {
    data: Option<Vec<ApiPaper>>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPaper {
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    authors: Option<Vec<ApiAuthor>>,
    year: Option<i32>,
    venue: Option<String>,
    external_ids: Option<ExternalIds>,
    open_access_pdf: Option<OpenAccessPdf>,
}

#[derive(Debug, Deserialize)]
struct ApiAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    #[serde(rename = "ArXiv")]
    arxiv: Option<String>,
    #[serde(rename = "DOI")]
    doi: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAccessPdf {
    url: Option<String>,
}

impl ApiPaper {
    fn into_paper(self) -> Option<FetchedPaper> {
        let title = self.title.filter(|t| !t.trim().is_empty())?;
        let (arxiv_id, doi) = match self.external_ids {
            Some(ids) => (ids.arxiv, ids.doi),
            None => (None, None),
        };

        let authors = self
            .authors
            .map(|list| list.into_iter().filter_map(|a| a.name).filter(|n| !n.is_empty()).collect());

        let mut url_pdf = self
            .open_access_pdf
            .and_then(|pdf| pdf.url)
            .filter(|u| !u.is_empty());
        let url_arxiv = arxiv_id.as_ref().map(|id| {
            if url_pdf.is_none() {
                url_pdf = Some(format!("https://arxiv.org/pdf/{}.pdf", id));
            }
            format!("https://arxiv.org/abs/{}", id)
        });

        Some(FetchedPaper {
            title,
            authors,
            abstract_text: self.abstract_text,
            year: self.year,
            venue: self.venue.filter(|v| !v.is_empty()),
            arxiv_id,
            doi,
            url_arxiv,
            url_pdf,
            ..FetchedPaper::default()
        })
    }
}

/// Source backed by the Semantic Scholar Graph API bulk search
pub struct SemanticScholarSource {
    meta: SourceMeta,
    client: Client,
    base_url: String,
    request_interval: Duration,
    retry: RetryPolicy,
}

impl SemanticScholarSource {
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

    fn query_params(config: &SourceConfig, query: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![("query", query.to_string()), ("fields", FIELDS.to_string())];

        let fields_of_study = config.get_strings("fields_of_study");
        if !fields_of_study.is_empty() {
            params.push(("fieldsOfStudy", fields_of_study.join(",")));
        }
        if let Some(year) = config.get_str("year").filter(|y| !y.trim().is_empty()) {
            params.push(("year", year.trim().to_string()));
        }
        if let Some(min) = config.get_i64("min_citation_count").filter(|n| *n > 0) {
            params.push(("minCitationCount", min.to_string()));
        }
        params
    }
}

#[async_trait]
impl CrawlSource for SemanticScholarSource {
    fn meta(&self) -> &SourceMeta {
        &self.meta
    }

    async fn fetch(
        &self,
        config: &SourceConfig,
        _since: Option<DateTime<Utc>>,
        user_settings: &UserSettings,
    ) -> Result<Vec<FetchedPaper>, FetchError> {
        let query = config.get_str("query").unwrap_or("").trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let filter = config.keyword_filter("filter_keywords")?;
        let limit = config.get_i64("limit").unwrap_or(100).clamp(1, MAX_LIMIT) as usize;
        let params = Self::query_params(config, query);
        let api_key = user_settings
            .get(API_KEY_SETTING)
            .filter(|k| !k.is_empty());
        let url = format!("{}/paper/search/bulk", self.base_url.trim_end_matches('/'));

        let mut pacer = RequestPacer::new(self.request_interval);
        let mut results = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0;

        while results.len() < limit {
            let build = || {
                let mut request = self.client.get(&url).query(&params);
                if let Some(token) = &token {
                    request = request.query(&[("token", token)]);
                }
                if let Some(key) = api_key {
                    request = request.header("x-api-key", key);
                }
                request
            };

            let response = send_with_backoff(build, &url, &self.retry, &mut pacer).await?;
            let body = read_body(response, &url).await?;
            let page: BulkSearchPage =
                serde_json::from_str(&body).map_err(|e| FetchError::Parse {
                    url: url.clone(),
                    message: e.to_string(),
                })?;
            pages += 1;

            let papers = page.data.unwrap_or_default();
            if papers.is_empty() {
                break;
            }

            for paper in papers {
                if results.len() >= limit {
                    break;
                }
                if let Some(fetched) = paper.into_paper() {
                    if filter.matches_paper(&fetched.title, fetched.abstract_text.as_deref()) {
                        results.push(fetched);
                    }
                }
            }

            match page.token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }

        tracing::info!(
            "Semantic Scholar '{}': {} papers from {} pages",
            query,
            results.len(),
            pages
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api_paper(value: serde_json::Value) -> ApiPaper {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_paper_mapping() {
        let paper = api_paper(json!({
            "paperId": "abc",
            "title": "Attention Is All You Need",
            "abstract": "Transformers.",
            "authors": [{"authorId": "1", "name": "Ashish Vaswani"}, {"authorId": "2", "name": null}],
            "year": 2017,
            "venue": "NeurIPS",
            "externalIds": {"ArXiv": "1706.03762", "DOI": "10.5555/3295222", "CorpusId": 13756489},
            "openAccessPdf": null,
            "citationCount": 100000
        }))
        .into_paper()
        .unwrap();

        assert_eq!(paper.authors, Some(vec!["Ashish Vaswani".to_string()]));
        assert_eq!(paper.arxiv_id.as_deref(), Some("1706.03762"));
        assert_eq!(paper.doi.as_deref(), Some("10.5555/3295222"));
        assert_eq!(
            paper.url_arxiv.as_deref(),
            Some("https://arxiv.org/abs/1706.03762")
        );
        assert_eq!(
            paper.url_pdf.as_deref(),
            Some("https://arxiv.org/pdf/1706.03762.pdf")
        );
    }

    #[test]
    fn test_open_access_pdf_preferred() {
        let paper = api_paper(json!({
            "title": "T",
            "externalIds": {"ArXiv": "2401.00001"},
            "openAccessPdf": {"url": "https://example.org/t.pdf", "status": "GREEN"}
        }))
        .into_paper()
        .unwrap();

        assert_eq!(paper.url_pdf.as_deref(), Some("https://example.org/t.pdf"));
    }

    #[test]
    fn test_empty_venue_and_missing_title() {
        let paper = api_paper(json!({"title": "T", "venue": ""})).into_paper().unwrap();
        assert_eq!(paper.venue, None);
        assert_eq!(paper.status(), crate::state::PaperStatus::NoAccess);

        assert!(api_paper(json!({"title": null})).into_paper().is_none());
        assert!(api_paper(json!({"title": ""})).into_paper().is_none());
    }

    #[test]
    fn test_query_params() {
        let config = meta()
            .validate_config(&json!({
                "query": "graph neural networks",
                "fields_of_study": ["Computer Science", "Mathematics"],
                "year": "2023-",
                "min_citation_count": 0
            }))
            .unwrap();

        let params = SemanticScholarSource::query_params(&config, "graph neural networks");
        let keys: Vec<&str> = params.iter().map(|(k, _)| *k).collect();

        assert_eq!(keys, vec!["query", "fields", "fieldsOfStudy", "year"]);
        assert_eq!(params[2].1, "Computer Science,Mathematics");
    }

    #[test]
    fn test_meta_limits() {
        let meta = meta();
        assert!(meta.validate_config(&json!({"query": "x", "limit": 1001})).is_err());
        assert!(meta.validate_config(&json!({"query": "x", "limit": 0})).is_err());
        assert!(meta.validate_config(&json!({"limit": 10})).is_err());
    }
}
