//! Source metadata and the records sources produce

use crate::filter::KeywordFilter;
use crate::state::{PaperStatus, ScheduleType};
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// A source-agnostic paper record produced by a fetch
///
/// Only the title is required. Never persisted directly; the paper store
/// turns it into a stored paper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchedPaper {
    pub title: String,
    pub authors: Option<Vec<String>>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    pub arxiv_id: Option<String>,
    pub doi: Option<String>,
    pub url_arxiv: Option<String>,
    pub url_pdf: Option<String>,
    pub url_code: Option<String>,
    pub url_project: Option<String>,
    pub tags: Option<Vec<String>>,
    pub bibtex_key: Option<String>,
}

impl FetchedPaper {
    /// Accessible if either an arXiv or a PDF URL is present
    pub fn status(&self) -> PaperStatus {
        PaperStatus::from_urls(self.url_arxiv.as_deref(), self.url_pdf.as_deref())
    }
}

/// The kind of value a configuration field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Multiselect,
    Number,
    Keywords,
}

/// One choice of a multiselect field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub value: &'static str,
    pub label: &'static str,
}

/// Declares one configuration field of a source
#[derive(Debug, Clone, Serialize)]
pub struct SourceConfigField {
    pub key: &'static str,
    pub label: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: &'static str,
    pub options: Vec<SelectOption>,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
}

impl SourceConfigField {
    /// A required field with no default, options or bounds
    pub fn new(key: &'static str, label: &'static str, field_type: FieldType) -> Self {
        Self {
            key,
            label,
            field_type,
            required: true,
            default: None,
            description: "",
            options: Vec::new(),
            min_value: None,
            max_value: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub fn with_options(mut self, options: &[SelectOption]) -> Self {
        self.options = options.to_vec();
        self
    }

    pub fn with_bounds(mut self, min: i64, max: i64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    /// Checks and normalizes a present value
    fn check(&self, value: Value) -> Result<Value, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidField {
            key: self.key.to_string(),
            reason,
        };

        match self.field_type {
            FieldType::Text => match value {
                Value::String(_) => Ok(value),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                other => Err(invalid(format!("expected text, got {}", other))),
            },
            FieldType::Number => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| invalid(format!("expected an integer, got {}", value)))?;
                if let Some(min) = self.min_value {
                    if n < min {
                        return Err(invalid(format!("{} is below the minimum {}", n, min)));
                    }
                }
                if let Some(max) = self.max_value {
                    if n > max {
                        return Err(invalid(format!("{} is above the maximum {}", n, max)));
                    }
                }
                Ok(value)
            }
            FieldType::Multiselect | FieldType::Keywords => {
                let items = value
                    .as_array()
                    .ok_or_else(|| invalid(format!("expected a list, got {}", value)))?;
                let strings = items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| invalid(format!("expected a string, got {}", item)))
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                if self.field_type == FieldType::Keywords {
                    KeywordFilter::parse(&strings)?;
                }
                Ok(value)
            }
        }
    }
}

/// Static description of a source
#[derive(Debug, Clone, Serialize)]
pub struct SourceMeta {
    pub source_type: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub config_fields: Vec<SourceConfigField>,
    pub supported_schedules: Vec<ScheduleType>,
    /// Minimum interval between requests, in seconds
    pub rate_limit: f64,
}

impl SourceMeta {
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_secs_f64(self.rate_limit.max(0.0))
    }

    /// Whether tasks of this source may use `schedule`
    ///
    /// One-off runs are accepted by every source.
    pub fn supports_schedule(&self, schedule: ScheduleType) -> bool {
        schedule.is_once() || self.supported_schedules.contains(&schedule)
    }

    /// Validates raw task configuration against the declared fields
    ///
    /// Each declared key takes the raw value, or the field default when the
    /// key is absent or null. Undeclared keys are dropped.
    pub fn validate_config(&self, raw: &Value) -> Result<SourceConfig, ConfigError> {
        let raw = match raw {
            Value::Object(map) => map,
            Value::Null => return self.validate_config(&Value::Object(Map::new())),
            other => {
                return Err(ConfigError::Validation(format!(
                    "source config must be an object, got {}",
                    other
                )))
            }
        };

        let mut cleaned = Map::new();
        for field in &self.config_fields {
            let value = match raw.get(field.key) {
                Some(Value::Null) | None => field.default.clone(),
                Some(v) => Some(v.clone()),
            };

            match value {
                Some(v) => {
                    cleaned.insert(field.key.to_string(), field.check(v)?);
                }
                None if field.required => {
                    return Err(ConfigError::MissingField(field.key.to_string()));
                }
                None => {
                    cleaned.insert(field.key.to_string(), Value::Null);
                }
            }
        }

        Ok(SourceConfig(cleaned))
    }
}

/// Normalized source configuration
///
/// Holds exactly the declared fields of a source; optional fields without a
/// value are null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceConfig(Map<String, Value>);

impl SourceConfig {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    /// A list field, or an empty list when unset
    pub fn get_strings(&self, key: &str) -> Vec<String> {
        self.get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Parses a keywords field into a filter
    pub fn keyword_filter(&self, key: &str) -> Result<KeywordFilter, ConfigError> {
        KeywordFilter::parse(&self.get_strings(key))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}
