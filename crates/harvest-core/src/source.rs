//! Declarative source definitions.
//!
//! A [`SourceConfig`] describes one scrapeable endpoint. Persisted sources
//! arrive as [`RawSourceConfig`] rows whose header, body and selector
//! columns are JSON-encoded text; [`SourceConfig::from_raw`] is the one
//! place that text is parsed.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub type SourceId = i64;

/// Whether a source may be included in a collection job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    #[default]
    Active,
    Inactive,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for SourceStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(SourceStatus::Active),
            "inactive" => Ok(SourceStatus::Inactive),
            other => Err(AppError::ConfigError(format!(
                "Unknown source status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "" | "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            other => Err(AppError::ConfigError(format!(
                "Unsupported HTTP method: {other}"
            ))),
        }
    }
}

/// How a POST body template is put on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    /// `application/x-www-form-urlencoded`
    #[default]
    Form,
    Json,
}

impl FromStr for BodyEncoding {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "form" => Ok(BodyEncoding::Form),
            "json" => Ok(BodyEncoding::Json),
            other => Err(AppError::ConfigError(format!(
                "Unsupported body encoding: {other}"
            ))),
        }
    }
}

/// The four field selectors. Empty selectors are stored as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelectors {
    pub title: Option<String>,
    pub url: Option<String>,
    pub summary: Option<String>,
    pub image: Option<String>,
}

/// Extraction layout of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Selectors {
    /// One record per node matching `container`; field selectors are
    /// resolved relative to that node.
    Container {
        container: String,
        fields: FieldSelectors,
    },
    /// Each field selector runs once against the whole document and
    /// records are paired up by position.
    Independent { fields: FieldSelectors },
}

impl Selectors {
    pub fn fields(&self) -> &FieldSelectors {
        match self {
            Selectors::Container { fields, .. } | Selectors::Independent { fields } => fields,
        }
    }
}

/// Strongly typed description of one scrapeable endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: SourceId,
    pub name: String,
    /// Selects a specialized extraction strategy (`custom` is generic).
    pub source_type: String,
    /// URL with `{keyword}`, `{page}` and `{limit}` placeholders.
    pub url_template: String,
    pub method: HttpMethod,
    /// Merged over the default header set, never replacing it.
    pub headers: BTreeMap<String, String>,
    /// Only used for POST.
    pub body_template: Option<BTreeMap<String, String>>,
    pub body_encoding: BodyEncoding,
    pub selectors: Selectors,
    pub status: SourceStatus,
}

impl SourceConfig {
    pub fn is_active(&self) -> bool {
        self.status == SourceStatus::Active
    }

    /// Parse a persisted row into a typed config.
    pub fn from_raw(raw: RawSourceConfig) -> Result<Self, AppError> {
        let headers = match non_empty(raw.headers.as_deref()) {
            Some(text) => parse_string_map(text, "headers")?,
            None => BTreeMap::new(),
        };

        let body_template = non_empty(raw.body_template.as_deref())
            .map(|text| parse_string_map(text, "body_template"))
            .transpose()?;

        let fields = FieldSelectors {
            title: non_empty(raw.title_selector.as_deref()).map(str::to_string),
            url: non_empty(raw.url_selector.as_deref()).map(str::to_string),
            summary: non_empty(raw.summary_selector.as_deref()).map(str::to_string),
            image: non_empty(raw.image_selector.as_deref()).map(str::to_string),
        };

        let selectors = match non_empty(raw.data_selector.as_deref()) {
            Some(text) => {
                let data: DataSelector = serde_json::from_str(text).map_err(|e| {
                    AppError::ConfigError(format!(
                        "Invalid data_selector for source '{}': {e}",
                        raw.name
                    ))
                })?;
                if !data.selector_type.eq_ignore_ascii_case("css") {
                    return Err(AppError::ConfigError(format!(
                        "Unsupported selector type '{}' for source '{}'",
                        data.selector_type, raw.name
                    )));
                }
                match non_empty(Some(&data.selector)) {
                    Some(container) => Selectors::Container {
                        container: container.to_string(),
                        fields,
                    },
                    None => Selectors::Independent { fields },
                }
            }
            None => Selectors::Independent { fields },
        };

        Ok(Self {
            id: raw.id,
            url_template: raw.url.unwrap_or_default(),
            method: raw.method.as_deref().unwrap_or("GET").parse()?,
            headers,
            body_template,
            body_encoding: raw.body_encoding.as_deref().unwrap_or("form").parse()?,
            selectors,
            status: raw.status.as_deref().unwrap_or("active").parse()?,
            source_type: non_empty(raw.source_type.as_deref())
                .unwrap_or("custom")
                .to_string(),
            name: raw.name,
        })
    }
}

/// A source as persisted: JSON columns are still text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSourceConfig {
    pub id: SourceId,
    pub name: String,
    pub source_type: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub headers: Option<String>,
    pub body_template: Option<String>,
    pub body_encoding: Option<String>,
    pub data_selector: Option<String>,
    pub title_selector: Option<String>,
    pub url_selector: Option<String>,
    pub summary_selector: Option<String>,
    pub image_selector: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
struct DataSelector {
    #[serde(rename = "type", default = "default_selector_type")]
    selector_type: String,
    #[serde(default)]
    selector: String,
}

fn default_selector_type() -> String {
    "css".to_string()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parse a JSON object into string values; non-string scalars are rendered
/// with their JSON text (`1` -> `"1"`).
fn parse_string_map(text: &str, column: &str) -> Result<BTreeMap<String, String>, AppError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| AppError::ConfigError(format!("Invalid JSON in {column}: {e}")))?;
    let serde_json::Value::Object(object) = value else {
        return Err(AppError::ConfigError(format!(
            "{column} must be a JSON object"
        )));
    };
    Ok(object
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect())
}
