use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One item pulled out of a fetched page.
///
/// `title` is the only required field; extraction drops anything without one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub image: String,
    /// Provenance label: the source name, or a specialized strategy constant.
    #[serde(default)]
    pub source: String,
}

/// An extracted record tagged with the job that produced it.
///
/// This is the payload of a `record` stream event and the unit callers
/// hand back to `save_records`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedRecord {
    #[serde(default)]
    pub job_id: String,
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub summary: String,
    /// Extracted image, or the first image URL mentioned in the summary.
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default = "Utc::now")]
    pub collected_at: DateTime<Utc>,
    /// JSON of the record exactly as the extraction strategy produced it.
    #[serde(default)]
    pub raw_data: String,
}

/// A record that has been persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SavedRecord {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub summary: String,
    pub source: String,
    pub image_url: String,
    pub keyword: String,
    pub source_type: String,
    pub raw_data: String,
    pub collected_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
    pub has_deep_collected: bool,
}

/// Filter for listing saved records, newest first.
#[derive(Debug, Clone)]
pub struct SavedRecordQuery {
    /// Substring match on the keyword the record was collected with.
    pub keyword: Option<String>,
    pub source_type: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for SavedRecordQuery {
    fn default() -> Self {
        Self {
            keyword: None,
            source_type: None,
            limit: 50,
            offset: 0,
        }
    }
}

static IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://\S+\.(?:jpg|png|jpeg|gif|webp)").expect("image URL pattern is valid")
});

/// Pick the image for a record: the extracted one, else the first image URL
/// found in the summary, else empty.
pub fn resolve_image(record: &ExtractedRecord) -> String {
    if !record.image.is_empty() {
        return record.image.clone();
    }
    IMAGE_URL
        .find(&record.summary)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}
