use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use harvest_core::deep::DeepTaskStatus;
use harvest_core::job::{JobSnapshot, StartCollection};
use harvest_core::models::{CollectedRecord, SavedRecord, SavedRecordQuery};
use harvest_core::source::SourceConfig;
use harvest_db::DeepCollection;

const MAX_PAGE_SIZE: usize = 200;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceResponse {
    pub id: i64,
    pub name: String,
    pub source_type: String,
    pub url_template: String,
    pub method: String,
    pub status: String,
}

impl From<SourceConfig> for SourceResponse {
    fn from(source: SourceConfig) -> Self {
        Self {
            id: source.id,
            method: source.method.to_string(),
            status: source.status.as_str().to_string(),
            name: source.name,
            source_type: source.source_type,
            url_template: source.url_template,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceListResponse {
    pub sources: Vec<SourceResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartCollectionRequest {
    pub keyword: String,
    pub source_ids: Vec<i64>,
    /// First page (default 1).
    pub page: Option<u32>,
    /// Number of pages per source (default 1).
    pub pages: Option<u32>,
    /// Records per page (default 10).
    pub limit: Option<usize>,
}

impl From<StartCollectionRequest> for StartCollection {
    fn from(body: StartCollectionRequest) -> Self {
        let mut request = StartCollection::new(body.keyword, body.source_ids);
        if let Some(page) = body.page {
            request = request.with_page(page);
        }
        if let Some(pages) = body.pages {
            request = request.with_pages(pages);
        }
        if let Some(limit) = body.limit {
            request = request.with_limit(limit);
        }
        request
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartCollectionResponse {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStatusResponse {
    pub job_id: String,
    pub status: String,
    pub keyword: String,
    pub started_at: DateTime<Utc>,
}

impl From<JobSnapshot> for CollectionStatusResponse {
    fn from(snapshot: JobSnapshot) -> Self {
        Self {
            job_id: snapshot.job_id,
            status: snapshot.status.to_string(),
            keyword: snapshot.keyword,
            started_at: snapshot.started_at,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SaveRecordsRequest {
    /// Records exactly as received in `record` stream events.
    #[schema(value_type = Vec<Object>)]
    pub records: Vec<CollectedRecord>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SaveRecordsResponse {
    pub saved: usize,
}

// ---------------------------------------------------------------------------
// Saved records
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ListRecordsQuery {
    /// Substring match on the collection keyword.
    pub keyword: Option<String>,
    pub source_type: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl From<ListRecordsQuery> for SavedRecordQuery {
    fn from(query: ListRecordsQuery) -> Self {
        let defaults = SavedRecordQuery::default();
        Self {
            keyword: query.keyword,
            source_type: query.source_type,
            limit: query.limit.unwrap_or(defaults.limit).min(MAX_PAGE_SIZE),
            offset: query.offset.unwrap_or(0),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SavedRecordResponse {
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

impl From<SavedRecord> for SavedRecordResponse {
    fn from(record: SavedRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            url: record.url,
            summary: record.summary,
            source: record.source,
            image_url: record.image_url,
            keyword: record.keyword,
            source_type: record.source_type,
            raw_data: record.raw_data,
            collected_at: record.collected_at,
            saved_at: record.saved_at,
            has_deep_collected: record.has_deep_collected,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RecordListResponse {
    pub records: Vec<SavedRecordResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Deep collection
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartDeepCollectionRequest {
    pub record_ids: Vec<i64>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartDeepCollectionResponse {
    pub task_id: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeepTaskResponse {
    pub task_id: String,
    pub status: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl From<DeepTaskStatus> for DeepTaskResponse {
    fn from(status: DeepTaskStatus) -> Self {
        Self {
            task_id: status.task_id,
            status: status.status.to_string(),
            total: status.total,
            completed: status.completed,
            failed: status.failed,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeepResultResponse {
    pub record_id: i64,
    pub status: String,
    pub deep_content: Option<String>,
    pub analysis_result: Option<String>,
    pub model: String,
    pub error_message: Option<String>,
    pub tokens_used: i32,
    pub updated_at: DateTime<Utc>,
}

impl From<DeepCollection> for DeepResultResponse {
    fn from(row: DeepCollection) -> Self {
        Self {
            record_id: row.record_id,
            status: row.status,
            deep_content: row.deep_content,
            analysis_result: row.analysis_result,
            model: row.model,
            error_message: row.error_message,
            tokens_used: row.tokens_used,
            updated_at: row.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
