use std::future::Future;

use crate::error::AppError;
use crate::models::{CollectedRecord, ExtractedRecord, SavedRecord};
use crate::request::FetchRequest;
use crate::source::{SourceConfig, SourceId};

/// Performs one HTTP request and returns the response body.
///
/// Implementations fail on network errors, timeouts and non-2xx statuses.
/// They never retry on their own.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Turns fetched markup into records for one source.
///
/// Selected per source by `source_type`. The generic implementation is
/// selector driven; specialized ones may build their own request and use
/// hand-tuned matching, but must keep the "no title, no record" rule.
pub trait ExtractionStrategy: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Build the request for one page. Defaults to template substitution.
    fn request(
        &self,
        config: &SourceConfig,
        keyword: &str,
        page: u32,
        limit: usize,
    ) -> FetchRequest {
        FetchRequest::for_page(config, keyword, page, limit)
    }

    fn extract(&self, html: &str, config: &SourceConfig)
    -> Result<Vec<ExtractedRecord>, AppError>;
}

/// Converts raw HTML into clean Markdown text.
pub trait Cleaner: Send + Sync + Clone {
    fn clean(&self, html: &str) -> Result<String, AppError>;
}

/// Reply from a text-completion backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionOutput {
    pub content: String,
    pub tokens_used: u32,
}

/// A black-box LLM: prompt in, text out.
pub trait Completion: Send + Sync + Clone {
    fn complete(
        &self,
        prompt: &str,
    ) -> impl Future<Output = Result<CompletionOutput, AppError>> + Send;
}

/// Persistence consumed by collection jobs.
pub trait CollectionStore: Send + Sync + Clone + 'static {
    /// Look up one source. Sources that exist but cannot be parsed are
    /// reported as absent.
    fn get_source(
        &self,
        id: SourceId,
    ) -> impl Future<Output = Result<Option<SourceConfig>, AppError>> + Send;

    fn list_active_sources(
        &self,
    ) -> impl Future<Output = Result<Vec<SourceConfig>, AppError>> + Send;

    /// Persist records, returning how many were saved.
    fn save_records(
        &self,
        records: &[CollectedRecord],
    ) -> impl Future<Output = Result<usize, AppError>> + Send;
}

/// Outcome of enriching one saved record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeepOutcome {
    Completed {
        deep_content: String,
        analysis_result: String,
        tokens_used: u32,
    },
    Failed {
        error_message: String,
    },
}

/// Persistence consumed by deep collection.
pub trait DeepCollectionStore: Send + Sync + Clone + 'static {
    fn get_saved_record(
        &self,
        id: i64,
    ) -> impl Future<Output = Result<Option<SavedRecord>, AppError>> + Send;

    /// Insert or replace the deep-collection result for a saved record.
    /// A completed outcome also flags the saved record as deep-collected.
    fn save_deep_result(
        &self,
        record_id: i64,
        model: &str,
        outcome: &DeepOutcome,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// An in-memory [`CollectionStore`] for running jobs without a database
/// (e.g. sources loaded from a file). Saving only counts.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    sources: std::sync::Arc<Vec<SourceConfig>>,
}

impl MemoryStore {
    pub fn new(sources: Vec<SourceConfig>) -> Self {
        Self {
            sources: std::sync::Arc::new(sources),
        }
    }
}

impl CollectionStore for MemoryStore {
    async fn get_source(&self, id: SourceId) -> Result<Option<SourceConfig>, AppError> {
        Ok(self.sources.iter().find(|s| s.id == id).cloned())
    }

    async fn list_active_sources(&self) -> Result<Vec<SourceConfig>, AppError> {
        Ok(self
            .sources
            .iter()
            .filter(|s| s.is_active())
            .cloned()
            .collect())
    }

    async fn save_records(&self, records: &[CollectedRecord]) -> Result<usize, AppError> {
        Ok(records.len())
    }
}
