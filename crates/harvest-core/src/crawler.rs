//! The unit of work bound to one source: fetch, then extract.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{AppError, CrawlError};
use crate::models::ExtractedRecord;
use crate::source::SourceConfig;
use crate::traits::{ExtractionStrategy, Fetcher};

/// A fetcher and an extraction strategy composed over one [`SourceConfig`].
///
/// Crawlers are pooled by the orchestrator and shared across jobs, so all
/// methods take `&self`. After [`close`](Self::close) every crawl fails.
pub struct Crawler<F: Fetcher> {
    config: SourceConfig,
    strategy: Arc<dyn ExtractionStrategy>,
    fetcher: RwLock<Option<F>>,
}

impl<F: Fetcher> Crawler<F> {
    pub fn new(config: SourceConfig, strategy: Arc<dyn ExtractionStrategy>, fetcher: F) -> Self {
        Self {
            config,
            strategy,
            fetcher: RwLock::new(Some(fetcher)),
        }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Fetch and extract one page, keeping at most `limit` records.
    pub async fn crawl(
        &self,
        keyword: &str,
        page: u32,
        limit: usize,
    ) -> Result<Vec<ExtractedRecord>, CrawlError> {
        let fetcher = self
            .fetcher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                self.fail(AppError::Generic("crawler has been closed".to_string()))
            })?;

        let request = self.strategy.request(&self.config, keyword, page, limit);
        tracing::info!(
            source = %self.config.name,
            method = %request.method,
            url = %request.url,
            "Crawling page {page}"
        );

        let html = fetcher.fetch(&request).await.map_err(|e| self.fail(e))?;
        let mut records = self
            .strategy
            .extract(&html, &self.config)
            .map_err(|e| self.fail(e))?;

        if records.len() > limit {
            records.truncate(limit);
        }

        tracing::info!(
            source = %self.config.name,
            page,
            records = records.len(),
            "Crawl complete"
        );
        Ok(records)
    }

    /// Drop the underlying HTTP session. Safe to call repeatedly.
    pub fn close(&self) {
        let previous = self
            .fetcher
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            tracing::debug!(source = %self.config.name, "Crawler closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.fetcher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn fail(&self, cause: AppError) -> CrawlError {
        CrawlError::new(self.config.name.clone(), cause)
    }
}

/// Builds crawlers for sources. The orchestrator calls this once per
/// source id and pools the result.
pub trait CrawlerFactory: Send + Sync + 'static {
    type Fetcher: Fetcher + 'static;

    fn create(&self, config: SourceConfig) -> Result<Crawler<Self::Fetcher>, AppError>;
}

/// Maps `source_type` to an extraction strategy, falling back to a default.
///
/// New source types are added with [`register`](Self::register); callers
/// of [`resolve`](Self::resolve) never change.
#[derive(Clone)]
pub struct StrategyRegistry {
    default: Arc<dyn ExtractionStrategy>,
    by_type: HashMap<String, Arc<dyn ExtractionStrategy>>,
}

impl StrategyRegistry {
    pub fn new(default: Arc<dyn ExtractionStrategy>) -> Self {
        Self {
            default,
            by_type: HashMap::new(),
        }
    }

    pub fn register(
        mut self,
        source_type: impl Into<String>,
        strategy: Arc<dyn ExtractionStrategy>,
    ) -> Self {
        self.by_type
            .insert(source_type.into().to_lowercase(), strategy);
        self
    }

    pub fn resolve(&self, source_type: &str) -> Arc<dyn ExtractionStrategy> {
        self.by_type
            .get(&source_type.to_lowercase())
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}
