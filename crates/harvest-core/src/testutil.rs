//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::crawler::{Crawler, CrawlerFactory};
use crate::error::AppError;
use crate::models::{CollectedRecord, ExtractedRecord, SavedRecord};
use crate::orchestrator::{CollectionEvent, CollectionReporter};
use crate::request::FetchRequest;
use crate::source::{
    BodyEncoding, FieldSelectors, HttpMethod, Selectors, SourceConfig, SourceId, SourceStatus,
};
use crate::traits::{
    Cleaner, CollectionStore, Completion, CompletionOutput, DeepCollectionStore, DeepOutcome,
    ExtractionStrategy, Fetcher,
};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that returns configurable responses and records requests.
#[derive(Clone)]
pub struct MockFetcher {
    /// Queue of responses. Each call pops the first element.
    /// If empty, returns `fallback`.
    responses: Arc<Mutex<Vec<Result<String, AppError>>>>,
    fallback: Result<String, String>,
    delay: Duration,
    pub requests: Arc<Mutex<Vec<FetchRequest>>>,
}

impl MockFetcher {
    /// Returns `html` for every call.
    pub fn new(html: &str) -> Self {
        Self::build(Vec::new(), Ok(html.to_string()))
    }

    /// Fails once with `error`, then returns a default page.
    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    /// Pops `responses` in order, then returns a default page.
    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        Self::build(responses, Ok("<html><body>default</body></html>".to_string()))
    }

    /// Fails every call with a network error.
    pub fn unreachable() -> Self {
        Self::build(Vec::new(), Err("connection refused".to_string()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn build(responses: Vec<Result<String, AppError>>, fallback: Result<String, String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            fallback,
            delay: Duration::ZERO,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<String, AppError> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };
        match next {
            Some(response) => response,
            None => self.fallback.clone().map_err(AppError::NetworkError),
        }
    }
}

// ---------------------------------------------------------------------------
// StaticStrategy
// ---------------------------------------------------------------------------

enum StrategyMode {
    /// One record per non-empty line of the fetched body.
    Lines,
    Fixed(Vec<ExtractedRecord>),
    Failing(String),
    Panicking(String),
}

/// Extraction strategy with canned behaviour.
pub struct StaticStrategy {
    name: String,
    mode: StrategyMode,
}

impl StaticStrategy {
    pub fn lines() -> Self {
        Self::named("lines")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: StrategyMode::Lines,
        }
    }

    pub fn titles(titles: &[&str]) -> Self {
        Self::records(
            titles
                .iter()
                .map(|t| ExtractedRecord {
                    title: t.to_string(),
                    ..Default::default()
                })
                .collect(),
        )
    }

    pub fn records(records: Vec<ExtractedRecord>) -> Self {
        Self {
            name: "static".to_string(),
            mode: StrategyMode::Fixed(records),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            name: "failing".to_string(),
            mode: StrategyMode::Failing(message.to_string()),
        }
    }

    /// Panics inside `extract`, standing in for a buggy strategy.
    pub fn panicking(message: &str) -> Self {
        Self {
            name: "panicking".to_string(),
            mode: StrategyMode::Panicking(message.to_string()),
        }
    }
}

impl ExtractionStrategy for StaticStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, html: &str, config: &SourceConfig) -> Result<Vec<ExtractedRecord>, AppError> {
        match &self.mode {
            StrategyMode::Lines => Ok(html
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| ExtractedRecord {
                    title: line.to_string(),
                    source: config.name.clone(),
                    ..Default::default()
                })
                .collect()),
            StrategyMode::Fixed(records) => Ok(records.clone()),
            StrategyMode::Failing(message) => Err(AppError::ExtractionError(message.clone())),
            StrategyMode::Panicking(message) => panic!("{message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// MockCrawlerFactory
// ---------------------------------------------------------------------------

/// Crawler factory with a fetcher per source id; records every creation.
#[derive(Clone)]
pub struct MockCrawlerFactory {
    strategy: Arc<dyn ExtractionStrategy>,
    fetchers: HashMap<SourceId, MockFetcher>,
    create_errors: HashSet<SourceId>,
    pub created: Arc<Mutex<Vec<SourceId>>>,
}

impl MockCrawlerFactory {
    pub fn new() -> Self {
        Self {
            strategy: Arc::new(StaticStrategy::lines()),
            fetchers: HashMap::new(),
            create_errors: HashSet::new(),
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_fetcher(mut self, source_id: SourceId, fetcher: MockFetcher) -> Self {
        self.fetchers.insert(source_id, fetcher);
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn ExtractionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_create_error(mut self, source_id: SourceId) -> Self {
        self.create_errors.insert(source_id);
        self
    }
}

impl Default for MockCrawlerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlerFactory for MockCrawlerFactory {
    type Fetcher = MockFetcher;

    fn create(&self, config: SourceConfig) -> Result<Crawler<MockFetcher>, AppError> {
        if self.create_errors.contains(&config.id) {
            return Err(AppError::ConfigError(format!(
                "cannot build crawler for {}",
                config.name
            )));
        }
        self.created.lock().unwrap().push(config.id);
        let fetcher = self
            .fetchers
            .get(&config.id)
            .cloned()
            .unwrap_or_else(|| MockFetcher::new(""));
        Ok(Crawler::new(config, Arc::clone(&self.strategy), fetcher))
    }
}

// ---------------------------------------------------------------------------
// MockCleaner
// ---------------------------------------------------------------------------

/// Mock cleaner that applies a simple transformation.
#[derive(Clone)]
pub struct MockCleaner {
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockCleaner {
    /// Creates a cleaner that returns the input unchanged.
    pub fn passthrough() -> Self {
        Self {
            error: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates a cleaner that returns an error.
    pub fn with_error(error: AppError) -> Self {
        Self {
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl Cleaner for MockCleaner {
    fn clean(&self, html: &str) -> Result<String, AppError> {
        let mut err = self.error.lock().unwrap();
        if let Some(e) = err.take() {
            return Err(e);
        }
        Ok(html.to_string())
    }
}

// ---------------------------------------------------------------------------
// MockCompletion
// ---------------------------------------------------------------------------

/// Mock LLM that replies with fixed content and records prompts.
#[derive(Clone)]
pub struct MockCompletion {
    reply: CompletionOutput,
    error: Arc<Mutex<Option<AppError>>>,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl MockCompletion {
    pub fn new(content: &str, tokens_used: u32) -> Self {
        Self {
            reply: CompletionOutput {
                content: content.to_string(),
                tokens_used,
            },
            error: Arc::new(Mutex::new(None)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fails the first call with `error`, then replies with an empty object.
    pub fn with_error(error: AppError) -> Self {
        let mock = Self::new("{}", 0);
        *mock.error.lock().unwrap() = Some(error);
        mock
    }
}

impl Completion for MockCompletion {
    async fn complete(&self, prompt: &str) -> Result<CompletionOutput, AppError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(self.reply.clone())
    }
}

// ---------------------------------------------------------------------------
// MockCollectionStore
// ---------------------------------------------------------------------------

/// In-memory source/record store.
#[derive(Clone, Default)]
pub struct MockCollectionStore {
    sources: Vec<SourceConfig>,
    fail_lookups: bool,
    pub saved: Arc<Mutex<Vec<CollectedRecord>>>,
}

impl MockCollectionStore {
    pub fn with_sources(sources: Vec<SourceConfig>) -> Self {
        Self {
            sources,
            ..Default::default()
        }
    }

    /// Every source lookup fails with a database error.
    pub fn with_lookup_error() -> Self {
        Self {
            fail_lookups: true,
            ..Default::default()
        }
    }
}

impl CollectionStore for MockCollectionStore {
    async fn get_source(&self, id: SourceId) -> Result<Option<SourceConfig>, AppError> {
        if self.fail_lookups {
            return Err(AppError::DatabaseError("connection lost".into()));
        }
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
        self.saved.lock().unwrap().extend_from_slice(records);
        Ok(records.len())
    }
}

// ---------------------------------------------------------------------------
// MockDeepStore
// ---------------------------------------------------------------------------

/// In-memory saved records plus recorded deep-collection results.
#[derive(Clone, Default)]
pub struct MockDeepStore {
    records: Vec<SavedRecord>,
    /// `(record_id, model, outcome)` per save call.
    pub results: Arc<Mutex<Vec<(i64, String, DeepOutcome)>>>,
}

impl MockDeepStore {
    pub fn with_records(records: Vec<SavedRecord>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }
}

impl DeepCollectionStore for MockDeepStore {
    async fn get_saved_record(&self, id: i64) -> Result<Option<SavedRecord>, AppError> {
        Ok(self.records.iter().find(|r| r.id == id).cloned())
    }

    async fn save_deep_result(
        &self,
        record_id: i64,
        model: &str,
        outcome: &DeepOutcome,
    ) -> Result<(), AppError> {
        self.results
            .lock()
            .unwrap()
            .push((record_id, model.to_string(), outcome.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock collection reporter that records event labels.
#[derive(Clone, Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl CollectionReporter for MockReporter {
    fn report(&self, event: CollectionEvent<'_>) {
        let label = match &event {
            CollectionEvent::JobStarted { .. } => "JobStarted",
            CollectionEvent::SourceSkipped { .. } => "SourceSkipped",
            CollectionEvent::CrawlerCreated { .. } => "CrawlerCreated",
            CollectionEvent::CrawlerReused { .. } => "CrawlerReused",
            CollectionEvent::PageCollected { .. } => "PageCollected",
            CollectionEvent::RetryScheduled { .. } => "RetryScheduled",
            CollectionEvent::SourceFailed { .. } => "SourceFailed",
            CollectionEvent::JobStopRequested { .. } => "JobStopRequested",
            CollectionEvent::JobFinished { .. } => "JobFinished",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// An active GET source with container selectors.
pub fn make_test_source(id: SourceId, name: &str) -> SourceConfig {
    SourceConfig {
        id,
        name: name.to_string(),
        source_type: "custom".to_string(),
        url_template: "https://example.com/search?q={keyword}&page={page}".to_string(),
        method: HttpMethod::Get,
        headers: BTreeMap::new(),
        body_template: None,
        body_encoding: BodyEncoding::Form,
        selectors: Selectors::Container {
            container: "div.result".to_string(),
            fields: FieldSelectors {
                title: Some("h3".to_string()),
                url: Some("a".to_string()),
                summary: Some("p".to_string()),
                image: Some("img".to_string()),
            },
        },
        status: SourceStatus::Active,
    }
}

pub fn make_saved_record(id: i64) -> SavedRecord {
    SavedRecord {
        id,
        title: format!("Record {id}"),
        url: format!("https://example.com/{id}"),
        summary: "A summary".to_string(),
        source: "news".to_string(),
        image_url: String::new(),
        keyword: "rust".to_string(),
        source_type: "custom".to_string(),
        raw_data: "{}".to_string(),
        collected_at: Utc::now(),
        saved_at: Utc::now(),
        has_deep_collected: false,
    }
}
