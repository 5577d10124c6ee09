//! Runs keyword-driven collection jobs over many sources.
//!
//! One background task per job. Sources are processed sequentially in the
//! order the caller gave them, so a job's event order is deterministic.
//! Crawlers are pooled by source id for the orchestrator's lifetime.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::crawler::{Crawler, CrawlerFactory};
use crate::error::{AppError, CrawlError};
use crate::event::ResultQueueEvent;
use crate::job::{CollectionConfig, CollectionJob, JobSnapshot, JobStatus, StartCollection};
use crate::models::{CollectedRecord, ExtractedRecord, resolve_image};
use crate::source::{SourceConfig, SourceId};
use crate::stream::ResultStream;
use crate::traits::CollectionStore;

/// Lifecycle events emitted by the orchestrator for monitoring/logging.
#[derive(Debug, Clone)]
pub enum CollectionEvent<'a> {
    JobStarted {
        job: &'a CollectionJob,
    },
    SourceSkipped {
        job_id: &'a str,
        source_id: SourceId,
        reason: &'a str,
    },
    CrawlerCreated {
        source_id: SourceId,
        source_name: &'a str,
        strategy: &'a str,
    },
    CrawlerReused {
        source_id: SourceId,
        source_name: &'a str,
    },
    PageCollected {
        job_id: &'a str,
        source_name: &'a str,
        page: u32,
        records: usize,
    },
    RetryScheduled {
        job_id: &'a str,
        source_name: &'a str,
        page: u32,
        attempt: u32,
        error: &'a str,
    },
    SourceFailed {
        job_id: &'a str,
        source_name: &'a str,
        error: &'a str,
    },
    JobStopRequested {
        job_id: &'a str,
    },
    JobFinished {
        job_id: &'a str,
        status: JobStatus,
    },
}

/// Receives orchestrator events (decoupled logging).
pub trait CollectionReporter: Send + Sync + 'static {
    fn report(&self, event: CollectionEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCollectionReporter;

impl CollectionReporter for TracingCollectionReporter {
    fn report(&self, event: CollectionEvent<'_>) {
        match event {
            CollectionEvent::JobStarted { job } => {
                tracing::info!(
                    job_id = %job.id,
                    keyword = %job.keyword,
                    sources = ?job.source_ids,
                    page = job.page,
                    pages = job.pages,
                    limit = job.limit,
                    "Collection started"
                );
            }
            CollectionEvent::SourceSkipped {
                job_id,
                source_id,
                reason,
            } => {
                tracing::info!(%job_id, source_id, %reason, "Source skipped");
            }
            CollectionEvent::CrawlerCreated {
                source_id,
                source_name,
                strategy,
            } => {
                tracing::info!(source_id, source = %source_name, %strategy, "Crawler created");
            }
            CollectionEvent::CrawlerReused {
                source_id,
                source_name,
            } => {
                tracing::debug!(source_id, source = %source_name, "Crawler reused from pool");
            }
            CollectionEvent::PageCollected {
                job_id,
                source_name,
                page,
                records,
            } => {
                tracing::info!(%job_id, source = %source_name, page, records, "Page collected");
            }
            CollectionEvent::RetryScheduled {
                job_id,
                source_name,
                page,
                attempt,
                error,
            } => {
                tracing::warn!(%job_id, source = %source_name, page, attempt, %error, "Retrying page");
            }
            CollectionEvent::SourceFailed {
                job_id,
                source_name,
                error,
            } => {
                tracing::warn!(%job_id, source = %source_name, %error, "Source failed");
            }
            CollectionEvent::JobStopRequested { job_id } => {
                tracing::info!(%job_id, "Stop requested");
            }
            CollectionEvent::JobFinished { job_id, status } => {
                tracing::info!(%job_id, %status, "Collection finished");
            }
        }
    }
}

/// Owns the crawler pool and the job registry.
///
/// Cheap to clone; clones share state. Construct one per process and hand
/// it to whoever needs to start or observe jobs.
pub struct CollectionOrchestrator<S, CF, R = TracingCollectionReporter>
where
    S: CollectionStore,
    CF: CrawlerFactory,
    R: CollectionReporter,
{
    inner: Arc<Inner<S, CF, R>>,
}

impl<S, CF, R> Clone for CollectionOrchestrator<S, CF, R>
where
    S: CollectionStore,
    CF: CrawlerFactory,
    R: CollectionReporter,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S, CF: CrawlerFactory, R> {
    store: S,
    factory: CF,
    reporter: R,
    config: CollectionConfig,
    pool: Mutex<HashMap<SourceId, Arc<Crawler<CF::Fetcher>>>>,
    jobs: Mutex<HashMap<String, JobEntry>>,
    shutdown: CancellationToken,
}

struct JobEntry {
    keyword: String,
    started_at: chrono::DateTime<Utc>,
    status: JobStatus,
    cancel: CancellationToken,
    receiver: Option<mpsc::UnboundedReceiver<ResultQueueEvent>>,
    finished_at: Option<Instant>,
}

/// Producer side of a job's queue. Terminal events can only be sent by
/// consuming the sink, so at most one is ever produced.
struct JobSink {
    job_id: String,
    sender: mpsc::UnboundedSender<ResultQueueEvent>,
}

impl JobSink {
    fn record(&self, record: CollectedRecord) {
        self.push(ResultQueueEvent::Record(record));
    }

    fn source_error(&self, source_name: &str, error: &str) {
        self.push(ResultQueueEvent::source_error(
            &self.job_id,
            source_name,
            error,
        ));
    }

    fn complete(self) {
        self.push(ResultQueueEvent::completed(&self.job_id));
    }

    fn fail(self, error: &str) {
        self.push(ResultQueueEvent::fatal(&self.job_id, error));
    }

    fn push(&self, event: ResultQueueEvent) {
        // A closed receiver only means nobody is listening any more.
        let _ = self.sender.send(event);
    }
}

impl<S, CF> CollectionOrchestrator<S, CF, TracingCollectionReporter>
where
    S: CollectionStore,
    CF: CrawlerFactory,
{
    pub fn new(store: S, factory: CF, config: CollectionConfig) -> Self {
        Self::with_reporter(store, factory, config, TracingCollectionReporter)
    }
}

impl<S, CF, R> CollectionOrchestrator<S, CF, R>
where
    S: CollectionStore,
    CF: CrawlerFactory,
    R: CollectionReporter,
{
    pub fn with_reporter(store: S, factory: CF, config: CollectionConfig, reporter: R) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                factory,
                reporter,
                config,
                pool: Mutex::new(HashMap::new()),
                jobs: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register a job and schedule it in the background. Returns its id
    /// immediately. Must be called from within a Tokio runtime.
    pub fn start_job(&self, request: StartCollection) -> Result<String, AppError> {
        request.validate()?;
        if self.inner.shutdown.is_cancelled() {
            return Err(AppError::Generic("orchestrator is shut down".into()));
        }

        let job_id = Uuid::now_v7().to_string();
        let job = CollectionJob::new(job_id.clone(), request);
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = self.inner.shutdown.child_token();

        {
            let mut jobs = self.inner.lock_jobs();
            self.inner.evict_expired(&mut jobs);
            jobs.insert(
                job_id.clone(),
                JobEntry {
                    keyword: job.keyword.clone(),
                    started_at: job.started_at,
                    status: JobStatus::Pending,
                    cancel: cancel.clone(),
                    receiver: Some(receiver),
                    finished_at: None,
                },
            );
        }

        let sink = JobSink {
            job_id: job_id.clone(),
            sender,
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run_job(job, sink, cancel).await });

        Ok(job_id)
    }

    /// Attach to a job's result stream. A stream can be attached once.
    pub fn stream_results(&self, job_id: &str) -> Result<ResultStream, AppError> {
        let receiver = self
            .inner
            .lock_jobs()
            .get_mut(job_id)
            .and_then(|entry| entry.receiver.take())
            .ok_or_else(|| {
                AppError::NotFound(format!("No attachable stream for collection job {job_id}"))
            })?;

        Ok(ResultStream::new(
            job_id,
            receiver,
            self.inner.config.stream_poll_interval,
        ))
    }

    /// Ask a job to stop. Cooperative: in-flight fetches finish, and the
    /// worker exits at the next page boundary. Returns false if the job is
    /// unknown or already finished.
    pub fn stop_job(&self, job_id: &str) -> bool {
        let mut jobs = self.inner.lock_jobs();
        let Some(entry) = jobs.get_mut(job_id) else {
            return false;
        };
        if entry.status.is_terminal() {
            return false;
        }

        entry.status = JobStatus::Stopped;
        entry.cancel.cancel();
        drop(jobs);

        self.inner
            .reporter
            .report(CollectionEvent::JobStopRequested { job_id });
        true
    }

    pub fn job_status(&self, job_id: &str) -> Option<JobSnapshot> {
        self.inner
            .lock_jobs()
            .get(job_id)
            .map(|entry| JobSnapshot {
                job_id: job_id.to_string(),
                status: entry.status,
                keyword: entry.keyword.clone(),
                started_at: entry.started_at,
            })
    }

    /// Persist a caller-selected subset of streamed records.
    pub async fn save_records(&self, records: &[CollectedRecord]) -> Result<usize, AppError> {
        if records.is_empty() {
            return Ok(0);
        }
        let saved = self.inner.store.save_records(records).await?;
        tracing::info!(requested = records.len(), saved, "Records saved");
        Ok(saved)
    }

    pub async fn list_active_sources(&self) -> Result<Vec<SourceConfig>, AppError> {
        self.inner.store.list_active_sources().await
    }

    /// Number of pooled crawlers.
    pub fn pool_size(&self) -> usize {
        self.inner
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop every running job and close all pooled crawlers.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let crawlers: Vec<_> = self
            .inner
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, crawler)| crawler)
            .collect();
        for crawler in &crawlers {
            crawler.close();
        }
        tracing::info!(closed = crawlers.len(), "Collection orchestrator shut down");
    }
}

impl<S, CF, R> Inner<S, CF, R>
where
    S: CollectionStore,
    CF: CrawlerFactory,
    R: CollectionReporter,
{
    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evict_expired(&self, jobs: &mut HashMap<String, JobEntry>) {
        let ttl = self.config.job_ttl;
        jobs.retain(|_, entry| {
            entry
                .finished_at
                .is_none_or(|finished| finished.elapsed() < ttl)
        });
    }

    fn set_status(&self, job_id: &str, status: JobStatus) {
        if let Some(entry) = self.lock_jobs().get_mut(job_id) {
            // A stop request wins over the worker's own transition to running.
            if entry.status != JobStatus::Stopped || status.is_terminal() {
                entry.status = status;
            }
            if status.is_terminal() {
                entry.finished_at = Some(Instant::now());
            }
        }
    }

    async fn run_job(self: Arc<Self>, job: CollectionJob, sink: JobSink, cancel: CancellationToken) {
        self.set_status(&job.id, JobStatus::Running);
        self.reporter.report(CollectionEvent::JobStarted { job: &job });

        let outcome = AssertUnwindSafe(self.collect(&job, &sink, &cancel))
            .catch_unwind()
            .await;
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!(
                "collection worker panicked: {}",
                panic_message(panic.as_ref())
            )),
        };

        let status = match &error {
            Some(_) => JobStatus::Failed,
            None if cancel.is_cancelled() => JobStatus::Stopped,
            None => JobStatus::Completed,
        };
        self.set_status(&job.id, status);
        self.reporter.report(CollectionEvent::JobFinished {
            job_id: &job.id,
            status,
        });

        match error {
            Some(error) => {
                tracing::error!(job_id = %job.id, %error, "Collection job failed");
                sink.fail(&error);
            }
            None => sink.complete(),
        }
    }

    /// Errors returned from here are job-level; per-source failures are
    /// reported on the sink and never escape.
    async fn collect(
        &self,
        job: &CollectionJob,
        sink: &JobSink,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        for &source_id in &job.source_ids {
            if cancel.is_cancelled() {
                break;
            }

            let config = match self.store.get_source(source_id).await? {
                Some(config) if config.is_active() => config,
                Some(_) => {
                    self.skip(job, source_id, "inactive");
                    continue;
                }
                None => {
                    self.skip(job, source_id, "not found");
                    continue;
                }
            };

            let crawler = match self.crawler_for(config.clone()) {
                Ok(crawler) => crawler,
                Err(e) => {
                    self.source_failed(job, sink, &config.name, &e.to_string());
                    continue;
                }
            };

            for page in job.page_range() {
                if cancel.is_cancelled() {
                    break;
                }
                match self.crawl_page(&crawler, job, page, cancel).await {
                    Ok(records) => {
                        let count = records.len();
                        for record in records {
                            sink.record(tag_record(job, &config, record));
                        }
                        self.reporter.report(CollectionEvent::PageCollected {
                            job_id: &job.id,
                            source_name: &config.name,
                            page,
                            records: count,
                        });
                    }
                    Err(e) => {
                        // Remaining pages of this source are abandoned.
                        self.source_failed(job, sink, &config.name, &e.cause.to_string());
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn crawl_page(
        &self,
        crawler: &Crawler<CF::Fetcher>,
        job: &CollectionJob,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtractedRecord>, CrawlError> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            match crawler.crawl(&job.keyword, page, job.limit).await {
                Ok(records) => return Ok(records),
                Err(e) if retry.should_retry(attempt, &e.cause) && !cancel.is_cancelled() => {
                    attempt += 1;
                    self.reporter.report(CollectionEvent::RetryScheduled {
                        job_id: &job.id,
                        source_name: &e.source_name,
                        page,
                        attempt,
                        error: &e.cause.to_string(),
                    });
                    tokio::select! {
                        () = tokio::time::sleep(retry.backoff) => {}
                        () = cancel.cancelled() => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Pooled crawler for `config.id`, created on first use.
    fn crawler_for(&self, config: SourceConfig) -> Result<Arc<Crawler<CF::Fetcher>>, AppError> {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(crawler) = pool.get(&config.id) {
            self.reporter.report(CollectionEvent::CrawlerReused {
                source_id: config.id,
                source_name: &config.name,
            });
            return Ok(Arc::clone(crawler));
        }

        let source_id = config.id;
        let crawler = Arc::new(self.factory.create(config)?);
        self.reporter.report(CollectionEvent::CrawlerCreated {
            source_id,
            source_name: &crawler.config().name,
            strategy: crawler.strategy_name(),
        });
        pool.insert(source_id, Arc::clone(&crawler));
        Ok(crawler)
    }

    fn skip(&self, job: &CollectionJob, source_id: SourceId, reason: &str) {
        self.reporter.report(CollectionEvent::SourceSkipped {
            job_id: &job.id,
            source_id,
            reason,
        });
    }

    fn source_failed(&self, job: &CollectionJob, sink: &JobSink, source_name: &str, error: &str) {
        self.reporter.report(CollectionEvent::SourceFailed {
            job_id: &job.id,
            source_name,
            error,
        });
        sink.source_error(source_name, error);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn tag_record(job: &CollectionJob, config: &SourceConfig, record: ExtractedRecord) -> CollectedRecord {
    let image = resolve_image(&record);
    let raw_data = serde_json::to_string(&record).unwrap_or_default();
    CollectedRecord {
        job_id: job.id.clone(),
        title: record.title,
        url: record.url,
        summary: record.summary,
        image,
        source: record.source,
        keyword: job.keyword.clone(),
        source_type: config.source_type.clone(),
        source_name: config.name.clone(),
        collected_at: Utc::now(),
        raw_data,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::job::RetryPolicy;
    use crate::source::SourceStatus;
    use crate::testutil::*;

    type TestOrchestrator = CollectionOrchestrator<MockCollectionStore, MockCrawlerFactory, MockReporter>;

    fn orchestrator(
        store: MockCollectionStore,
        factory: MockCrawlerFactory,
    ) -> (TestOrchestrator, MockReporter) {
        let reporter = MockReporter::new();
        let config = CollectionConfig::default().with_stream_poll_interval(Duration::from_millis(20));
        (
            CollectionOrchestrator::with_reporter(store, factory, config, reporter.clone()),
            reporter,
        )
    }

    fn two_sources() -> MockCollectionStore {
        MockCollectionStore::with_sources(vec![
            make_test_source(1, "alpha"),
            make_test_source(2, "beta"),
        ])
    }

    async fn run(orchestrator: &TestOrchestrator, request: StartCollection) -> Vec<ResultQueueEvent> {
        let job_id = orchestrator.start_job(request).unwrap();
        orchestrator
            .stream_results(&job_id)
            .unwrap()
            .collect_all()
            .await
    }

    fn titles(events: &[ResultQueueEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                ResultQueueEvent::Record(r) => Some(format!("{}:{}", r.source_name, r.title)),
                _ => None,
            })
            .collect()
    }

    fn assert_single_terminal_last(events: &[ResultQueueEvent]) {
        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1, "events: {events:?}");
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_records_stream_in_source_order_then_completed() {
        let factory = MockCrawlerFactory::new()
            .with_fetcher(1, MockFetcher::new("a1\na2"))
            .with_fetcher(2, MockFetcher::new("b1"));
        let (orchestrator, _) = orchestrator(two_sources(), factory);

        let events = run(&orchestrator, StartCollection::new("rust", vec![1, 2])).await;

        assert_eq!(titles(&events), ["alpha:a1", "alpha:a2", "beta:b1"]);
        assert!(matches!(events.last(), Some(ResultQueueEvent::Completed { .. })));
        assert_single_terminal_last(&events);
    }

    #[tokio::test]
    async fn test_failing_source_is_isolated() {
        let factory = MockCrawlerFactory::new()
            .with_fetcher(1, MockFetcher::new("a1"))
            .with_fetcher(2, MockFetcher::unreachable())
            .with_fetcher(3, MockFetcher::new("c1"));
        let store = MockCollectionStore::with_sources(vec![
            make_test_source(1, "alpha"),
            make_test_source(2, "beta"),
            make_test_source(3, "gamma"),
        ]);
        let (orchestrator, _) = orchestrator(store, factory);

        let events = run(&orchestrator, StartCollection::new("rust", vec![1, 2, 3])).await;

        let errors: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ResultQueueEvent::Error {
                    source_name,
                    fatal: false,
                    ..
                } => source_name.clone(),
                _ => None,
            })
            .collect();
        assert_eq!(errors, ["beta"]);
        assert_eq!(titles(&events), ["alpha:a1", "gamma:c1"]);
        assert!(matches!(events.last(), Some(ResultQueueEvent::Completed { .. })));
        assert_single_terminal_last(&events);
    }

    #[tokio::test]
    async fn test_missing_and_inactive_sources_are_skipped_silently() {
        let mut inactive = make_test_source(2, "beta");
        inactive.status = SourceStatus::Inactive;
        let store = MockCollectionStore::with_sources(vec![make_test_source(1, "alpha"), inactive]);
        let factory = MockCrawlerFactory::new().with_fetcher(1, MockFetcher::new("a1"));
        let (orchestrator, reporter) = orchestrator(store, factory);

        let events = run(&orchestrator, StartCollection::new("rust", vec![2, 99, 1])).await;

        assert_eq!(events.len(), 2);
        assert_eq!(titles(&events), ["alpha:a1"]);
        let labels = reporter.labels();
        assert_eq!(labels.iter().filter(|l| *l == "SourceSkipped").count(), 2);
    }

    #[tokio::test]
    async fn test_pages_are_crawled_in_range() {
        let fetcher = MockFetcher::new("x");
        let factory = MockCrawlerFactory::new().with_fetcher(1, fetcher.clone());
        let store = MockCollectionStore::with_sources(vec![make_test_source(1, "alpha")]);
        let (orchestrator, _) = orchestrator(store, factory);

        run(
            &orchestrator,
            StartCollection::new("rust", vec![1]).with_page(2).with_pages(3),
        )
        .await;

        let urls: Vec<_> = fetcher
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect();
        assert_eq!(
            urls,
            [
                "https://example.com/search?q=rust&page=2",
                "https://example.com/search?q=rust&page=3",
                "https://example.com/search?q=rust&page=4",
            ]
        );
    }

    #[tokio::test]
    async fn test_limit_caps_each_page() {
        let factory = MockCrawlerFactory::new().with_fetcher(1, MockFetcher::new("1\n2\n3\n4\n5"));
        let store = MockCollectionStore::with_sources(vec![make_test_source(1, "alpha")]);
        let (orchestrator, _) = orchestrator(store, factory);

        let events = run(
            &orchestrator,
            StartCollection::new("rust", vec![1]).with_pages(2).with_limit(2),
        )
        .await;

        assert_eq!(titles(&events), ["alpha:1", "alpha:2", "alpha:1", "alpha:2"]);
    }

    #[tokio::test]
    async fn test_crawler_is_pooled_across_jobs() {
        let factory = MockCrawlerFactory::new().with_fetcher(1, MockFetcher::new("a1"));
        let store = MockCollectionStore::with_sources(vec![make_test_source(1, "alpha")]);
        let (orchestrator, reporter) = orchestrator(store, factory.clone());

        run(&orchestrator, StartCollection::new("rust", vec![1]).with_pages(2)).await;
        run(&orchestrator, StartCollection::new("tokio", vec![1])).await;

        assert_eq!(*factory.created.lock().unwrap(), vec![1]);
        assert_eq!(orchestrator.pool_size(), 1);
        assert!(reporter.labels().contains(&"CrawlerReused".to_string()));
    }

    #[tokio::test]
    async fn test_factory_error_is_a_source_error() {
        let factory = MockCrawlerFactory::new()
            .with_create_error(1)
            .with_fetcher(2, MockFetcher::new("b1"));
        let (orchestrator, _) = orchestrator(two_sources(), factory);

        let events = run(&orchestrator, StartCollection::new("rust", vec![1, 2])).await;

        assert!(matches!(
            &events[0],
            ResultQueueEvent::Error { source_name: Some(name), fatal: false, .. } if name == "alpha"
        ));
        assert_eq!(titles(&events), ["beta:b1"]);
        assert_single_terminal_last(&events);
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal() {
        let factory = MockCrawlerFactory::new();
        let (orchestrator, _) = orchestrator(MockCollectionStore::with_lookup_error(), factory);

        let job_id = orchestrator
            .start_job(StartCollection::new("rust", vec![1]))
            .unwrap();
        let events = orchestrator
            .stream_results(&job_id)
            .unwrap()
            .collect_all()
            .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ResultQueueEvent::Error { fatal: true, .. }));
        assert_eq!(
            orchestrator.job_status(&job_id).unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_panicking_strategy_fails_the_job() {
        let factory = MockCrawlerFactory::new()
            .with_strategy(std::sync::Arc::new(StaticStrategy::panicking("selector bug")))
            .with_fetcher(1, MockFetcher::new("a1"));
        let store = MockCollectionStore::with_sources(vec![make_test_source(1, "alpha")]);
        let (orchestrator, reporter) = orchestrator(store, factory);

        let job_id = orchestrator
            .start_job(StartCollection::new("rust", vec![1]))
            .unwrap();
        let events = orchestrator
            .stream_results(&job_id)
            .unwrap()
            .collect_all()
            .await;

        assert_eq!(events.len(), 1);
        let ResultQueueEvent::Error { error, fatal: true, .. } = &events[0] else {
            panic!("expected a fatal error, got {:?}", events[0]);
        };
        assert!(error.contains("selector bug"), "error: {error}");
        assert_eq!(
            orchestrator.job_status(&job_id).unwrap().status,
            JobStatus::Failed
        );
        assert!(!orchestrator.stop_job(&job_id));
        assert!(reporter.labels().contains(&"JobFinished".to_string()));
    }

    #[tokio::test]
    async fn test_jobs_do_not_share_events() {
        let factory = MockCrawlerFactory::new()
            .with_fetcher(1, MockFetcher::new("a1"))
            .with_fetcher(2, MockFetcher::new("b1"));
        let (orchestrator, _) = orchestrator(two_sources(), factory);

        let first = orchestrator
            .start_job(StartCollection::new("rust", vec![1]))
            .unwrap();
        let second = orchestrator
            .start_job(StartCollection::new("tokio", vec![2]))
            .unwrap();
        assert_ne!(first, second);

        let first_events = orchestrator.stream_results(&first).unwrap().collect_all().await;
        let second_events = orchestrator.stream_results(&second).unwrap().collect_all().await;

        assert_eq!(titles(&first_events), ["alpha:a1"]);
        assert_eq!(titles(&second_events), ["beta:b1"]);
        for event in first_events {
            if let ResultQueueEvent::Record(record) = event {
                assert_eq!(record.job_id, first);
                assert_eq!(record.keyword, "rust");
            }
        }
    }

    #[tokio::test]
    async fn test_stream_attaches_once() {
        let factory = MockCrawlerFactory::new();
        let (orchestrator, _) = orchestrator(two_sources(), factory);

        let job_id = orchestrator
            .start_job(StartCollection::new("rust", vec![]))
            .unwrap();
        assert!(orchestrator.stream_results(&job_id).is_ok());
        assert!(matches!(
            orchestrator.stream_results(&job_id),
            Err(AppError::NotFound(_))
        ));
        assert!(orchestrator.stream_results("unknown").is_err());
    }

    #[tokio::test]
    async fn test_stop_marks_status_and_ends_stream() {
        let factory = MockCrawlerFactory::new().with_fetcher(1, MockFetcher::new("a1").with_delay(Duration::from_millis(50)));
        let store = MockCollectionStore::with_sources(vec![make_test_source(1, "alpha")]);
        let (orchestrator, _) = orchestrator(store, factory);

        let job_id = orchestrator
            .start_job(StartCollection::new("rust", vec![1]).with_pages(100))
            .unwrap();
        let stream = orchestrator.stream_results(&job_id).unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(orchestrator.stop_job(&job_id));
        assert_eq!(
            orchestrator.job_status(&job_id).unwrap().status,
            JobStatus::Stopped
        );

        let events = stream.collect_all().await;
        assert!(titles(&events).len() < 100);
        assert!(matches!(events.last(), Some(ResultQueueEvent::Completed { .. })));
        assert_single_terminal_last(&events);
        assert_eq!(
            orchestrator.job_status(&job_id).unwrap().status,
            JobStatus::Stopped
        );
        assert!(!orchestrator.stop_job(&job_id));
    }

    #[tokio::test]
    async fn test_stop_unknown_job_is_false() {
        let (orchestrator, _) = orchestrator(two_sources(), MockCrawlerFactory::new());
        assert!(!orchestrator.stop_job("nope"));
    }

    #[tokio::test]
    async fn test_status_becomes_completed() {
        let factory = MockCrawlerFactory::new().with_fetcher(1, MockFetcher::new("a1"));
        let (orchestrator, _) = orchestrator(two_sources(), factory);

        let job_id = orchestrator
            .start_job(StartCollection::new("rust", vec![1]))
            .unwrap();
        let snapshot = orchestrator.job_status(&job_id).unwrap();
        assert_eq!(snapshot.keyword, "rust");
        assert!(!snapshot.status.is_terminal());

        orchestrator.stream_results(&job_id).unwrap().collect_all().await;
        assert_eq!(
            orchestrator.job_status(&job_id).unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failure() {
        let fetcher = MockFetcher::with_responses(vec![
            Err(AppError::Timeout(10)),
            Ok("a1".to_string()),
        ]);
        let factory = MockCrawlerFactory::new().with_fetcher(1, fetcher.clone());
        let store = MockCollectionStore::with_sources(vec![make_test_source(1, "alpha")]);
        let reporter = MockReporter::new();
        let config = CollectionConfig::default()
            .with_stream_poll_interval(Duration::from_millis(20))
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1)));
        let orchestrator =
            CollectionOrchestrator::with_reporter(store, factory, config, reporter.clone());

        let events = run(&orchestrator, StartCollection::new("rust", vec![1])).await;

        assert_eq!(titles(&events), ["alpha:a1"]);
        assert_eq!(fetcher.requests.lock().unwrap().len(), 2);
        assert!(reporter.labels().contains(&"RetryScheduled".to_string()));
    }

    #[tokio::test]
    async fn test_no_retry_by_default() {
        let fetcher = MockFetcher::with_responses(vec![
            Err(AppError::Timeout(10)),
            Ok("a1".to_string()),
        ]);
        let factory = MockCrawlerFactory::new().with_fetcher(1, fetcher.clone());
        let store = MockCollectionStore::with_sources(vec![make_test_source(1, "alpha")]);
        let (orchestrator, _) = orchestrator(store, factory);

        let events = run(&orchestrator, StartCollection::new("rust", vec![1]).with_pages(2)).await;

        assert!(titles(&events).is_empty());
        assert_eq!(fetcher.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_image_falls_back_to_summary() {
        let factory = MockCrawlerFactory::new()
            .with_strategy(std::sync::Arc::new(StaticStrategy::records(vec![ExtractedRecord {
                title: "t".into(),
                summary: "see https://img.example.com/a.png now".into(),
                source: "alpha".into(),
                ..Default::default()
            }])))
            .with_fetcher(1, MockFetcher::new(""));
        let store = MockCollectionStore::with_sources(vec![make_test_source(1, "alpha")]);
        let (orchestrator, _) = orchestrator(store, factory);

        let events = run(&orchestrator, StartCollection::new("rust", vec![1])).await;

        let ResultQueueEvent::Record(record) = &events[0] else {
            panic!("expected a record, got {:?}", events[0]);
        };
        assert_eq!(record.image, "https://img.example.com/a.png");
        assert_eq!(record.source_type, "custom");
        let raw: ExtractedRecord = serde_json::from_str(&record.raw_data).unwrap();
        assert_eq!(raw.title, "t");
        assert!(raw.image.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let (orchestrator, _) = orchestrator(two_sources(), MockCrawlerFactory::new());
        let err = orchestrator
            .start_job(StartCollection::new("rust", vec![1]).with_limit(0))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_save_records_delegates_to_store() {
        let store = two_sources();
        let (orchestrator, _) = orchestrator(store.clone(), MockCrawlerFactory::new());

        assert_eq!(orchestrator.save_records(&[]).await.unwrap(), 0);
        let record: CollectedRecord = serde_json::from_str(r#"{"title": "kept"}"#).unwrap();
        assert_eq!(orchestrator.save_records(&[record]).await.unwrap(), 1);
        assert_eq!(store.saved.lock().unwrap()[0].title, "kept");
    }

    #[tokio::test]
    async fn test_shutdown_closes_pooled_crawlers() {
        let factory = MockCrawlerFactory::new().with_fetcher(1, MockFetcher::new("a1"));
        let store = MockCollectionStore::with_sources(vec![make_test_source(1, "alpha")]);
        let (orchestrator, _) = orchestrator(store, factory);

        run(&orchestrator, StartCollection::new("rust", vec![1])).await;
        assert_eq!(orchestrator.pool_size(), 1);

        orchestrator.shutdown();
        assert_eq!(orchestrator.pool_size(), 0);
        assert!(
            orchestrator
                .start_job(StartCollection::new("rust", vec![1]))
                .is_err()
        );
    }
}
