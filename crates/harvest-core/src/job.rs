use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::source::SourceId;

/// Status of a collection job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Stopped => "stopped",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Stopped | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "stopped" => Ok(JobStatus::Stopped),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Retry policy for a single (source, page) crawl.
///
/// Disabled by default. Only errors for which
/// [`AppError::is_retryable`] holds are retried, with a fixed backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }

    /// Whether a failure on attempt `attempt` (0-indexed) should be retried.
    pub fn should_retry(&self, attempt: u32, error: &AppError) -> bool {
        attempt < self.max_retries && error.is_retryable()
    }
}

/// Tuning for the collection orchestrator.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Bounded wait of a stream consumer before it re-checks cancellation.
    pub stream_poll_interval: Duration,
    /// How long a finished job stays queryable before eviction.
    pub job_ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            stream_poll_interval: Duration::from_secs(1),
            job_ttl: Duration::from_secs(600),
            retry: RetryPolicy::default(),
        }
    }
}

impl CollectionConfig {
    pub fn with_stream_poll_interval(mut self, interval: Duration) -> Self {
        self.stream_poll_interval = interval;
        self
    }

    pub fn with_job_ttl(mut self, ttl: Duration) -> Self {
        self.job_ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Request to start a collection job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartCollection {
    pub keyword: String,
    pub source_ids: Vec<SourceId>,
    pub page: u32,
    pub pages: u32,
    pub limit: usize,
}

impl StartCollection {
    /// Defaults: first page, one page, ten records per page.
    pub fn new(keyword: impl Into<String>, source_ids: Vec<SourceId>) -> Self {
        Self {
            keyword: keyword.into(),
            source_ids,
            page: 1,
            pages: 1,
            limit: 10,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn with_pages(mut self, pages: u32) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.keyword.trim().is_empty() {
            return Err(AppError::InvalidInput("keyword must not be empty".into()));
        }
        if self.page == 0 || self.pages == 0 {
            return Err(AppError::InvalidInput(
                "page and pages must be at least 1".into(),
            ));
        }
        if self.limit == 0 {
            return Err(AppError::InvalidInput("limit must be at least 1".into()));
        }
        Ok(())
    }
}

/// A running or finished collection job. Never persisted.
#[derive(Debug, Clone)]
pub struct CollectionJob {
    pub id: String,
    pub keyword: String,
    /// Ordered, de-duplicated.
    pub source_ids: Vec<SourceId>,
    pub page: u32,
    pub pages: u32,
    pub limit: usize,
    pub started_at: DateTime<Utc>,
}

impl CollectionJob {
    pub fn new(id: impl Into<String>, request: StartCollection) -> Self {
        let mut source_ids = Vec::with_capacity(request.source_ids.len());
        for id in request.source_ids {
            if !source_ids.contains(&id) {
                source_ids.push(id);
            }
        }

        Self {
            id: id.into(),
            keyword: request.keyword,
            source_ids,
            page: request.page,
            pages: request.pages,
            limit: request.limit,
            started_at: Utc::now(),
        }
    }

    /// Pages to crawl, in order.
    pub fn page_range(&self) -> std::ops::Range<u32> {
        self.page..self.page.saturating_add(self.pages)
    }
}

/// Point-in-time view of a job for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub keyword: String,
    pub started_at: DateTime<Utc>,
}
