use thiserror::Error;

/// Application-wide error types for Harvest.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request could not be built or sent.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The target answered with a non-2xx status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Rate limit exceeded (HTTP 429).
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Markup could not be turned into records (e.g. an unparseable container selector).
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// HTML-to-Markdown conversion failed.
    #[error("Cleaner error: {0}")]
    CleanerError(String),

    /// LLM API call failed.
    #[error("LLM error (HTTP {status_code}): {message}")]
    LlmError {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// A source definition or runtime setting is malformed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A caller-supplied argument is out of range.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A job, task or record does not exist (or its stream was already taken).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::HttpStatus { status, .. } => *status >= 500,
            AppError::LlmError { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

/// The single failure type a [`Crawler`](crate::crawler::Crawler) reports.
///
/// Wraps whatever went wrong (fetch or extraction) together with the
/// name of the source that was being crawled.
#[derive(Error, Debug)]
#[error("{source_name}: {cause}")]
pub struct CrawlError {
    pub source_name: String,
    #[source]
    pub cause: AppError,
}

impl CrawlError {
    pub fn new(source_name: impl Into<String>, cause: AppError) -> Self {
        Self {
            source_name: source_name.into(),
            cause,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.cause.is_retryable()
    }
}
