use std::time::Duration;

use harvest_core::error::AppError;
use harvest_core::request::{FetchRequest, RequestBody};
use harvest_core::source::HttpMethod;
use harvest_core::traits::Fetcher;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

/// Fetch settings shared by every crawler a factory builds.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    /// Minimum delay between requests to the same host. `None` disables
    /// throttling.
    pub throttle: Option<Duration>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            throttle: None,
        }
    }
}

impl FetchConfig {
    /// Reads `HARVEST_FETCH_TIMEOUT_SECS` and `HARVEST_FETCH_DELAY_MS`,
    /// falling back to defaults when unset.
    pub fn from_env() -> Result<Self, AppError> {
        let mut config = Self::default();
        if let Ok(secs) = std::env::var("HARVEST_FETCH_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|e| {
                AppError::ConfigError(format!("Invalid HARVEST_FETCH_TIMEOUT_SECS: {e}"))
            })?;
            if secs == 0 {
                return Err(AppError::ConfigError(
                    "HARVEST_FETCH_TIMEOUT_SECS must be at least 1".into(),
                ));
            }
            config.timeout = Duration::from_secs(secs);
        }
        if let Ok(ms) = std::env::var("HARVEST_FETCH_DELAY_MS") {
            let ms: u64 = ms.parse().map_err(|e| {
                AppError::ConfigError(format!("Invalid HARVEST_FETCH_DELAY_MS: {e}"))
            })?;
            config.throttle = (ms > 0).then(|| Duration::from_millis(ms));
        }
        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_throttle(mut self, delay: Duration) -> Self {
        self.throttle = Some(delay);
        self
    }
}

/// HTTP fetcher using reqwest.
///
/// One instance wraps one connection pool; clones share it. Headers come
/// entirely from the [`FetchRequest`], so no client-level User-Agent is set.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(FetchConfig::default().timeout)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }

    fn build(&self, request: &FetchRequest) -> Result<reqwest::RequestBuilder, AppError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        builder = builder.headers(header_map(request)?);

        match &request.body {
            None => {}
            Some(RequestBody::Form(fields)) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields)
                    .finish();
                builder = builder
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(encoded);
            }
            Some(RequestBody::Json(fields)) => {
                builder = builder.json(fields);
            }
        }
        Ok(builder)
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<String, AppError> {
        let response = self.build(request)?.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AppError::RateLimitExceeded);
        }
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else {
                AppError::HttpError(format!("Failed to read response body: {e}"))
            }
        })
    }
}

fn header_map(request: &FetchRequest) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::with_capacity(request.headers.len());
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::ConfigError(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::ConfigError(format!("Invalid value for header {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
