//! Per-host politeness delay for any [`Fetcher`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use harvest_core::error::AppError;
use harvest_core::request::FetchRequest;
use harvest_core::traits::Fetcher;
use tokio::time::Instant;
use url::Url;

/// Per-host request spacing, shareable between fetchers.
///
/// Each request reserves the next free slot for its host under a short
/// lock, then sleeps outside it. Concurrent callers against one host are
/// served `delay` apart, while other hosts are never held up.
#[derive(Clone)]
pub struct Throttle {
    delay: Duration,
    next_slot: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A throttle that never waits.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Wrap `inner`; every fetcher wrapped by clones of this throttle
    /// shares the same per-host schedule.
    pub fn wrap<F: Fetcher>(&self, inner: F) -> ThrottledFetcher<F> {
        ThrottledFetcher {
            inner,
            throttle: self.clone(),
        }
    }

    /// `scheme://host:port`, or `None` for unparseable URLs.
    fn host_key(url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let host = url.host_str()?;
        let port = url
            .port_or_known_default()
            .map(|p| format!(":{p}"))
            .unwrap_or_default();
        Some(format!("{}://{}{}", url.scheme(), host, port))
    }

    /// Claim a slot for `host` and return when it starts.
    fn reserve(&self, host: String) -> Instant {
        let now = Instant::now();
        let mut slots = self
            .next_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let start = slots.get(&host).copied().filter(|t| *t > now).unwrap_or(now);
        slots.insert(host, start + self.delay);
        start
    }

    async fn wait(&self, url: &str) {
        if self.delay.is_zero() {
            return;
        }
        let Some(host) = Self::host_key(url) else {
            return;
        };
        let start = self.reserve(host);
        if start > Instant::now() {
            tracing::debug!(
                %url,
                wait_ms = %(start - Instant::now()).as_millis(),
                "Throttling request"
            );
            tokio::time::sleep_until(start).await;
        }
    }
}

/// A [`Fetcher`] that waits for its [`Throttle`] before every request.
#[derive(Clone)]
pub struct ThrottledFetcher<F> {
    inner: F,
    throttle: Throttle,
}

impl<F: Fetcher> Fetcher for ThrottledFetcher<F> {
    async fn fetch(&self, request: &FetchRequest) -> Result<String, AppError> {
        self.throttle.wait(&request.url).await;
        self.inner.fetch(request).await
    }
}
