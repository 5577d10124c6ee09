use harvest_core::crawler::{Crawler, CrawlerFactory, StrategyRegistry};
use harvest_core::error::AppError;
use harvest_core::source::SourceConfig;

use crate::fetcher::{FetchConfig, ReqwestFetcher};
use crate::specialized::builtin_strategies;
use crate::throttle::{Throttle, ThrottledFetcher};

/// Builds crawlers backed by reqwest.
///
/// Every crawler gets its own HTTP connection pool; all of them share one
/// per-host throttle.
#[derive(Clone)]
pub struct DefaultCrawlerFactory {
    config: FetchConfig,
    strategies: StrategyRegistry,
    throttle: Throttle,
}

impl DefaultCrawlerFactory {
    pub fn new(config: FetchConfig) -> Self {
        Self::with_strategies(config, builtin_strategies())
    }

    pub fn with_strategies(config: FetchConfig, strategies: StrategyRegistry) -> Self {
        let throttle = config.throttle.map(Throttle::new).unwrap_or_else(Throttle::disabled);
        Self {
            config,
            strategies,
            throttle,
        }
    }
}

impl Default for DefaultCrawlerFactory {
    fn default() -> Self {
        Self::new(FetchConfig::default())
    }
}

impl CrawlerFactory for DefaultCrawlerFactory {
    type Fetcher = ThrottledFetcher<ReqwestFetcher>;

    fn create(&self, config: SourceConfig) -> Result<Crawler<Self::Fetcher>, AppError> {
        let strategy = self.strategies.resolve(&config.source_type);
        let fetcher = self
            .throttle
            .wrap(ReqwestFetcher::with_timeout(self.config.timeout)?);
        Ok(Crawler::new(config, strategy, fetcher))
    }
}
