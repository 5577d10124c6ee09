pub mod cleaner;
pub mod extract;
pub mod factory;
pub mod fetcher;
pub mod llm;
pub mod specialized;
pub mod throttle;

pub use cleaner::HtmdCleaner;
pub use extract::SelectorStrategy;
pub use factory::DefaultCrawlerFactory;
pub use fetcher::{FetchConfig, ReqwestFetcher};
pub use llm::OpenAiCompletion;
pub use specialized::{BaiduStrategy, DuckDuckGoStrategy, builtin_strategies};
pub use throttle::{Throttle, ThrottledFetcher};
