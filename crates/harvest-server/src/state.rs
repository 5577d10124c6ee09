use harvest_client::{DefaultCrawlerFactory, HtmdCleaner, OpenAiCompletion, ReqwestFetcher};
use harvest_core::{CollectionOrchestrator, DeepCollectionService};
use harvest_db::Database;

pub type Orchestrator = CollectionOrchestrator<Database, DefaultCrawlerFactory>;

pub type DeepService = DeepCollectionService<ReqwestFetcher, HtmdCleaner, OpenAiCompletion, Database>;

/// Shared application state, available to handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub db: Database,
    pub collections: Orchestrator,
    /// `None` when no LLM is configured; deep-collection endpoints then
    /// answer 503.
    pub deep: Option<DeepService>,
    pub api_key: String,
}
