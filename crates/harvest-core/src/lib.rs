pub mod crawler;
pub mod deep;
pub mod error;
pub mod event;
pub mod job;
pub mod models;
pub mod orchestrator;
pub mod request;
pub mod source;
pub mod stream;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use crawler::{Crawler, CrawlerFactory, StrategyRegistry};
pub use deep::{DeepCollectionService, DeepTaskStatus, extract_analysis};
pub use error::{AppError, CrawlError};
pub use event::ResultQueueEvent;
pub use job::{
    CollectionConfig, CollectionJob, JobSnapshot, JobStatus, RetryPolicy, StartCollection,
};
pub use models::{CollectedRecord, ExtractedRecord, SavedRecord, SavedRecordQuery};
pub use orchestrator::{
    CollectionEvent, CollectionOrchestrator, CollectionReporter, TracingCollectionReporter,
};
pub use request::{FetchRequest, RequestBody};
pub use source::{
    BodyEncoding, FieldSelectors, HttpMethod, RawSourceConfig, Selectors, SourceConfig, SourceId,
    SourceStatus,
};
pub use stream::ResultStream;
pub use traits::{
    Cleaner, CollectionStore, Completion, CompletionOutput, DeepCollectionStore, DeepOutcome,
    ExtractionStrategy, Fetcher, MemoryStore,
};
