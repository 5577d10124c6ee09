pub mod config;
pub mod database;
pub mod deep_repository;
pub mod record_repository;
pub mod source_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use deep_repository::{DeepCollection, DeepCollectionRepository};
pub use record_repository::CollectionDataRepository;
pub use source_repository::SourceRepository;
