use harvest_core::models::{CollectedRecord, SavedRecord};
use harvest_core::source::{SourceConfig, SourceId};
use harvest_core::traits::{CollectionStore, DeepCollectionStore, DeepOutcome};
use harvest_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::deep_repository::DeepCollectionRepository;
use crate::record_repository::CollectionDataRepository;
use crate::source_repository::SourceRepository;

/// Owns the connection pool, runs migrations and vends repositories.
///
/// Also the [`CollectionStore`] and [`DeepCollectionStore`] handed to the
/// orchestrator and deep-collection service.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    pub fn sources(&self) -> SourceRepository {
        SourceRepository::new(self.pool.clone())
    }

    pub fn records(&self) -> CollectionDataRepository {
        CollectionDataRepository::new(self.pool.clone())
    }

    pub fn deep(&self) -> DeepCollectionRepository {
        DeepCollectionRepository::new(self.pool.clone())
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// -- Trait implementations --

impl CollectionStore for Database {
    async fn get_source(&self, id: SourceId) -> Result<Option<SourceConfig>, AppError> {
        self.sources().get(id).await
    }

    async fn list_active_sources(&self) -> Result<Vec<SourceConfig>, AppError> {
        self.sources().list_active().await
    }

    async fn save_records(&self, records: &[CollectedRecord]) -> Result<usize, AppError> {
        self.records().save(records).await
    }
}

impl DeepCollectionStore for Database {
    async fn get_saved_record(&self, id: i64) -> Result<Option<SavedRecord>, AppError> {
        self.records().get(id).await
    }

    async fn save_deep_result(
        &self,
        record_id: i64,
        model: &str,
        outcome: &DeepOutcome,
    ) -> Result<(), AppError> {
        self.deep().upsert(record_id, model, outcome).await
    }
}
