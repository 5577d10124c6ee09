use chrono::{DateTime, Utc};
use harvest_core::error::AppError;
use harvest_core::traits::DeepOutcome;
use serde::Serialize;
use sqlx::{PgPool, Pool, Postgres};

/// A stored deep-collection result.
#[derive(Debug, Clone, Serialize)]
pub struct DeepCollection {
    pub id: i64,
    pub record_id: i64,
    pub status: String,
    pub deep_content: Option<String>,
    pub analysis_result: Option<String>,
    pub model: String,
    pub error_message: Option<String>,
    pub tokens_used: i32,
    pub updated_at: DateTime<Utc>,
}

/// Deep-collection results in `deep_collection_data`, one row per saved
/// record.
#[derive(Clone)]
pub struct DeepCollectionRepository {
    pool: Pool<Postgres>,
}

impl DeepCollectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace the row for `record_id`. A completed outcome also
    /// sets `has_deep_collected` on the saved record, in the same
    /// transaction.
    pub async fn upsert(
        &self,
        record_id: i64,
        model: &str,
        outcome: &DeepOutcome,
    ) -> Result<(), AppError> {
        let (status, content, analysis, error, tokens) = match outcome {
            DeepOutcome::Completed {
                deep_content,
                analysis_result,
                tokens_used,
            } => (
                "completed",
                Some(deep_content.as_str()),
                Some(analysis_result.as_str()),
                None,
                tokens_column(*tokens_used),
            ),
            DeepOutcome::Failed { error_message } => {
                ("failed", None, None, Some(error_message.as_str()), 0)
            }
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO deep_collection_data
                (collection_data_id, deep_content, analysis_result, model,
                 collection_status, error_message, tokens_used)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (collection_data_id) DO UPDATE SET
                deep_content = EXCLUDED.deep_content,
                analysis_result = EXCLUDED.analysis_result,
                model = EXCLUDED.model,
                collection_status = EXCLUDED.collection_status,
                error_message = EXCLUDED.error_message,
                tokens_used = EXCLUDED.tokens_used,
                updated_at = NOW()
            "#,
        )
        .bind(record_id)
        .bind(content)
        .bind(analysis)
        .bind(model)
        .bind(status)
        .bind(error)
        .bind(tokens)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if matches!(outcome, DeepOutcome::Completed { .. }) {
            sqlx::query("UPDATE collection_data SET has_deep_collected = TRUE WHERE id = $1")
                .bind(record_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub async fn get_for_record(&self, record_id: i64) -> Result<Option<DeepCollection>, AppError> {
        let row = sqlx::query_as::<_, DeepCollectionRow>(
            r#"
            SELECT id, collection_data_id, collection_status, deep_content, analysis_result,
                   model, error_message, tokens_used, updated_at
            FROM deep_collection_data
            WHERE collection_data_id = $1
            "#,
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    /// Remove deep results for the given records and clear their flag.
    /// Returns the number of rows removed.
    pub async fn delete_for_records(&self, record_ids: &[i64]) -> Result<u64, AppError> {
        if record_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let deleted = sqlx::query("DELETE FROM deep_collection_data WHERE collection_data_id = ANY($1)")
            .bind(record_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?
            .rows_affected();

        sqlx::query("UPDATE collection_data SET has_deep_collected = FALSE WHERE id = ANY($1)")
            .bind(record_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(deleted)
    }
}

/// `tokens_used` is an INTEGER column; larger counts are clamped.
fn tokens_column(tokens: u32) -> i32 {
    i32::try_from(tokens).unwrap_or(i32::MAX)
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct DeepCollectionRow {
    id: i64,
    collection_data_id: i64,
    collection_status: String,
    deep_content: Option<String>,
    analysis_result: Option<String>,
    model: String,
    error_message: Option<String>,
    tokens_used: i32,
    updated_at: DateTime<Utc>,
}

impl From<DeepCollectionRow> for DeepCollection {
    fn from(row: DeepCollectionRow) -> Self {
        DeepCollection {
            id: row.id,
            record_id: row.collection_data_id,
            status: row.collection_status,
            deep_content: row.deep_content,
            analysis_result: row.analysis_result,
            model: row.model,
            error_message: row.error_message,
            tokens_used: row.tokens_used,
            updated_at: row.updated_at,
        }
    }
}
