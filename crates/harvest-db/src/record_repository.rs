use chrono::{DateTime, Utc};
use harvest_core::error::AppError;
use harvest_core::models::{CollectedRecord, SavedRecord, SavedRecordQuery};
use sqlx::{PgPool, Pool, Postgres};

/// Saved collection results in `collection_data`.
#[derive(Clone)]
pub struct CollectionDataRepository {
    pool: Pool<Postgres>,
}

impl CollectionDataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert all records in one transaction. Returns the number inserted.
    pub async fn save(&self, records: &[CollectedRecord]) -> Result<usize, AppError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO collection_data
                    (title, url, summary, source, image_url, keyword, source_type, raw_data, collected_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(&record.title)
            .bind(&record.url)
            .bind(&record.summary)
            .bind(&record.source)
            .bind(&record.image)
            .bind(&record.keyword)
            .bind(&record.source_type)
            .bind(&record.raw_data)
            .bind(record.collected_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(count = records.len(), "Saved collection records");
        Ok(records.len())
    }

    pub async fn get(&self, id: i64) -> Result<Option<SavedRecord>, AppError> {
        let row = sqlx::query_as::<_, SavedRecordRow>(
            r#"
            SELECT id, title, url, summary, source, image_url, keyword, source_type,
                   raw_data, collected_at, saved_at, has_deep_collected
            FROM collection_data
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    /// Newest first. `keyword` matches as a substring.
    pub async fn list(&self, query: &SavedRecordQuery) -> Result<Vec<SavedRecord>, AppError> {
        let keyword = query
            .keyword
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(|k| format!("%{}%", escape_like(k)));
        let source_type = query.source_type.as_deref().filter(|s| !s.is_empty());

        let rows = sqlx::query_as::<_, SavedRecordRow>(
            r#"
            SELECT id, title, url, summary, source, image_url, keyword, source_type,
                   raw_data, collected_at, saved_at, has_deep_collected
            FROM collection_data
            WHERE ($1::TEXT IS NULL OR keyword LIKE $1)
              AND ($2::TEXT IS NULL OR source_type = $2)
            ORDER BY saved_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(keyword)
        .bind(source_type)
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Delete a saved record (and its deep-collection row). Returns whether
    /// anything was deleted.
    pub async fn delete(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM collection_data WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct SavedRecordRow {
    id: i64,
    title: String,
    url: String,
    summary: String,
    source: String,
    image_url: String,
    keyword: String,
    source_type: String,
    raw_data: String,
    collected_at: DateTime<Utc>,
    saved_at: DateTime<Utc>,
    has_deep_collected: bool,
}

impl From<SavedRecordRow> for SavedRecord {
    fn from(row: SavedRecordRow) -> Self {
        SavedRecord {
            id: row.id,
            title: row.title,
            url: row.url,
            summary: row.summary,
            source: row.source,
            image_url: row.image_url,
            keyword: row.keyword,
            source_type: row.source_type,
            raw_data: row.raw_data,
            collected_at: row.collected_at,
            saved_at: row.saved_at,
            has_deep_collected: row.has_deep_collected,
        }
    }
}
