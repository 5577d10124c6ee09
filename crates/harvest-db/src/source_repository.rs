use harvest_core::error::AppError;
use harvest_core::source::{RawSourceConfig, SourceConfig, SourceId};
use sqlx::{PgPool, Pool, Postgres};

const SOURCE_COLUMNS: &str = "id, name, source_type, url, method, headers, body_template, \
     body_encoding, data_selector, title_selector, url_selector, summary_selector, \
     image_selector, status";

/// Scraping sources stored in `crawler_source`.
///
/// Rows are parsed into [`SourceConfig`] on the way out; a row that does
/// not parse is logged and treated as missing.
#[derive(Clone)]
pub struct SourceRepository {
    pool: Pool<Postgres>,
}

impl SourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a source; `raw.id` is ignored and the new id returned.
    pub async fn create(&self, raw: &RawSourceConfig) -> Result<SourceId, AppError> {
        let row: (SourceId,) = sqlx::query_as(
            r#"
            INSERT INTO crawler_source
                (name, source_type, url, method, headers, body_template, body_encoding,
                 data_selector, title_selector, url_selector, summary_selector,
                 image_selector, status)
            VALUES ($1, COALESCE($2, 'custom'), $3, COALESCE($4, 'GET'), $5, $6,
                    COALESCE($7, 'form'), $8, $9, $10, $11, $12, COALESCE($13, 'active'))
            RETURNING id
            "#,
        )
        .bind(&raw.name)
        .bind(&raw.source_type)
        .bind(&raw.url)
        .bind(&raw.method)
        .bind(&raw.headers)
        .bind(&raw.body_template)
        .bind(&raw.body_encoding)
        .bind(&raw.data_selector)
        .bind(&raw.title_selector)
        .bind(&raw.url_selector)
        .bind(&raw.summary_selector)
        .bind(&raw.image_selector)
        .bind(&raw.status)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.0)
    }

    pub async fn get(&self, id: SourceId) -> Result<Option<SourceConfig>, AppError> {
        let row = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM crawler_source WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.and_then(parse_row))
    }

    /// Active sources in id order; unparseable rows are skipped.
    pub async fn list_active(&self) -> Result<Vec<SourceConfig>, AppError> {
        let rows = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM crawler_source WHERE status = 'active' ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().filter_map(parse_row).collect())
    }

    pub async fn set_status(&self, id: SourceId, active: bool) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE crawler_source SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(if active { "active" } else { "inactive" })
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

fn parse_row(row: SourceRow) -> Option<SourceConfig> {
    let id = row.id;
    match SourceConfig::from_raw(row.into()) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(source_id = id, error = %e, "Skipping unparseable source");
            None
        }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: SourceId,
    name: String,
    source_type: Option<String>,
    url: Option<String>,
    method: Option<String>,
    headers: Option<String>,
    body_template: Option<String>,
    body_encoding: Option<String>,
    data_selector: Option<String>,
    title_selector: Option<String>,
    url_selector: Option<String>,
    summary_selector: Option<String>,
    image_selector: Option<String>,
    status: Option<String>,
}

impl From<SourceRow> for RawSourceConfig {
    fn from(row: SourceRow) -> Self {
        RawSourceConfig {
            id: row.id,
            name: row.name,
            source_type: row.source_type,
            url: row.url,
            method: row.method,
            headers: row.headers,
            body_template: row.body_template,
            body_encoding: row.body_encoding,
            data_selector: row.data_selector,
            title_selector: row.title_selector,
            url_selector: row.url_selector,
            summary_selector: row.summary_selector,
            image_selector: row.image_selector,
            status: row.status,
        }
    }
}
