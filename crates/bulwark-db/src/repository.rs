use bulwark_core::error::AppError;
use bulwark_core::models::{CachedImage, ExtractionResult};
use bulwark_core::traits::CacheStore;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};

/// Durable reader cache: one row per normalized URL, upserted on every write.
#[derive(Clone)]
pub struct ReaderCacheRepository {
    pool: Pool<Postgres>,
}

impl ReaderCacheRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, url: &str) -> Result<Option<ExtractionResult>, AppError> {
        let row: Option<(Json<ExtractionResult>,)> =
            sqlx::query_as("SELECT entry FROM reader_cache WHERE url = $1")
                .bind(url)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(|(Json(entry),)| entry))
    }

    /// Insert or replace the entry for `url`. Last write wins.
    pub async fn upsert(&self, url: &str, entry: &ExtractionResult) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO reader_cache (url, status, entry, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (url) DO UPDATE
            SET status = EXCLUDED.status, entry = EXCLUDED.entry, updated_at = NOW()
            "#,
        )
        .bind(url)
        .bind(entry.status.to_string())
        .bind(Json(entry))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// When the entry for `url` was last written.
    pub async fn updated_at(&self, url: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        let row: Option<(DateTime<Utc>,)> =
            sqlx::query_as("SELECT updated_at FROM reader_cache WHERE url = $1")
                .bind(url)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(|(at,)| at))
    }
}

impl CacheStore<ExtractionResult> for ReaderCacheRepository {
    async fn get(&self, key: &str) -> Result<Option<ExtractionResult>, AppError> {
        ReaderCacheRepository::get(self, key).await
    }

    async fn set(&self, key: &str, value: &ExtractionResult) -> Result<(), AppError> {
        self.upsert(key, value).await
    }
}

/// Durable image cache: bytes plus the headers they are served with.
#[derive(Clone)]
pub struct ImageCacheRepository {
    pool: Pool<Postgres>,
}

#[derive(sqlx::FromRow)]
struct ImageRow {
    content_type: String,
    cache_control: String,
    bytes: Vec<u8>,
}

impl From<ImageRow> for CachedImage {
    fn from(row: ImageRow) -> Self {
        CachedImage {
            bytes: row.bytes,
            content_type: row.content_type,
            cache_control: row.cache_control,
        }
    }
}

impl ImageCacheRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, url: &str) -> Result<Option<CachedImage>, AppError> {
        let row = sqlx::query_as::<_, ImageRow>(
            "SELECT content_type, cache_control, bytes FROM image_cache WHERE url = $1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    pub async fn upsert(&self, url: &str, image: &CachedImage) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO image_cache (url, content_type, cache_control, bytes, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (url) DO UPDATE
            SET content_type = EXCLUDED.content_type,
                cache_control = EXCLUDED.cache_control,
                bytes = EXCLUDED.bytes,
                updated_at = NOW()
            "#,
        )
        .bind(url)
        .bind(&image.content_type)
        .bind(&image.cache_control)
        .bind(&image.bytes)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}

impl CacheStore<CachedImage> for ImageCacheRepository {
    async fn get(&self, key: &str) -> Result<Option<CachedImage>, AppError> {
        ImageCacheRepository::get(self, key).await
    }

    async fn set(&self, key: &str, value: &CachedImage) -> Result<(), AppError> {
        self.upsert(key, value).await
    }
}
