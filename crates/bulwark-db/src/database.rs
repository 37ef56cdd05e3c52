use bulwark_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::repository::{ImageCacheRepository, ReaderCacheRepository};

/// Central database facade: owns the connection pool, runs migrations,
/// and vends cache repositories.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open a pool of at most `max_connections` to `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        tracing::debug!("Migrations applied");
        Ok(())
    }

    pub fn reader_cache(&self) -> ReaderCacheRepository {
        ReaderCacheRepository::new(self.pool.clone())
    }

    pub fn image_cache(&self) -> ImageCacheRepository {
        ImageCacheRepository::new(self.pool.clone())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
