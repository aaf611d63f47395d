//! Persistent store connection and result recording.
//!
//! The store is connected once at startup; failure to reach it is fatal.
//! After that the dispatch core never touches it: only processing code
//! records results through [`ResultStore`].

use crate::error::{Error, Result};
use crate::model::WorkResult;
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Where processed build results go.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn record(&self, result: &WorkResult) -> Result<()>;
}

/// Postgres handle. Owns the connection pool.
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to Postgres. `max_connections` should cover every worker.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Number of results recorded for a build (any platform).
    pub async fn result_count(&self, build_id: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM build_results WHERE build_id = $1")
            .bind(build_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[async_trait]
impl ResultStore for Store {
    async fn record(&self, result: &WorkResult) -> Result<()> {
        sqlx::query(
            "INSERT INTO build_results (build_id, platform, build_type, outcome, duration_ms, finished_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (build_id, platform, build_type)
             DO UPDATE SET outcome = EXCLUDED.outcome,
                           duration_ms = EXCLUDED.duration_ms,
                           finished_at = EXCLUDED.finished_at",
        )
        .bind(result.build_id.as_str())
        .bind(&result.platform)
        .bind(&result.build_type)
        .bind(&result.outcome)
        .bind(i64::try_from(result.duration_ms).unwrap_or(i64::MAX))
        .bind(result.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
