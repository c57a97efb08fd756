//! Postgres backend: connection pool, migrations, and health check.
//!
//! Implements the store traits with single-statement conditional updates;
//! the row-level atomicity of `UPDATE ... WHERE <precondition>` is what keeps
//! overlapping workers and racing reviewers correct.

pub mod audit;
pub mod intake;
pub mod retry;

use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool shared across all modules.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::error::Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Health check: `SELECT 1`.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool, for ad-hoc queries.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
