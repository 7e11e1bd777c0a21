//! Shared PostgreSQL pool for all extractors and the checkpoint store.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::error::SyncError;

/// Thin owner of the source pool. Extractors within a pass share it, so the
/// source sees a bounded number of connections regardless of entity count.
#[derive(Debug, Clone)]
pub struct SourcePool {
    pool: PgPool,
}

impl SourcePool {
    /// Connect lazily-capped to a handful of connections; the engine runs
    /// entities sequentially, so contention on the pool is rare.
    ///
    /// # Errors
    /// Connection or TLS establishment failures.
    pub async fn connect(url: &str) -> Result<Self, SyncError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await?;
        info!("connected to relational source");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Reachability probe used by the scheduler at startup.
    ///
    /// # Errors
    /// Whatever the round trip surfaces.
    pub async fn ping(&self) -> Result<(), SyncError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
