mod migrations;
mod models;
mod pool;
mod queries;
mod retry;

pub use models::*;
pub use pool::{PoolManager, PoolSettings, PooledConnection};
pub use queries::*;
pub use retry::{is_transient, RetryPolicy};

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

/// Shared handle to the clip store.
///
/// Cheap to clone; every clone talks to the same [`PoolManager`].
#[derive(Debug, Clone)]
pub struct Database {
    manager: Arc<PoolManager>,
}

impl Database {
    /// Open the database with default pool settings, running migrations if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or migrations fail.
    pub async fn new(path: &Path) -> Result<Self> {
        Self::with_settings(PoolSettings::new(path)).await
    }

    /// Open the database with explicit pool settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or migrations fail.
    pub async fn with_settings(settings: PoolSettings) -> Result<Self> {
        let path = settings.path.clone();
        let manager = PoolManager::connect(settings)
            .await
            .context("Failed to connect to SQLite database")?;

        let db = Self {
            manager: Arc::new(manager),
        };
        db.run_migrations().await?;
        db.verify_writable(&path).await?;

        Ok(db)
    }

    async fn verify_writable(&self, path: &Path) -> Result<()> {
        // Starting a transaction requires write capability on SQLite, so a
        // read-only mount fails here instead of on the first upsert.
        let tx = self.pool().begin().await.with_context(|| {
            format!(
                "SQLite database is not writable (path: {}). Check volume mount permissions/ownership",
                path.display()
            )
        })?;

        tx.commit()
            .await
            .context("Failed to commit SQLite writability check")?;
        Ok(())
    }

    /// Run all pending migrations.
    async fn run_migrations(&self) -> Result<()> {
        migrations::run(&self.pool()).await?;
        info!("Database migrations complete");
        Ok(())
    }

    /// Handle to the current connection pool.
    #[must_use]
    pub fn pool(&self) -> SqlitePool {
        self.manager.pool()
    }

    #[must_use]
    pub fn manager(&self) -> &PoolManager {
        &self.manager
    }

    /// Check out a dedicated connection. See [`PoolManager::acquire`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::HarvestError::PoolExhausted`] when the retry budget runs out.
    pub async fn acquire(&self) -> crate::Result<PooledConnection> {
        self.manager.acquire().await
    }

    /// Write-retry policy configured for this pool.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.manager.settings().retry
    }

    /// Largest number of connections the pool will open.
    #[must_use]
    pub fn max_connections(&self) -> u32 {
        self.manager.settings().max_connections
    }

    pub async fn close(&self) {
        self.manager.close().await;
    }
}
