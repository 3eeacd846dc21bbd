//! Bounded connection pool with retrying acquisition.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{Connection, Sqlite, Transaction};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use crate::config::Config;
use crate::error::{HarvestError, Result};

/// Everything needed to (re)build the pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub path: PathBuf,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a single acquisition attempt waits for a free connection.
    pub acquire_timeout: Duration,
    /// How long a statement waits on another connection's write lock.
    pub busy_timeout: Duration,
    /// Attempt budget and delay shared by acquisition and write retries.
    pub retry: RetryPolicy,
}

impl PoolSettings {
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            path: config.database_path.clone(),
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            acquire_timeout: config.db_acquire_timeout,
            busy_timeout: config.db_busy_timeout,
            retry: RetryPolicy {
                attempts: config.db_retry_attempts,
                delay: config.db_retry_delay,
            },
        }
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Concurrent account flushes contend for the single writer lock.
            .busy_timeout(self.busy_timeout)
    }

    async fn build(&self) -> std::result::Result<SqlitePool, sqlx::Error> {
        SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout)
            .test_before_acquire(true)
            .connect_with(self.connect_options())
            .await
    }
}

/// Owns the pool and hands out health-checked connections.
///
/// The pool is replaceable: after `retry.attempts` consecutive
/// connection-level failures it is rebuilt from [`PoolSettings`], and
/// connections checked out from the old pool finish against it.
///
/// Checkouts are counted by a semaphore that outlives any single pool, so a
/// rebuild never lets more than `max_connections` be checked out at once.
#[derive(Debug)]
pub struct PoolManager {
    settings: PoolSettings,
    pool: RwLock<SqlitePool>,
    checkouts: Arc<Semaphore>,
    consecutive_failures: AtomicU32,
}

impl PoolManager {
    /// Create the pool and open `min_connections` connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub async fn connect(settings: PoolSettings) -> std::result::Result<Self, sqlx::Error> {
        let pool = settings.build().await?;
        info!(
            path = %settings.path.display(),
            max = settings.max_connections,
            min = settings.min_connections,
            "Database pool ready"
        );
        Ok(Self {
            checkouts: Arc::new(Semaphore::new(settings.max_connections as usize)),
            settings,
            pool: RwLock::new(pool),
            consecutive_failures: AtomicU32::new(0),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Number of connections currently checked out through [`acquire`](Self::acquire).
    #[must_use]
    pub fn checked_out(&self) -> usize {
        let max = self.settings.max_connections as usize;
        max.saturating_sub(self.checkouts.available_permits())
    }

    /// Handle to the current pool, for statements that need no dedicated connection.
    #[must_use]
    pub fn pool(&self) -> SqlitePool {
        self.pool
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Check out a connection, retrying with a fixed delay.
    ///
    /// Each attempt waits up to `acquire_timeout`; connections that fail the
    /// ready check are closed rather than returned.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::PoolExhausted`] once every attempt has failed.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let attempts = self.settings.retry.attempts.max(1);

        for attempt in 1..=attempts {
            let permit = tokio::time::timeout(
                self.settings.acquire_timeout,
                Arc::clone(&self.checkouts).acquire_owned(),
            )
            .await;
            let permit = match permit {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(HarvestError::PoolExhausted { attempts: attempt }),
                Err(_) => {
                    warn!(attempt, attempts, "Timed out waiting for a database connection");
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.retry.delay).await;
                    }
                    continue;
                }
            };

            match self.pool().acquire().await {
                Ok(mut conn) => match conn.ping().await {
                    Ok(()) => {
                        self.consecutive_failures.store(0, Ordering::Relaxed);
                        return Ok(PooledConnection::new(conn, permit));
                    }
                    Err(e) => {
                        warn!(
                            attempt,
                            error = %e,
                            "Pooled connection failed ready check, discarding"
                        );
                        conn.close_on_drop();
                        drop(conn);
                        drop(permit);
                        self.report_connection_failure().await;
                    }
                },
                Err(sqlx::Error::PoolTimedOut) => {
                    warn!(attempt, attempts, "Timed out waiting for a database connection");
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Failed to acquire database connection");
                    drop(permit);
                    self.report_connection_failure().await;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.settings.retry.delay).await;
            }
        }

        Err(HarvestError::PoolExhausted { attempts })
    }

    /// Count a connection-level failure, rebuilding the pool once the
    /// consecutive count reaches the retry budget.
    pub async fn report_connection_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures < self.settings.retry.attempts.max(1) {
            return;
        }
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if let Err(e) = self.reinitialize().await {
            warn!(error = %e, "Failed to rebuild database pool");
        }
    }

    /// Replace the pool with a freshly built one.
    ///
    /// # Errors
    ///
    /// Returns an error if the new pool cannot connect; the old pool stays in place.
    pub async fn reinitialize(&self) -> std::result::Result<(), sqlx::Error> {
        warn!("Rebuilding database pool after repeated connection failures");
        let fresh = self.settings.build().await?;
        let old = {
            let mut guard = self
                .pool
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::replace(&mut *guard, fresh)
        };
        // Closing waits for checked-out connections, so do it off the caller's path.
        tokio::spawn(async move { old.close().await });
        Ok(())
    }

    /// Close every connection. Outstanding checkouts finish first.
    pub async fn close(&self) {
        self.checkouts.close();
        self.pool().close().await;
    }
}

/// A checked-out connection.
///
/// Dropping it returns the connection to its pool; any transaction still
/// open on it has already been rolled back by the transaction's own drop.
/// Call [`discard`](Self::discard) when the connection is known to be broken
/// so it is closed instead of reused.
#[derive(Debug)]
pub struct PooledConnection {
    // Declared before the permit so the connection is back in its pool
    // before the slot frees up.
    conn: PoolConnection<Sqlite>,
    _permit: OwnedSemaphorePermit,
    discarded: bool,
}

impl PooledConnection {
    fn new(conn: PoolConnection<Sqlite>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            conn,
            _permit: permit,
            discarded: false,
        }
    }

    /// Start a transaction; nothing is persisted until it commits.
    ///
    /// # Errors
    ///
    /// Returns an error if `BEGIN` fails.
    pub async fn begin(&mut self) -> std::result::Result<Transaction<'_, Sqlite>, sqlx::Error> {
        Connection::begin(&mut *self.conn).await
    }

    /// Mark the connection broken: it is closed on release and the pool
    /// opens a replacement on demand.
    pub fn discard(&mut self) {
        if !self.discarded {
            debug!("Discarding broken database connection");
            self.discarded = true;
            self.conn.close_on_drop();
        }
    }

    #[must_use]
    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    /// Return the connection to the pool, or close it if discarded.
    ///
    /// Equivalent to dropping; spelled out where the hand-back is worth reading.
    pub fn release(self) {
        if self.discarded {
            debug!("Closing discarded connection instead of returning it");
        }
    }
}

impl Deref for PooledConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}
