//! SQLite backend implementation using sqlx.
//!
//! Provides connection pooling and schema migration for SQLite.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool as SqlxPool, SqlitePoolOptions,
    SqliteSynchronous,
};

use crate::storage::StorageError;

/// Default maximum connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a statement waits on a locked database before failing.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite connection pool wrapper.
///
/// Wraps sqlx's SqlitePool with WAL mode so that readers in another process
/// see the last committed cycle without waiting on the writer.
#[derive(Clone)]
pub struct SqlitePool {
    inner: SqlxPool,
    path: PathBuf,
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqlitePool {
    /// Open (creating if missing) the database file at `path`.
    ///
    /// # Configuration
    ///
    /// - WAL journal mode for reader/writer concurrency
    /// - Normal synchronous mode for performance with durability
    /// - Busy timeout so short writer commits never surface as reader errors
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(DEFAULT_BUSY_TIMEOUT)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(DEFAULT_CONNECT_TIMEOUT)
            .connect_with(options)
            .await?;

        tracing::debug!(path = %path.display(), "SQLite pool opened");
        Ok(Self { inner: pool, path })
    }

    /// Open with the default pool size.
    pub async fn open_default(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open(path, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Apply embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations").run(&self.inner).await?;
        tracing::info!("Database schema initialized");
        Ok(())
    }

    /// Get the underlying sqlx pool for direct query execution.
    #[inline]
    pub fn inner(&self) -> &SqlxPool {
        &self.inner
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Check if the pool is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
