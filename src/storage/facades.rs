//! User-facing storage facades.
//!
//! - `StorageWriter`: cycle commits through the writer actor
//! - `StorageAdmin`: retention pruning, full wipe, status, shutdown

use chrono::{DateTime, Duration, Utc};
use strum::IntoEnumIterator;
use tokio::sync::{mpsc, oneshot};

use crate::storage::StorageError;
use crate::storage::actor::{Command, Reply};
use crate::storage::db::SqlitePool;
use crate::storage::types::{
    CycleReadings, DeleteSummary, ReadingTable, StorageStatus, TableStatus, WriteSummary,
    ts_from_millis,
};

/// Send a command and wait for the actor's reply.
async fn request<T>(
    tx: &mpsc::Sender<Command>,
    build: impl FnOnce(Reply<T>) -> Command,
) -> Result<T, StorageError> {
    let (reply, rx) = oneshot::channel();
    tx.send(build(reply))
        .await
        .map_err(|_| StorageError::ChannelSend)?;
    rx.await.map_err(|_| StorageError::ChannelSend)?
}

// =============================================================================
// Writer
// =============================================================================

/// Storage writer used by the collection scheduler.
#[derive(Clone)]
pub struct StorageWriter {
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for StorageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageWriter").finish_non_exhaustive()
    }
}

impl StorageWriter {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Commit one cycle atomically.
    ///
    /// On error nothing of this cycle is persisted; there is no replay.
    pub async fn write_cycle(&self, readings: CycleReadings) -> Result<WriteSummary, StorageError> {
        request(&self.tx, |reply| Command::WriteCycle { readings, reply }).await
    }
}

// =============================================================================
// Admin
// =============================================================================

/// Storage administration: retention, wipe, introspection.
#[derive(Clone)]
pub struct StorageAdmin {
    tx: mpsc::Sender<Command>,
    pool: SqlitePool,
}

impl std::fmt::Debug for StorageAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdmin").finish_non_exhaustive()
    }
}

impl StorageAdmin {
    pub(crate) fn new(tx: mpsc::Sender<Command>, pool: SqlitePool) -> Self {
        Self { tx, pool }
    }

    /// Delete every row older than `retention_days` days from all tables.
    ///
    /// Re-running with the same cutoff deletes nothing further.
    pub async fn prune(&self, retention_days: u32) -> Result<DeleteSummary, StorageError> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        self.prune_before(cutoff).await
    }

    /// Delete every row with a timestamp strictly before `cutoff`.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<DeleteSummary, StorageError> {
        request(&self.tx, |reply| Command::Prune { cutoff, reply }).await
    }

    /// Delete every row from all tables. Destructive administrative action.
    pub async fn wipe(&self) -> Result<DeleteSummary, StorageError> {
        request(&self.tx, |reply| Command::Wipe { reply }).await
    }

    /// Row counts and time span per table.
    pub async fn status(&self) -> Result<StorageStatus, StorageError> {
        let mut tables = Vec::new();
        for table in ReadingTable::iter() {
            let sql = format!("SELECT COUNT(*), MIN(ts), MAX(ts) FROM {}", table.as_ref());
            let (rows, oldest, newest): (i64, Option<i64>, Option<i64>) =
                sqlx::query_as(&sql).fetch_one(self.pool.inner()).await?;
            tables.push(TableStatus {
                table,
                rows,
                oldest: oldest.map(ts_from_millis).transpose()?,
                newest: newest.map(ts_from_millis).transpose()?,
            });
        }

        let size_bytes = std::fs::metadata(self.pool.path()).ok().map(|m| m.len());
        Ok(StorageStatus { tables, size_bytes })
    }

    /// Stop the writer actor.
    pub async fn shutdown(&self) -> Result<(), StorageError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| StorageError::ChannelSend)?;
        rx.await.map_err(|_| StorageError::ChannelSend)
    }
}
