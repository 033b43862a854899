//! Storage builder and handles.
//!
//! Provides a builder pattern for constructing the storage layer
//! and a handles struct for accessing all storage facades.

use std::path::{Path, PathBuf};

use tokio::task::JoinHandle;

use crate::storage::StorageError;
use crate::storage::actor::DbActor;
use crate::storage::db::SqlitePool;
use crate::storage::{QueryAggregator, StorageAdmin, StorageWriter};

/// Default channel capacity for writer commands.
///
/// The scheduler sends one command per cycle, so a small queue is plenty.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Minimum connection pool size.
const MIN_POOL_SIZE: u32 = 2;

/// Maximum connection pool size.
const MAX_POOL_SIZE: u32 = 16;

/// Calculate default pool size based on available CPU parallelism.
///
/// Returns the number of available CPUs, clamped between MIN_POOL_SIZE and MAX_POOL_SIZE.
fn default_pool_size() -> u32 {
    std::thread::available_parallelism()
        .map(|p| (p.get() as u32).clamp(MIN_POOL_SIZE, MAX_POOL_SIZE))
        .unwrap_or(4)
}

/// Builder for constructing the storage layer.
pub struct StorageBuilder {
    db_path: PathBuf,
    pool_size: u32,
    channel_capacity: usize,
}

impl StorageBuilder {
    /// Create a new storage builder for the database file at `db_path`.
    ///
    /// Pool size defaults to the number of available CPUs (clamped to 2-16).
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            pool_size: default_pool_size(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set the connection pool size.
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the channel capacity for writer commands.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Open the database, apply migrations, spawn the writer and return handles.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn build(self) -> Result<StorageHandles, StorageError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = self.db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Internal(format!(
                    "Failed to create database directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let pool = SqlitePool::open(&self.db_path, self.pool_size).await?;
        pool.migrate().await?;

        let (actor_handle, tx) = DbActor::spawn(pool.clone(), self.channel_capacity);

        Ok(StorageHandles {
            writer: StorageWriter::new(tx.clone()),
            aggregator: QueryAggregator::new(pool.clone()),
            admin: StorageAdmin::new(tx, pool),
            actor_handle: Some(actor_handle),
        })
    }
}

/// Handles to all storage layer facades.
pub struct StorageHandles {
    /// Cycle writer for the scheduler.
    pub writer: StorageWriter,
    /// Read-side queries.
    pub aggregator: QueryAggregator,
    /// Retention, wipe and status.
    pub admin: StorageAdmin,
    /// Internal actor handle for graceful shutdown.
    actor_handle: Option<JoinHandle<()>>,
}

impl StorageHandles {
    /// Gracefully shutdown the storage layer.
    ///
    /// Sends shutdown command to the writer actor and waits for it to finish.
    pub async fn shutdown(mut self) -> Result<(), StorageError> {
        self.admin.shutdown().await?;

        if let Some(handle) = self.actor_handle.take() {
            handle
                .await
                .map_err(|e| StorageError::Internal(format!("Failed to join actor task: {e}")))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CycleReadings;
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_storage_builder_creates_parent_dir() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("data").join("t.db");

        let handles = StorageBuilder::new(&db_path).build().await.unwrap();
        assert!(db_path.exists());

        let status = handles.admin.status().await.unwrap();
        assert_eq!(status.tables.len(), 3);
        assert_eq!(status.total_rows(), 0);
        assert!(status.latest().is_none());

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_storage_roundtrip_across_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("roundtrip.db");
        let ts = Utc::now() - Duration::minutes(10);

        // Phase 1: write and shut down
        {
            let handles = StorageBuilder::new(&db_path).build().await.unwrap();
            let mut cycle = CycleReadings::new(ts);
            cycle.set_cpu_temp(47.25);
            cycle.push_storage("/dev/nvme0n1", Some("Fake NVMe".into()), 39.0);
            let summary = handles.writer.write_cycle(cycle).await.unwrap();
            assert_eq!(summary.total(), 2);
            handles.shutdown().await.unwrap();
        }

        // Phase 2: reopen and read
        let handles = StorageBuilder::new(&db_path).build().await.unwrap();
        let latest = handles.aggregator.latest().await.unwrap();
        assert_eq!(latest.core.as_ref().unwrap().cpu_temp, Some(47.25));
        assert_eq!(latest.storage_devices.len(), 1);
        assert_eq!(latest.storage_devices[0].device_name, "Fake NVMe");

        let status = handles.admin.status().await.unwrap();
        assert_eq!(status.total_rows(), 2);
        assert_eq!(status.latest().unwrap().timestamp_millis(), ts.timestamp_millis());
        assert!(status.size_bytes.unwrap() > 0);

        handles.shutdown().await.unwrap();
    }

    #[test]
    fn test_default_pool_size_within_bounds() {
        let size = super::default_pool_size();
        assert!(size >= super::MIN_POOL_SIZE);
        assert!(size <= super::MAX_POOL_SIZE);
    }
}
