//! Writer actor with a dedicated task and MPSC channel.
//!
//! Single-writer pattern: one task owns all mutations and processes commands
//! in arrival order, so each cycle commit is one serialization point.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;
use crate::storage::types::{CycleReadings, DeleteSummary, WriteSummary};

/// Reply channel for a command.
pub type Reply<T> = oneshot::Sender<Result<T, StorageError>>;

/// Commands sent to the writer actor.
#[derive(Debug)]
pub enum Command {
    /// Persist one cycle in a single transaction.
    WriteCycle {
        readings: CycleReadings,
        reply: Reply<WriteSummary>,
    },
    /// Delete rows strictly older than `cutoff` from every table.
    Prune {
        cutoff: DateTime<Utc>,
        reply: Reply<DeleteSummary>,
    },
    /// Delete every row from every table.
    Wipe { reply: Reply<DeleteSummary> },
    /// Graceful shutdown.
    Shutdown { reply: oneshot::Sender<()> },
}

/// Database writer actor.
pub struct DbActor {
    pool: SqlitePool,
    rx: mpsc::Receiver<Command>,
}

impl DbActor {
    /// Spawn the writer task on the current runtime.
    pub fn spawn(
        pool: SqlitePool,
        channel_capacity: usize,
    ) -> (JoinHandle<()>, mpsc::Sender<Command>) {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let actor = DbActor { pool, rx };
        let handle = tokio::spawn(actor.run());
        (handle, tx)
    }

    async fn run(mut self) {
        tracing::info!("DbActor started");

        while let Some(cmd) = self.rx.recv().await {
            if self.handle_command(cmd).await {
                break;
            }
        }

        tracing::info!("DbActor stopped");
    }

    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::WriteCycle { readings, reply } => {
                let result = self.write_cycle(&readings).await;
                if let Err(e) = &result {
                    tracing::error!(error = %e, ts = %readings.timestamp(), "Cycle commit failed");
                }
                let _ = reply.send(result);
            }
            Command::Prune { cutoff, reply } => {
                let _ = reply.send(self.prune(cutoff).await);
            }
            Command::Wipe { reply } => {
                let _ = reply.send(self.wipe().await);
            }
            Command::Shutdown { reply } => {
                tracing::info!("DbActor shutting down");
                self.pool.close().await;
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    // =========================================================================
    // Insert Operations
    // =========================================================================

    /// Write only the rows that carry a value, all or nothing.
    async fn write_cycle(&self, readings: &CycleReadings) -> Result<WriteSummary, StorageError> {
        let ts = readings.timestamp().timestamp_millis();
        let mut summary = WriteSummary::default();
        let mut tx = self.pool.inner().begin().await?;

        if let Some(core) = readings.core() {
            sqlx::query("INSERT INTO core_readings (ts, cpu_temp, gpu_temp) VALUES (?, ?, ?)")
                .bind(ts)
                .bind(core.cpu_temp)
                .bind(core.gpu_temp)
                .execute(&mut *tx)
                .await?;
            summary.core = true;
        }

        for r in readings.storage() {
            sqlx::query(
                "INSERT INTO storage_readings (ts, device_path, device_name, temperature)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(ts)
            .bind(&r.device_path)
            .bind(&r.device_name)
            .bind(r.temperature)
            .execute(&mut *tx)
            .await?;
            summary.storage += 1;
        }

        for r in readings.external() {
            let metadata = serde_json::to_string(&r.metadata)?;
            sqlx::query(
                "INSERT INTO external_readings (ts, sensor_name, sensor_type, temperature, metadata)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(ts)
            .bind(&r.sensor_name)
            .bind(&r.sensor_type)
            .bind(r.temperature)
            .bind(metadata)
            .execute(&mut *tx)
            .await?;
            summary.external += 1;
        }

        tx.commit().await?;
        tracing::debug!(rows = summary.total(), "Cycle committed");
        Ok(summary)
    }

    // =========================================================================
    // Maintenance Operations
    // =========================================================================

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<DeleteSummary, StorageError> {
        let cutoff_ms = cutoff.timestamp_millis();
        let mut tx = self.pool.inner().begin().await?;

        let core = sqlx::query("DELETE FROM core_readings WHERE ts < ?")
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let storage = sqlx::query("DELETE FROM storage_readings WHERE ts < ?")
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let external = sqlx::query("DELETE FROM external_readings WHERE ts < ?")
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        let summary = DeleteSummary {
            core,
            storage,
            external,
        };
        tracing::info!(
            deleted = summary.total(),
            core,
            storage,
            external,
            cutoff = %cutoff,
            "Old readings pruned"
        );
        Ok(summary)
    }

    async fn wipe(&self) -> Result<DeleteSummary, StorageError> {
        let mut tx = self.pool.inner().begin().await?;

        let core = sqlx::query("DELETE FROM core_readings")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let storage = sqlx::query("DELETE FROM storage_readings")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let external = sqlx::query("DELETE FROM external_readings")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query(
            "DELETE FROM sqlite_sequence \
             WHERE name IN ('core_readings', 'storage_readings', 'external_readings')",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let summary = DeleteSummary {
            core,
            storage,
            external,
        };
        tracing::warn!(deleted = summary.total(), "All readings wiped");

        self.reclaim_space().await?;
        Ok(summary)
    }

    /// Rebuild the file and fold the WAL back so the freed pages leave the disk.
    async fn reclaim_space(&self) -> Result<(), StorageError> {
        sqlx::query("VACUUM").execute(self.pool.inner()).await?;
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(self.pool.inner())
            .await?;
        tracing::info!("Database file compacted");
        Ok(())
    }
}
