//! Read side: latest snapshot and per-timestamp reconstruction.
//!
//! The three normalized tables are joined in memory. Each query runs inside
//! one read transaction, so under WAL it sees a single committed state and
//! never waits on an in-flight cycle commit.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;
use crate::storage::types::{
    CompositeRecord, CoreReading, ExternalSensorReading, LatestSnapshot, StorageDeviceReading,
    ts_from_millis,
};

/// Default window of [`QueryAggregator::range`] callers (24 hours).
pub const DEFAULT_RANGE_HOURS: u32 = 24;

/// Largest accepted window (one year).
pub const MAX_RANGE_HOURS: u32 = 24 * 366;

/// Errors surfaced to query callers.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed time range; a client error, never retried.
    #[error("invalid time range: {0}")]
    InvalidRange(String),

    /// Storage failure while reading.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for QueryError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(StorageError::Database(e))
    }
}

type CoreRow = (i64, Option<f64>, Option<f64>);
type StorageRow = (i64, String, String, f64);
type ExternalRow = (i64, String, String, f64, String);

fn core_from_row((ts, cpu_temp, gpu_temp): CoreRow) -> Result<CoreReading, StorageError> {
    Ok(CoreReading {
        timestamp: ts_from_millis(ts)?,
        cpu_temp,
        gpu_temp,
    })
}

fn storage_from_row(
    (ts, device_path, device_name, temperature): StorageRow,
) -> Result<StorageDeviceReading, StorageError> {
    Ok(StorageDeviceReading {
        timestamp: ts_from_millis(ts)?,
        device_path,
        device_name,
        temperature,
    })
}

fn external_from_row(
    (ts, sensor_name, sensor_type, temperature, metadata): ExternalRow,
) -> Result<ExternalSensorReading, StorageError> {
    Ok(ExternalSensorReading {
        timestamp: ts_from_millis(ts)?,
        sensor_name,
        sensor_type,
        temperature,
        metadata: serde_json::from_str(&metadata)?,
    })
}

/// Read-only query facade over the normalized tables.
#[derive(Clone)]
pub struct QueryAggregator {
    pool: SqlitePool,
}

impl std::fmt::Debug for QueryAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryAggregator").finish_non_exhaustive()
    }
}

impl QueryAggregator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Cheap liveness probe of the database.
    pub async fn ping(&self) -> Result<(), QueryError> {
        sqlx::query("SELECT 1").execute(self.pool.inner()).await?;
        Ok(())
    }

    /// Most recent core row plus the newest storage and external rows.
    ///
    /// Each table's "newest" is computed on its own, since sources do not
    /// all succeed on the same cycle.
    pub async fn latest(&self) -> Result<LatestSnapshot, QueryError> {
        let mut tx = self.pool.inner().begin().await?;

        let core: Option<CoreRow> = sqlx::query_as(
            "SELECT ts, cpu_temp, gpu_temp FROM core_readings ORDER BY ts DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let storage: Vec<StorageRow> = sqlx::query_as(
            "SELECT ts, device_path, device_name, temperature FROM storage_readings
             WHERE ts = (SELECT MAX(ts) FROM storage_readings)
             ORDER BY id",
        )
        .fetch_all(&mut *tx)
        .await?;

        let external: Vec<ExternalRow> = sqlx::query_as(
            "SELECT ts, sensor_name, sensor_type, temperature, metadata FROM external_readings
             WHERE ts = (SELECT MAX(ts) FROM external_readings)
             ORDER BY id",
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(LatestSnapshot {
            core: core.map(core_from_row).transpose()?,
            storage_devices: storage
                .into_iter()
                .map(storage_from_row)
                .collect::<Result<_, _>>()?,
            external_sensors: external
                .into_iter()
                .map(external_from_row)
                .collect::<Result<_, _>>()?,
        })
    }

    /// Composite records for `[now - hours, now]`.
    pub async fn range(&self, hours: u32) -> Result<Vec<CompositeRecord>, QueryError> {
        if hours == 0 || hours > MAX_RANGE_HOURS {
            return Err(QueryError::InvalidRange(format!(
                "hours must be between 1 and {MAX_RANGE_HOURS}, got {hours}"
            )));
        }
        let end = Utc::now();
        let start = end - Duration::hours(i64::from(hours));
        self.range_between(start, end).await
    }

    /// Composite records for the inclusive window `[start, end]`.
    ///
    /// One record per core timestamp, ascending. Storage and external rows
    /// are attached to the record of their own timestamp; a device or sensor
    /// without a row at that timestamp has no key in that record.
    pub async fn range_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CompositeRecord>, QueryError> {
        if start > end {
            return Err(QueryError::InvalidRange(format!(
                "start {start} is after end {end}"
            )));
        }
        let (start_ms, end_ms) = (start.timestamp_millis(), end.timestamp_millis());
        let mut tx = self.pool.inner().begin().await?;

        let core: Vec<CoreRow> = sqlx::query_as(
            "SELECT ts, cpu_temp, gpu_temp FROM core_readings
             WHERE ts BETWEEN ? AND ? ORDER BY ts ASC, id ASC",
        )
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(&mut *tx)
        .await?;

        let storage: Vec<StorageRow> = sqlx::query_as(
            "SELECT ts, device_path, device_name, temperature FROM storage_readings
             WHERE ts BETWEEN ? AND ? ORDER BY ts ASC, id ASC",
        )
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(&mut *tx)
        .await?;

        let external: Vec<ExternalRow> = sqlx::query_as(
            "SELECT ts, sensor_name, sensor_type, temperature, metadata FROM external_readings
             WHERE ts BETWEEN ? AND ? ORDER BY ts ASC, id ASC",
        )
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut by_ts: BTreeMap<i64, CompositeRecord> = BTreeMap::new();
        for row in core {
            let ts = row.0;
            let reading = core_from_row(row)?;
            by_ts
                .entry(ts)
                .or_insert_with(|| CompositeRecord::new(&reading));
        }

        for row in storage {
            if let Some(record) = by_ts.get_mut(&row.0) {
                record.add_storage(storage_from_row(row)?);
            }
        }

        for row in external {
            if let Some(record) = by_ts.get_mut(&row.0) {
                record.add_external(external_from_row(row)?);
            }
        }

        Ok(by_ts.into_values().collect())
    }
}
