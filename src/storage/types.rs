//! Core data types for the storage layer.
//!
//! This module defines the rows of the three normalized tables and the
//! read-side shapes rebuilt from them:
//!
//! - [`CoreReading`]: CPU/GPU row, at most one per cycle
//! - [`StorageDeviceReading`]: one row per storage device that answered
//! - [`ExternalSensorReading`]: one row per external plugin that answered
//! - [`CycleReadings`]: everything one cycle produced, sharing one timestamp
//! - [`LatestSnapshot`] / [`CompositeRecord`]: query results

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::storage::StorageError;

/// Key prefix for storage device entries in composite records.
pub const STORAGE_KEY_PREFIX: &str = "storage_";

/// Key prefix for external sensor entries in composite records.
pub const EXTERNAL_KEY_PREFIX: &str = "external_";

/// The three normalized reading tables.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, EnumString, Display, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReadingTable {
    /// CPU/GPU readings.
    CoreReadings,
    /// Per storage device readings.
    StorageReadings,
    /// Per external sensor readings.
    ExternalReadings,
}

/// CPU/GPU reading of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreReading {
    /// Cycle timestamp.
    pub timestamp: DateTime<Utc>,
    /// CPU temperature in Celsius, if the probe answered.
    pub cpu_temp: Option<f64>,
    /// GPU temperature in Celsius, if the probe answered.
    pub gpu_temp: Option<f64>,
}

/// Storage device reading.
///
/// `device_name` is whatever the device reported at read time and is never
/// rewritten afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageDeviceReading {
    pub timestamp: DateTime<Utc>,
    pub device_path: String,
    pub device_name: String,
    pub temperature: f64,
}

/// External sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSensorReading {
    pub timestamp: DateTime<Utc>,
    pub sensor_name: String,
    pub sensor_type: String,
    pub temperature: f64,
    /// Plugin-specific metadata (device id, GPIO pin, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// All readings produced by one collection cycle.
///
/// Every reading is stamped with the cycle timestamp given at construction,
/// so rows of one cycle always line up.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReadings {
    timestamp: DateTime<Utc>,
    cpu_temp: Option<f64>,
    gpu_temp: Option<f64>,
    storage: Vec<StorageDeviceReading>,
    external: Vec<ExternalSensorReading>,
}

impl CycleReadings {
    /// Start an empty cycle at `timestamp`.
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cpu_temp: None,
            gpu_temp: None,
            storage: Vec::new(),
            external: Vec::new(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn set_cpu_temp(&mut self, celsius: f64) {
        self.cpu_temp = Some(celsius);
    }

    pub fn set_gpu_temp(&mut self, celsius: f64) {
        self.gpu_temp = Some(celsius);
    }

    /// Record a storage device reading. A missing name falls back to the path.
    pub fn push_storage(
        &mut self,
        device_path: impl Into<String>,
        device_name: Option<String>,
        temperature: f64,
    ) {
        let device_path = device_path.into();
        let device_name = device_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| device_path.clone());
        self.storage.push(StorageDeviceReading {
            timestamp: self.timestamp,
            device_path,
            device_name,
            temperature,
        });
    }

    /// Record an external sensor reading.
    pub fn push_external(
        &mut self,
        sensor_name: impl Into<String>,
        sensor_type: impl Into<String>,
        temperature: f64,
        metadata: serde_json::Value,
    ) {
        self.external.push(ExternalSensorReading {
            timestamp: self.timestamp,
            sensor_name: sensor_name.into(),
            sensor_type: sensor_type.into(),
            temperature,
            metadata,
        });
    }

    /// The core row, present only when CPU or GPU produced a value.
    pub fn core(&self) -> Option<CoreReading> {
        if self.cpu_temp.is_none() && self.gpu_temp.is_none() {
            return None;
        }
        Some(CoreReading {
            timestamp: self.timestamp,
            cpu_temp: self.cpu_temp,
            gpu_temp: self.gpu_temp,
        })
    }

    pub fn storage(&self) -> &[StorageDeviceReading] {
        &self.storage
    }

    pub fn external(&self) -> &[ExternalSensorReading] {
        &self.external
    }

    /// Total number of rows this cycle will write.
    pub fn row_count(&self) -> usize {
        usize::from(self.core().is_some()) + self.storage.len() + self.external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }
}

/// Rows written by one cycle commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub core: bool,
    pub storage: usize,
    pub external: usize,
}

impl WriteSummary {
    pub fn total(&self) -> usize {
        usize::from(self.core) + self.storage + self.external
    }
}

/// Rows deleted per table by a prune or wipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub core: u64,
    pub storage: u64,
    pub external: u64,
}

impl DeleteSummary {
    pub fn total(&self) -> u64 {
        self.core + self.storage + self.external
    }
}

/// Row count and time span of one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStatus {
    pub table: ReadingTable,
    pub rows: i64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Storage introspection result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStatus {
    pub tables: Vec<TableStatus>,
    /// Size of the main database file, if it could be read.
    pub size_bytes: Option<u64>,
}

impl StorageStatus {
    pub fn total_rows(&self) -> i64 {
        self.tables.iter().map(|t| t.rows).sum()
    }

    /// Newest timestamp across all tables.
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.tables.iter().filter_map(|t| t.newest).max()
    }
}

/// Latest reading per category.
///
/// Each list holds the rows at the newest timestamp of its own table, so the
/// three parts may come from different cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatestSnapshot {
    pub core: Option<CoreReading>,
    pub storage_devices: Vec<StorageDeviceReading>,
    pub external_sensors: Vec<ExternalSensorReading>,
}

impl LatestSnapshot {
    pub fn is_empty(&self) -> bool {
        self.core.is_none() && self.storage_devices.is_empty() && self.external_sensors.is_empty()
    }
}

/// Storage device entry inside a composite record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub temperature: f64,
    pub device_name: String,
    pub device_path: String,
}

/// External sensor entry inside a composite record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalEntry {
    pub temperature: f64,
    pub sensor_type: String,
    pub sensor_name: String,
}

/// Dynamically keyed part of a composite record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompositeEntry {
    Storage(StorageEntry),
    External(ExternalEntry),
}

impl CompositeEntry {
    pub fn temperature(&self) -> f64 {
        match self {
            Self::Storage(s) => s.temperature,
            Self::External(e) => e.temperature,
        }
    }
}

/// Per-timestamp view rebuilt from the normalized tables.
///
/// Serializes flat: `timestamp`, `cpu_temp`, `gpu_temp` plus one key per
/// device/sensor that produced a row at this timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeRecord {
    pub timestamp: DateTime<Utc>,
    pub cpu_temp: Option<f64>,
    pub gpu_temp: Option<f64>,
    #[serde(flatten)]
    pub entries: BTreeMap<String, CompositeEntry>,
}

impl CompositeRecord {
    pub fn new(core: &CoreReading) -> Self {
        Self {
            timestamp: core.timestamp,
            cpu_temp: core.cpu_temp,
            gpu_temp: core.gpu_temp,
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&CompositeEntry> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Dynamic keys of this record, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub(crate) fn add_storage(&mut self, reading: StorageDeviceReading) {
        self.entries.insert(
            storage_key(&reading.device_path),
            CompositeEntry::Storage(StorageEntry {
                temperature: reading.temperature,
                device_name: reading.device_name,
                device_path: reading.device_path,
            }),
        );
    }

    pub(crate) fn add_external(&mut self, reading: ExternalSensorReading) {
        self.entries.insert(
            external_key(&reading.sensor_name),
            CompositeEntry::External(ExternalEntry {
                temperature: reading.temperature,
                sensor_type: reading.sensor_type,
                sensor_name: reading.sensor_name,
            }),
        );
    }
}

/// Composite key of a storage device: `/dev/nvme0n1` -> `storage__dev_nvme0n1`.
pub fn storage_key(device_path: &str) -> String {
    let normalized: String = device_path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{STORAGE_KEY_PREFIX}{normalized}")
}

/// Composite key of an external sensor.
pub fn external_key(sensor_name: &str) -> String {
    format!("{EXTERNAL_KEY_PREFIX}{sensor_name}")
}

/// Convert a stored millisecond timestamp.
pub(crate) fn ts_from_millis(ms: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::InvalidData(format!("timestamp out of range: {ms}")))
}
