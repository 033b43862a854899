//! Storage Layer
//!
//! SQLite persistence of the three normalized reading tables with
//! read/write separation:
//! - **Writer**: one Tokio task owns every mutation, fed through an mpsc channel
//! - **Readers**: pooled connections in WAL mode, never blocked by the writer
//!
//! # Components
//!
//! - [`StorageWriter`]: atomic per-cycle commits
//! - [`QueryAggregator`]: latest snapshot and composite range queries
//! - [`StorageAdmin`]: retention pruning, full wipe, status
//! - [`StorageBuilder`] / [`StorageHandles`]: initialization and lifecycle management

mod actor;
mod aggregator;
mod builder;
pub mod db;
mod error;
mod facades;
mod types;

pub use aggregator::{DEFAULT_RANGE_HOURS, MAX_RANGE_HOURS, QueryAggregator, QueryError};
pub use builder::{StorageBuilder, StorageHandles};
pub use error::StorageError;
pub use facades::{StorageAdmin, StorageWriter};
pub use types::{
    CompositeEntry, CompositeRecord, CoreReading, CycleReadings, DeleteSummary,
    EXTERNAL_KEY_PREFIX, ExternalEntry, ExternalSensorReading, LatestSnapshot, ReadingTable,
    STORAGE_KEY_PREFIX, StorageDeviceReading, StorageEntry, StorageStatus, TableStatus,
    WriteSummary, external_key, storage_key,
};
