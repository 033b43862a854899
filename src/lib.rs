//! thermolog - Temperature Collection and History
//!
//! Periodically samples temperature from on-chip sensors, storage devices
//! and pluggable external probes, persists readings as a normalized time
//! series in SQLite, and rebuilds dense per-timestamp records for queries.
//!
//! # Architecture
//!
//! - **Collector**: sensor plugins, plugin registry, periodic scheduler
//! - **Storage**: SQLite persistence with a single writer task and WAL readers
//! - **Query**: latest snapshot and composite range reconstruction
//! - **Server**: read-only JSON API
//!
//! # Example
//!
//! ```rust,no_run
//! use thermolog::{CollectionScheduler, CollectorContext, StorageBuilder};
//! use thermolog::config::AppConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load("config/config.yaml")?;
//! let handles = StorageBuilder::new(&config.database.path).build().await?;
//! let context = CollectorContext::from_config(&config.collection)?;
//!
//! let interval = config.collection.interval;
//! let scheduler = CollectionScheduler::new(context, handles.writer.clone(), interval)
//!     .with_retention(handles.admin.clone(), config.database.retention_days)
//!     .spawn();
//!
//! let snapshot = handles.aggregator.latest().await?;
//! println!("{:?}", snapshot.core);
//!
//! scheduler.shutdown().await?;
//! handles.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod server;
pub mod storage;

pub use collector::{
    CollectionScheduler, CollectorContext, CycleReport, ExternalSensorConfig, PluginKind,
    PluginLoadError, PluginRegistry, Sample, SchedulerError, SchedulerHandle, SchedulerState,
    SensorError, SensorInfo, SensorPlugin,
};
pub use storage::{
    CompositeRecord, LatestSnapshot, QueryAggregator, QueryError, StorageAdmin, StorageBuilder,
    StorageError, StorageHandles, StorageWriter,
};
