//! Collector Layer
//!
//! Temperature sources behind one capability trait, resolved from
//! configuration once at startup and sampled together on every cycle.
//!
//! # Architecture
//!
//! - [`SensorPlugin`]: Core trait shared by OS probes and external plugins
//! - [`PluginRegistry`]: Resolves configured external sensors to plugins
//! - [`CollectorContext`]: Every source of a cycle, built once
//! - [`CollectionScheduler`]: Runs the periodic cycle and commits readings
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use thermolog::{CollectionScheduler, CollectorContext, StorageBuilder};
//! use thermolog::config::CollectionConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let handles = StorageBuilder::new("/tmp/temperatures.db").build().await?;
//! let context = CollectorContext::from_config(&CollectionConfig::default())?;
//! let interval = Duration::from_secs(300);
//! let scheduler = CollectionScheduler::new(context, handles.writer.clone(), interval);
//! let report = scheduler.run_cycle().await?;
//! println!("{} readings", report.succeeded);
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod command;
mod context;
pub mod external;
mod registry;
mod scheduler;
mod traits;

pub use context::{CollectorContext, CollectorContextBuilder, SourceRole};
pub use registry::{ExternalSensorConfig, PluginKind, PluginLoadError, PluginRegistry};
pub use scheduler::{
    CollectionScheduler, CycleReport, SHUTDOWN_GRACE, SchedulerError, SchedulerHandle,
    SchedulerState,
};
pub use traits::{Sample, SensorError, SensorInfo, SensorPlugin, round_celsius};
