//! Configuration module for thermolog.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address)
//! - Database settings (path, retention)
//! - Collection settings (interval, enabled sources, storage devices,
//!   external sensors, probe locations)

mod app;
mod validation;

pub use app::{
    AppConfig, CollectionConfig, ConfigSummary, DatabaseConfig, ExternalSensorSummary,
    ProbeConfig, SensorsConfig, ServerConfig,
};
pub use validation::{ConfigError, parse_duration};

// Re-export constants
pub use app::{
    DEFAULT_DB_PATH, DEFAULT_INTERVAL, DEFAULT_PROBE_TIMEOUT, DEFAULT_RETENTION_DAYS,
    MAX_INTERVAL, MIN_INTERVAL,
};
