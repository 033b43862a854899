//! Application configuration structures.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collector::builtin::{
    DEFAULT_GPU_COMMAND, DEFAULT_SMARTCTL_COMMAND, DEFAULT_THERMAL_ZONE,
};
use crate::collector::external::{DEFAULT_IIO_DEVICES_DIR, DEFAULT_W1_DEVICES_DIR};
use crate::collector::{ExternalSensorConfig, PluginRegistry, command};
use crate::storage::storage_key;

use super::validation::ConfigError;

// =============================================================================
// Constants
// =============================================================================

/// Default collection interval (5 minutes).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Shortest accepted collection interval.
pub const MIN_INTERVAL: Duration = Duration::from_secs(60);

/// Longest accepted collection interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default bound on each subprocess-backed probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default retention in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Default database file.
pub const DEFAULT_DB_PATH: &str = "data/temperatures.db";

fn default_true() -> bool {
    true
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_probe_timeout() -> Duration {
    DEFAULT_PROBE_TIMEOUT
}

fn default_storage_devices() -> Vec<String> {
    ["/dev/nvme0n1", "/dev/sda", "/dev/sdb", "/dev/mmcblk0"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 8080).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path.
    pub path: PathBuf,

    /// Rows older than this many days are pruned; 0 disables automatic pruning.
    pub retention_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DB_PATH),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

// =============================================================================
// Collection Configuration
// =============================================================================

/// Enabled source families.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorsConfig {
    #[serde(default = "default_true")]
    pub cpu_temp: bool,
    #[serde(default = "default_true")]
    pub gpu_temp: bool,
    #[serde(default = "default_true")]
    pub storage_temp: bool,
    #[serde(default)]
    pub external_sensors: bool,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            cpu_temp: true,
            gpu_temp: true,
            storage_temp: true,
            external_sensors: false,
        }
    }
}

/// Locations of the OS interfaces read by the probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Thermal zone file in millidegrees.
    pub thermal_zone: PathBuf,
    /// GPU query tool, run with `measure_temp`.
    pub gpu_command: String,
    /// Storage diagnostics tool, possibly prefixed with `sudo`.
    pub smartctl_command: String,
    /// 1-Wire sysfs devices directory.
    pub w1_devices_dir: PathBuf,
    /// IIO sysfs devices directory.
    pub iio_devices_dir: PathBuf,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            thermal_zone: PathBuf::from(DEFAULT_THERMAL_ZONE),
            gpu_command: DEFAULT_GPU_COMMAND.to_string(),
            smartctl_command: DEFAULT_SMARTCTL_COMMAND.to_string(),
            w1_devices_dir: PathBuf::from(DEFAULT_W1_DEVICES_DIR),
            iio_devices_dir: PathBuf::from(DEFAULT_IIO_DEVICES_DIR),
        }
    }
}

impl ProbeConfig {
    /// Plugin registry reading from these locations.
    pub fn registry(&self) -> PluginRegistry {
        PluginRegistry::new(&self.w1_devices_dir, &self.iio_devices_dir)
    }
}

/// Collection cycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Time between cycle starts (default: 5m, bounds: 1m to 60m).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Bound on each probe (default: 10s, must be below `interval`).
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,

    #[serde(default)]
    pub sensors: SensorsConfig,

    /// Storage device paths, each sampled every cycle.
    #[serde(default = "default_storage_devices")]
    pub storage_devices: Vec<String>,

    /// External sensors by unique name.
    #[serde(default)]
    pub external_sensors: BTreeMap<String, ExternalSensorConfig>,

    #[serde(default)]
    pub probes: ProbeConfig,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            sensors: SensorsConfig::default(),
            storage_devices: default_storage_devices(),
            external_sensors: BTreeMap::new(),
            probes: ProbeConfig::default(),
        }
    }
}

impl CollectionConfig {
    /// Validate timing, device list and external sensor entries.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval < MIN_INTERVAL || self.interval > MAX_INTERVAL {
            return Err(ConfigError::ValidationError(format!(
                "collection interval must be between {} and {}, got {}",
                humantime::format_duration(MIN_INTERVAL),
                humantime::format_duration(MAX_INTERVAL),
                humantime::format_duration(self.interval),
            )));
        }

        if self.probe_timeout.is_zero() || self.probe_timeout >= self.interval {
            return Err(ConfigError::ValidationError(format!(
                "probe_timeout must be positive and shorter than the interval, got {}",
                humantime::format_duration(self.probe_timeout),
            )));
        }

        // Paths sharing a composite key would overwrite each other in range records.
        let mut seen: HashMap<String, &str> = HashMap::new();
        for device in &self.storage_devices {
            if device.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "storage device path cannot be empty".to_string(),
                ));
            }
            if let Some(first) = seen.insert(storage_key(device), device.as_str()) {
                return Err(ConfigError::ValidationError(if first == device.as_str() {
                    format!("duplicate storage device: '{device}'")
                } else {
                    format!("duplicate storage device: '{device}' and '{first}' share a key")
                }));
            }
        }

        for (field, value) in [
            ("gpu_command", &self.probes.gpu_command),
            ("smartctl_command", &self.probes.smartctl_command),
        ] {
            if command::split_command(value).is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "probes.{field} cannot be empty"
                )));
            }
        }

        self.probes.registry().load(&self.external_sensors)?;
        Ok(())
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Web server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Collection configuration.
    #[serde(default)]
    pub collection: CollectionConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid and
    /// `ConfigError::PluginLoad` if an external sensor entry does not resolve.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server bind address
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        // Validate server port
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }

        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "database path cannot be empty".to_string(),
            ));
        }

        self.collection.validate()
    }

    /// Read-only view exposed to API clients.
    pub fn summary(&self) -> ConfigSummary {
        let c = &self.collection;
        ConfigSummary {
            interval: humantime::format_duration(c.interval).to_string(),
            interval_minutes: c.interval.as_secs() / 60,
            sensors: c.sensors.clone(),
            storage_devices: c.storage_devices.clone(),
            external_sensors: c
                .external_sensors
                .iter()
                .map(|(name, s)| ExternalSensorSummary {
                    name: name.clone(),
                    plugin: s.plugin.clone(),
                    description: s.description.clone(),
                })
                .collect(),
            retention_days: self.database.retention_days,
        }
    }
}

/// External sensor as shown in [`ConfigSummary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalSensorSummary {
    pub name: String,
    pub plugin: String,
    pub description: Option<String>,
}

/// Configuration summary served by the API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSummary {
    pub interval: String,
    pub interval_minutes: u64,
    pub sensors: SensorsConfig,
    pub storage_devices: Vec<String>,
    pub external_sensors: Vec<ExternalSensorSummary>,
    pub retention_days: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_YAML: &str = r#"
server:
  bind: "127.0.0.1"
  port: 9090
database:
  path: /tmp/thermolog-test.db
  retention_days: 7
collection:
  interval: 2m
  probe_timeout: 5s
  sensors:
    cpu_temp: true
    gpu_temp: false
    storage_temp: true
    external_sensors: true
  storage_devices:
    - /dev/nvme0n1
    - /dev/sda
  external_sensors:
    outdoor_temp:
      plugin: ds18b20
      device_id: "28-000005e2fdc3"
      description: North wall
    attic:
      plugin: dht22
      gpio_pin: 4
"#;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.collection.interval, DEFAULT_INTERVAL);
        assert_eq!(config.collection.probe_timeout, DEFAULT_PROBE_TIMEOUT);
        assert_eq!(config.database.retention_days, DEFAULT_RETENTION_DAYS);
        assert_eq!(config.database.path, PathBuf::from(DEFAULT_DB_PATH));
        assert!(config.collection.sensors.cpu_temp);
        assert!(!config.collection.sensors.external_sensors);
        assert_eq!(config.collection.storage_devices.len(), 4);
    }

    #[test]
    fn test_full_document() {
        let config = AppConfig::from_yaml(FULL_YAML).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.collection.interval, Duration::from_secs(120));
        assert!(!config.collection.sensors.gpu_temp);
        assert_eq!(config.collection.external_sensors.len(), 2);
        assert_eq!(config.collection.external_sensors["attic"].plugin, "dht22");
    }

    #[test]
    fn test_interval_bounds() {
        let mut config = AppConfig::default();
        config.collection.interval = Duration::from_secs(30);
        config.collection.probe_timeout = Duration::from_secs(5);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("interval must be between"));

        config.collection.interval = Duration::from_secs(61 * 60);
        assert!(config.validate().is_err());

        config.collection.interval = MAX_INTERVAL;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_probe_timeout_must_be_below_interval() {
        let mut config = AppConfig::default();
        config.collection.interval = MIN_INTERVAL;
        config.collection.probe_timeout = MIN_INTERVAL;
        assert!(config.validate().is_err());

        config.collection.probe_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_storage_device_rejected() {
        let mut config = AppConfig::default();
        config.collection.storage_devices = vec!["/dev/sda".into(), "/dev/sda".into()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate storage device"));
    }

    #[test]
    fn test_colliding_storage_keys_rejected() {
        let mut config = AppConfig::default();
        config.collection.storage_devices =
            vec!["/dev/disk/by-id/a-b".into(), "/dev/disk/by-id/a_b".into()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("share a key"));
        assert!(err.to_string().contains("/dev/disk/by-id/a-b"));
    }

    #[test]
    fn test_unknown_plugin_is_fatal() {
        let yaml = r#"
collection:
  external_sensors:
    garage:
      plugin: bme280
"#;
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::PluginLoad(_)));
    }

    #[test]
    fn test_missing_gpio_pin_is_fatal() {
        let yaml = r#"
collection:
  external_sensors:
    attic:
      plugin: dht11
"#;
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("gpio_pin"));
    }

    #[test]
    fn test_config_validation_invalid_bind_address() {
        let mut config = AppConfig::default();
        config.server.bind = "not-an-ip".to_string();
        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("invalid server bind address")
        );
    }

    #[test]
    fn test_summary() {
        let config = AppConfig::from_yaml(FULL_YAML).unwrap();
        let summary = config.summary();
        assert_eq!(summary.interval, "2m");
        assert_eq!(summary.interval_minutes, 2);
        assert_eq!(summary.retention_days, 7);
        assert_eq!(summary.storage_devices, vec!["/dev/nvme0n1", "/dev/sda"]);

        let names: Vec<_> = summary.external_sensors.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["attic", "outdoor_temp"]);
        assert_eq!(
            summary.external_sensors[1].description.as_deref(),
            Some("North wall")
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, FULL_YAML).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.database.retention_days, 7);

        let err = AppConfig::load(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
