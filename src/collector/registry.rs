//! Plugin registry: configured plugin name to sensor instance.
//!
//! Dispatch is a closed tagged enum ([`PluginKind`]); adding a plugin means
//! adding a variant and its constructor arm in [`PluginRegistry::build`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

use crate::collector::SensorPlugin;
use crate::collector::external::{
    DEFAULT_IIO_DEVICES_DIR, DEFAULT_W1_DEVICES_DIR, DhtModel, DhtPlugin, Ds18b20Plugin,
};

/// Known external plugin types, by configured name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PluginKind {
    Ds18b20,
    Dht11,
    /// Also accepted as `am2302`, the wired DHT22 module.
    #[strum(to_string = "dht22", serialize = "am2302")]
    Dht22,
}

/// Errors raised while turning configuration into plugin instances.
///
/// Always fatal at startup; every variant names the offending sensor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PluginLoadError {
    #[error("sensor '{sensor}': unknown plugin '{plugin}'")]
    UnknownPlugin { sensor: String, plugin: String },

    #[error("sensor '{sensor}': missing required parameter '{parameter}'")]
    MissingParameter { sensor: String, parameter: String },

    #[error("sensor '{sensor}': invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        sensor: String,
        parameter: String,
        reason: String,
    },
}

/// One `collection.external_sensors` entry.
///
/// Plugin-specific parameters (`device_id`, `gpio_pin`, ...) sit next to
/// `plugin` and are kept as raw YAML until the plugin validates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSensorConfig {
    pub plugin: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_yaml::Value>,
}

impl ExternalSensorConfig {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            description: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_yaml::Value>,
    ) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Resolves external sensor entries into live plugin instances.
#[derive(Debug, Clone)]
pub struct PluginRegistry {
    w1_devices_dir: PathBuf,
    iio_devices_dir: PathBuf,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_W1_DEVICES_DIR, DEFAULT_IIO_DEVICES_DIR)
    }
}

impl PluginRegistry {
    /// Registry reading 1-Wire and IIO devices from the given sysfs roots.
    pub fn new(w1_devices_dir: impl Into<PathBuf>, iio_devices_dir: impl Into<PathBuf>) -> Self {
        Self {
            w1_devices_dir: w1_devices_dir.into(),
            iio_devices_dir: iio_devices_dir.into(),
        }
    }

    /// Build one plugin instance for sensor `name`.
    pub fn build(
        &self,
        name: &str,
        config: &ExternalSensorConfig,
    ) -> Result<Arc<dyn SensorPlugin>, PluginLoadError> {
        if name.trim().is_empty() {
            return Err(PluginLoadError::InvalidParameter {
                sensor: name.to_string(),
                parameter: "name".to_string(),
                reason: "sensor name cannot be empty".to_string(),
            });
        }

        let kind = PluginKind::from_str(config.plugin.trim()).map_err(|_| {
            PluginLoadError::UnknownPlugin {
                sensor: name.to_string(),
                plugin: config.plugin.clone(),
            }
        })?;

        let plugin: Arc<dyn SensorPlugin> = match kind {
            PluginKind::Ds18b20 => {
                let device_id = optional_string(name, config, "device_id")?;
                Arc::new(Ds18b20Plugin::new(name, device_id, &self.w1_devices_dir))
            }
            PluginKind::Dht11 | PluginKind::Dht22 => {
                let pin = required_pin(name, config)?;
                let model = if kind == PluginKind::Dht11 {
                    DhtModel::Dht11
                } else {
                    DhtModel::Dht22
                };
                Arc::new(DhtPlugin::new(name, model, pin, &self.iio_devices_dir))
            }
        };

        tracing::debug!(sensor = %name, plugin = %kind, "Plugin built");
        Ok(plugin)
    }

    /// Build every configured sensor, in name order.
    ///
    /// Fails on the first invalid entry.
    pub fn load(
        &self,
        sensors: &BTreeMap<String, ExternalSensorConfig>,
    ) -> Result<Vec<Arc<dyn SensorPlugin>>, PluginLoadError> {
        sensors
            .iter()
            .map(|(name, config)| self.build(name, config))
            .collect()
    }
}

fn optional_string(
    sensor: &str,
    config: &ExternalSensorConfig,
    parameter: &str,
) -> Result<Option<String>, PluginLoadError> {
    match config.params.get(parameter) {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(PluginLoadError::InvalidParameter {
            sensor: sensor.to_string(),
            parameter: parameter.to_string(),
            reason: "expected a string".to_string(),
        }),
    }
}

fn required_pin(sensor: &str, config: &ExternalSensorConfig) -> Result<u32, PluginLoadError> {
    const PARAM: &str = "gpio_pin";
    let invalid = |reason: &str| PluginLoadError::InvalidParameter {
        sensor: sensor.to_string(),
        parameter: PARAM.to_string(),
        reason: reason.to_string(),
    };

    let pin = match config.params.get(PARAM) {
        None | Some(serde_yaml::Value::Null) => {
            return Err(PluginLoadError::MissingParameter {
                sensor: sensor.to_string(),
                parameter: PARAM.to_string(),
            });
        }
        Some(serde_yaml::Value::Number(n)) => n.as_u64(),
        Some(serde_yaml::Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
    }
    .ok_or_else(|| invalid("expected a non-negative integer"))?;

    u32::try_from(pin).map_err(|_| invalid("pin number too large"))
}
