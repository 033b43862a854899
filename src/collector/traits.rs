//! Core sensor traits and types.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while reading a single source.
///
/// Every variant is transient from the scheduler's point of view: the source
/// contributes no row for this cycle and is retried on the next one.
#[derive(Debug, Error)]
pub enum SensorError {
    /// Filesystem or process I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Subprocess ran but reported failure.
    #[error("command failed: {0}")]
    Command(String),

    /// Output could not be interpreted.
    #[error("parse error: {0}")]
    Parse(String),

    /// Value parsed but outside the sensor's physical range.
    #[error("reading {value} out of range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
}

/// One temperature sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Degrees Celsius, rounded to two decimals.
    pub celsius: f64,
    /// Identity captured from the device at read time (storage device model).
    pub label: Option<String>,
}

impl Sample {
    pub fn new(celsius: f64) -> Self {
        Self {
            celsius: round_celsius(celsius),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Static description of a source.
///
/// `details` is persisted verbatim as the metadata of external readings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorInfo {
    /// Sensor type, e.g. `DS18B20` or `CPU`.
    pub kind: String,
    pub details: BTreeMap<String, serde_json::Value>,
}

impl SensorInfo {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            details: BTreeMap::new(),
        }
    }

    /// Add one descriptive field.
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Details as a JSON object.
    pub fn to_metadata(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.details
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// Capability set shared by every temperature source.
///
/// Built-in OS probes and external plugins implement the same contract:
///
/// - `Ok(Some(sample))`: a reading for this cycle
/// - `Ok(None)`: routine absence (device not present, read too soon); logged at debug
/// - `Err(SensorError)`: transient failure; logged at warn, no row
///
/// Misconfiguration never reaches this trait: it is rejected when the plugin
/// is built.
#[async_trait::async_trait]
pub trait SensorPlugin: std::fmt::Debug + Send + Sync + 'static {
    /// Configured identity of this source (sensor name or device path).
    fn name(&self) -> &str;

    /// Static descriptive metadata.
    fn info(&self) -> SensorInfo;

    /// Cheap, side-effect-free liveness check.
    fn is_available(&self) -> bool;

    /// Take one reading.
    async fn read_temperature(&self) -> Result<Option<Sample>, SensorError>;
}

/// Round to two decimals.
pub fn round_celsius(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Reject values outside `[min, max]`.
pub(crate) fn check_range(value: f64, min: f64, max: f64) -> Result<f64, SensorError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(SensorError::OutOfRange { value, min, max })
    }
}
