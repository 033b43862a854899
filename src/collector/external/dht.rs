//! DHT11/DHT22 temperature and humidity sensors.
//!
//! Read through the kernel `dht11` IIO driver, which handles both models.
//! Each sensor is a device-tree overlay bound to one GPIO pin
//! (`dtoverlay=dht11,gpiopin=4`), exposed as `iio:deviceN` with
//! `in_temp_input` in millidegrees Celsius.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use strum_macros::Display;

use crate::collector::traits::check_range;
use crate::collector::{SensorError, SensorInfo, SensorPlugin, Sample};

/// Default IIO sysfs directory.
pub const DEFAULT_IIO_DEVICES_DIR: &str = "/sys/bus/iio/devices";

/// Minimum spacing between two reads of the same sensor.
pub const MIN_READ_INTERVAL: Duration = Duration::from_secs(2);

const DRIVER_NAME: &str = "dht11";

/// Sensor model; decides the accepted range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DhtModel {
    #[strum(serialize = "DHT11")]
    Dht11,
    #[strum(serialize = "DHT22")]
    Dht22,
}

impl DhtModel {
    /// Operating range in Celsius.
    pub fn range(&self) -> (f64, f64) {
        match self {
            Self::Dht11 => (0.0, 50.0),
            Self::Dht22 => (-40.0, 80.0),
        }
    }

    fn accuracy(&self) -> &'static str {
        match self {
            Self::Dht11 => "±2°C",
            Self::Dht22 => "±0.5°C",
        }
    }

    fn humidity_range(&self) -> &'static str {
        match self {
            Self::Dht11 => "20% to 90% RH",
            Self::Dht22 => "0% to 100% RH",
        }
    }

    fn humidity_accuracy(&self) -> &'static str {
        match self {
            Self::Dht11 => "±5% RH",
            Self::Dht22 => "±2-5% RH",
        }
    }
}

/// One DHT sensor on a GPIO pin.
#[derive(Debug)]
pub struct DhtPlugin {
    name: String,
    model: DhtModel,
    gpio_pin: u32,
    iio_dir: PathBuf,
    last_read: Mutex<Option<Instant>>,
}

impl DhtPlugin {
    pub fn new(
        name: impl Into<String>,
        model: DhtModel,
        gpio_pin: u32,
        iio_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            model,
            gpio_pin,
            iio_dir: iio_dir.into(),
            last_read: Mutex::new(None),
        }
    }

    pub fn model(&self) -> DhtModel {
        self.model
    }

    pub fn gpio_pin(&self) -> u32 {
        self.gpio_pin
    }

    /// IIO device bound to this pin.
    ///
    /// Matches the device-tree node `dht11@<pin in hex>`. A single dht11
    /// device whose node carries no unit address is used as-is; one bound
    /// to another pin never is.
    fn find_device(&self) -> Option<PathBuf> {
        let devices: Vec<(PathBuf, Option<String>)> = std::fs::read_dir(&self.iio_dir)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| is_dht_device(p))
            .map(|p| {
                let node = node_name(&p);
                (p, node)
            })
            .collect();

        let suffix = format!("@{:x}", self.gpio_pin);
        let by_pin = devices
            .iter()
            .find(|(_, node)| node.as_deref().is_some_and(|n| n.ends_with(&suffix)));

        match (by_pin, devices.as_slice()) {
            (Some((p, _)), _) => Some(p.clone()),
            (None, [(only, node)]) if !node.as_deref().is_some_and(|n| n.contains('@')) => {
                Some(only.clone())
            }
            _ => None,
        }
    }

    /// `false` when the last successful read was too recent.
    fn read_allowed(&self) -> bool {
        let Ok(last) = self.last_read.lock() else {
            return true;
        };
        !last.is_some_and(|t| t.elapsed() < MIN_READ_INTERVAL)
    }

    fn mark_read(&self) {
        if let Ok(mut last) = self.last_read.lock() {
            *last = Some(Instant::now());
        }
    }
}

fn is_dht_device(path: &Path) -> bool {
    std::fs::read_to_string(path.join("name")).is_ok_and(|n| n.trim() == DRIVER_NAME)
}

/// Basename of the device-tree node behind an IIO device.
fn node_name(device: &Path) -> Option<String> {
    std::fs::read_link(device.join("of_node"))
        .ok()
        .and_then(|target| target.file_name().map(|n| n.to_string_lossy().into_owned()))
}

#[async_trait::async_trait]
impl SensorPlugin for DhtPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> SensorInfo {
        let (min, max) = self.model.range();
        SensorInfo::new(self.model.to_string())
            .detail("interface", "GPIO")
            .detail("gpio_pin", self.gpio_pin)
            .detail("temp_range", format!("{min}°C to {max}°C"))
            .detail("temp_accuracy", self.model.accuracy())
            .detail("humidity_range", self.model.humidity_range())
            .detail("humidity_accuracy", self.model.humidity_accuracy())
            .detail("measures", "Temperature and Humidity")
    }

    fn is_available(&self) -> bool {
        self.find_device()
            .is_some_and(|d| d.join("in_temp_input").is_file())
    }

    async fn read_temperature(&self) -> Result<Option<Sample>, SensorError> {
        if !self.read_allowed() {
            tracing::debug!(sensor = %self.name, "Too soon since last DHT reading, skipping");
            return Ok(None);
        }
        let Some(device) = self.find_device() else {
            tracing::debug!(sensor = %self.name, pin = self.gpio_pin, "DHT device not found");
            return Ok(None);
        };

        let raw = tokio::fs::read_to_string(device.join("in_temp_input")).await?;
        let millis: f64 = raw
            .trim()
            .parse()
            .map_err(|_| SensorError::Parse(format!("invalid in_temp_input: {:?}", raw.trim())))?;
        self.mark_read();

        let (min, max) = self.model.range();
        let celsius = check_range(millis / 1000.0, min, max)?;
        Ok(Some(Sample::new(celsius)))
    }
}
