//! DS18B20 1-Wire temperature sensor.

use std::path::PathBuf;

use crate::collector::traits::check_range;
use crate::collector::{SensorError, SensorInfo, SensorPlugin, Sample};

/// Default 1-Wire sysfs directory.
pub const DEFAULT_W1_DEVICES_DIR: &str = "/sys/bus/w1/devices";

/// Family code prefix of DS18B20 devices on the bus.
const FAMILY_PREFIX: &str = "28-";

const MIN_C: f64 = -55.0;
const MAX_C: f64 = 125.0;

/// DS18B20 sensor on the 1-Wire bus.
///
/// Without a configured `device_id`, the first `28-*` device found on the
/// bus is used; the lookup is repeated on every read so a sensor plugged in
/// after startup is picked up.
#[derive(Debug, Clone)]
pub struct Ds18b20Plugin {
    name: String,
    device_id: Option<String>,
    base_dir: PathBuf,
}

impl Ds18b20Plugin {
    pub fn new(
        name: impl Into<String>,
        device_id: Option<String>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            device_id,
            base_dir: base_dir.into(),
        }
    }

    /// Device directory name in use, configured or discovered.
    fn resolve_device_id(&self) -> Option<String> {
        if let Some(id) = &self.device_id {
            return Some(id.clone());
        }
        let mut ids: Vec<String> = std::fs::read_dir(&self.base_dir)
            .ok()?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n.starts_with(FAMILY_PREFIX))
            .collect();
        ids.sort();
        ids.into_iter().next()
    }

    fn device_file(&self) -> Option<PathBuf> {
        self.resolve_device_id()
            .map(|id| self.base_dir.join(id).join("w1_slave"))
    }
}

/// Parse the two-line `w1_slave` content.
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
pub(crate) fn parse_w1_slave(content: &str) -> Result<f64, SensorError> {
    let mut lines = content.lines();
    let crc = lines.next().unwrap_or_default();
    if !crc.trim_end().ends_with("YES") {
        return Err(SensorError::Parse("crc check failed".to_string()));
    }
    let raw = lines
        .next()
        .and_then(|l| l.split_once("t="))
        .map(|(_, v)| v.trim())
        .ok_or_else(|| SensorError::Parse("missing t= field".to_string()))?;
    let millis: f64 = raw
        .parse()
        .map_err(|_| SensorError::Parse(format!("invalid t= value: {raw:?}")))?;
    check_range(millis / 1000.0, MIN_C, MAX_C)
}

#[async_trait::async_trait]
impl SensorPlugin for Ds18b20Plugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> SensorInfo {
        let mut info = SensorInfo::new("DS18B20")
            .detail("interface", "1-Wire")
            .detail("range", "-55°C to +125°C")
            .detail("accuracy", "±0.5°C");
        if let Some(id) = self.resolve_device_id() {
            let file = self.base_dir.join(&id).join("w1_slave");
            info = info
                .detail("device_id", id)
                .detail("device_file", file.display().to_string());
        }
        info
    }

    fn is_available(&self) -> bool {
        self.base_dir.is_dir() && self.device_file().is_some_and(|f| f.is_file())
    }

    async fn read_temperature(&self) -> Result<Option<Sample>, SensorError> {
        let Some(file) = self.device_file().filter(|f| f.is_file()) else {
            tracing::debug!(
                sensor = %self.name,
                dir = %self.base_dir.display(),
                "DS18B20 device not found"
            );
            return Ok(None);
        };
        let content = tokio::fs::read_to_string(&file).await?;
        Ok(Some(Sample::new(parse_w1_slave(&content)?)))
    }
}
