//! CPU temperature from the kernel thermal interface.

use std::path::{Path, PathBuf};

use crate::collector::{SensorError, SensorInfo, SensorPlugin, Sample};

/// Default thermal zone file.
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Reads a thermal zone file holding millidegrees Celsius.
#[derive(Debug, Clone)]
pub struct CpuProbe {
    path: PathBuf,
}

impl CpuProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for CpuProbe {
    fn default() -> Self {
        Self::new(DEFAULT_THERMAL_ZONE)
    }
}

pub(crate) fn parse_millidegrees(raw: &str) -> Result<f64, SensorError> {
    let trimmed = raw.trim();
    trimmed
        .parse::<f64>()
        .map(|m| m / 1000.0)
        .map_err(|_| SensorError::Parse(format!("not a millidegree value: {trimmed:?}")))
}

#[async_trait::async_trait]
impl SensorPlugin for CpuProbe {
    fn name(&self) -> &str {
        "cpu"
    }

    fn info(&self) -> SensorInfo {
        SensorInfo::new("CPU")
            .detail("source", self.path.display().to_string())
            .detail("interface", "thermal_zone")
    }

    fn is_available(&self) -> bool {
        self.path.is_file()
    }

    async fn read_temperature(&self) -> Result<Option<Sample>, SensorError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Sample::new(parse_millidegrees(&raw)?)))
    }
}
