//! Storage device temperature through `smartctl`.
//!
//! Each configured device is its own probe, so one failing disk never hides
//! the others. The model name is captured from `smartctl -i` on every read
//! and falls back to the device path.

use std::path::Path;
use std::time::Duration;

use crate::collector::command::{self, CommandOutput, program_exists};
use crate::collector::{SensorError, SensorInfo, SensorPlugin, Sample};

/// Default diagnostics tool invocation.
pub const DEFAULT_SMARTCTL_COMMAND: &str = "sudo smartctl";

/// Plausible range for the loose NVMe `Temperature: NN Celsius` match.
const NVME_MIN_C: f64 = 20.0;
const NVME_MAX_C: f64 = 100.0;

/// `smartctl` exit status bits 0 and 1: command line or device open failure.
const SMARTCTL_FATAL_BITS: i32 = 0b11;

/// Keys of `smartctl -i` carrying the model name.
const NAME_KEYS: [&str; 3] = ["Device Model", "Model Number", "Product"];

/// Probe for one storage device.
#[derive(Debug, Clone)]
pub struct StorageProbe {
    device_path: String,
    smartctl: Vec<String>,
    timeout: Duration,
}

impl StorageProbe {
    pub fn new(device_path: impl Into<String>, smartctl: &str, timeout: Duration) -> Self {
        Self {
            device_path: device_path.into(),
            smartctl: command::split_command(smartctl),
            timeout,
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    async fn smartctl(&self, args: &[&str]) -> Result<CommandOutput, SensorError> {
        let mut full: Vec<&str> = args.to_vec();
        full.push(&self.device_path);
        let out = command::run(&self.smartctl, &full, self.timeout).await?;
        match out.code {
            Some(code) if code & SMARTCTL_FATAL_BITS == 0 => Ok(out),
            code => Err(SensorError::Command(format!(
                "smartctl {} exited with {code:?}",
                args.join(" ")
            ))),
        }
    }

    async fn device_name(&self) -> String {
        match self.smartctl(&["-i"]).await {
            Ok(out) => parse_device_name(&out.stdout),
            Err(e) => {
                tracing::debug!(
                    device = %self.device_path,
                    error = %e,
                    "Device name lookup failed"
                );
                None
            }
        }
        .unwrap_or_else(|| self.device_path.clone())
    }
}

/// Model name from `smartctl -i` output.
pub(crate) fn parse_device_name(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let value = value.trim();
        (NAME_KEYS.contains(&key.trim()) && !value.is_empty()).then(|| value.to_string())
    })
}

/// Temperature from `smartctl -A` text output.
///
/// SATA: raw value (10th column) of the `Temperature_Celsius` attribute.
/// NVMe: first number on a `Temperature ... Celsius` line within 20..=100.
pub(crate) fn parse_attributes_text(output: &str) -> Option<f64> {
    for line in output.lines() {
        if line.contains("Temperature_Celsius") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if let Some(v) = parts.get(9).and_then(|p| p.parse::<f64>().ok()) {
                return Some(v);
            }
            continue;
        }
        if line.contains("Temperature") && (line.contains("Celsius") || line.contains("°C")) {
            let found = line
                .split_whitespace()
                .filter_map(|p| p.parse::<f64>().ok())
                .find(|v| (NVME_MIN_C..=NVME_MAX_C).contains(v));
            if found.is_some() {
                return found;
            }
        }
    }
    None
}

/// Temperature from `smartctl -A -j` JSON output.
pub(crate) fn parse_attributes_json(output: &str) -> Result<Option<f64>, SensorError> {
    let data: serde_json::Value = serde_json::from_str(output)
        .map_err(|e| SensorError::Parse(format!("smartctl json: {e}")))?;

    if let Some(current) = data.pointer("/temperature/current").and_then(|v| v.as_f64()) {
        return Ok(Some(current));
    }

    let raw = data
        .pointer("/ata_smart_attributes/table")
        .and_then(|t| t.as_array())
        .and_then(|table| {
            table
                .iter()
                .find(|attr| attr["name"] == "Temperature_Celsius")
                .and_then(|attr| attr.pointer("/raw/value"))
                .and_then(|v| v.as_f64())
        });
    Ok(raw)
}

#[async_trait::async_trait]
impl SensorPlugin for StorageProbe {
    fn name(&self) -> &str {
        &self.device_path
    }

    fn info(&self) -> SensorInfo {
        SensorInfo::new("storage")
            .detail("device_path", self.device_path.as_str())
            .detail("interface", "smartctl")
    }

    fn is_available(&self) -> bool {
        Path::new(&self.device_path).exists()
            && self.smartctl.first().is_some_and(|p| program_exists(p))
    }

    async fn read_temperature(&self) -> Result<Option<Sample>, SensorError> {
        if !Path::new(&self.device_path).exists() {
            tracing::debug!(device = %self.device_path, "Storage device not present");
            return Ok(None);
        }

        let name = self.device_name().await;
        let text = self.smartctl(&["-A"]).await?;

        let celsius = match parse_attributes_text(&text.stdout) {
            Some(c) => Some(c),
            None => {
                let json = self.smartctl(&["-A", "-j"]).await?;
                parse_attributes_json(&json.stdout)?
            }
        };

        match celsius {
            Some(c) => Ok(Some(Sample::new(c).with_label(name))),
            None => {
                tracing::debug!(
                    device = %self.device_path,
                    name = %name,
                    "No temperature reported"
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::{TempDir, tempdir};

    const SATA_TEXT: &str = "\
ID# ATTRIBUTE_NAME          FLAG     VALUE WORST THRESH TYPE      UPDATED  WHEN_FAILED RAW_VALUE
  9 Power_On_Hours          0x0032   099   099   000    Old_age   Always       -       1234
194 Temperature_Celsius     0x0022   064   055   000    Old_age   Always       -       36
";

    const NVME_TEXT: &str = "\
SMART/Health Information (NVMe Log 0x02)
Critical Warning:                   0x00
Temperature:                        41 Celsius
Available Spare:                    100%
";

    /// Fake `smartctl` answering `-i`, `-A` and `-A -j` from fixed text.
    fn fake_smartctl(dir: &TempDir, info: &str, attrs: &str, json: &str) -> String {
        let script = dir.path().join("smartctl");
        let body = format!(
            "#!/bin/sh\n\
             if [ \"$1\" = \"-i\" ]; then cat <<'X'\n{info}\nX\nexit 0; fi\n\
             if [ \"$2\" = \"-j\" ]; then cat <<'X'\n{json}\nX\nexit 0; fi\n\
             cat <<'X'\n{attrs}\nX\nexit 0\n"
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.display().to_string()
    }

    fn fake_device(dir: &TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, "").unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_parse_device_name() {
        assert_eq!(
            parse_device_name("Model Family: X\nDevice Model:     Samsung SSD 870\n").as_deref(),
            Some("Samsung SSD 870")
        );
        assert_eq!(
            parse_device_name("Model Number:   WD Blue SN570\n").as_deref(),
            Some("WD Blue SN570")
        );
        assert_eq!(parse_device_name("Serial Number: 123\n"), None);
    }

    #[test]
    fn test_parse_attributes_text() {
        assert_eq!(parse_attributes_text(SATA_TEXT), Some(36.0));
        assert_eq!(parse_attributes_text(NVME_TEXT), Some(41.0));
        assert_eq!(parse_attributes_text("Temperature: 5 Celsius\n"), None);
        assert_eq!(parse_attributes_text("nothing here"), None);
    }

    #[test]
    fn test_parse_attributes_json() {
        let nvme = r#"{"temperature": {"current": 43}}"#;
        assert_eq!(parse_attributes_json(nvme).unwrap(), Some(43.0));

        let sata = r#"{"ata_smart_attributes": {"table": [
            {"name": "Power_On_Hours", "raw": {"value": 100}},
            {"name": "Temperature_Celsius", "raw": {"value": 33}}
        ]}}"#;
        assert_eq!(parse_attributes_json(sata).unwrap(), Some(33.0));

        assert_eq!(parse_attributes_json("{}").unwrap(), None);
        assert!(parse_attributes_json("not json").is_err());
    }

    #[tokio::test]
    async fn test_read_with_text_output() {
        let dir = tempdir().unwrap();
        let smartctl = fake_smartctl(&dir, "Device Model: Fake SATA", SATA_TEXT, "{}");
        let device = fake_device(&dir, "sda");

        let probe = StorageProbe::new(&device, &smartctl, Duration::from_secs(5));
        assert!(probe.is_available());
        let sample = probe.read_temperature().await.unwrap().unwrap();
        assert_eq!(sample.celsius, 36.0);
        assert_eq!(sample.label.as_deref(), Some("Fake SATA"));
    }

    #[tokio::test]
    async fn test_read_falls_back_to_json_and_path_name() {
        let dir = tempdir().unwrap();
        let smartctl = fake_smartctl(
            &dir,
            "Serial Number: 1",
            "no temperature lines",
            r#"{"temperature": {"current": 44}}"#,
        );
        let device = fake_device(&dir, "nvme0n1");

        let probe = StorageProbe::new(&device, &smartctl, Duration::from_secs(5));
        let sample = probe.read_temperature().await.unwrap().unwrap();
        assert_eq!(sample.celsius, 44.0);
        assert_eq!(sample.label.as_deref(), Some(device.as_str()));
    }

    #[tokio::test]
    async fn test_missing_device_is_absence() {
        let probe = StorageProbe::new("/dev/nonexistent-disk", "smartctl", Duration::from_secs(1));
        assert!(!probe.is_available());
        assert_eq!(probe.read_temperature().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failing_smartctl_is_error() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("smartctl");
        std::fs::write(&script, "#!/bin/sh\nexit 2\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let device = fake_device(&dir, "sda");

        let smartctl = script.display().to_string();
        let probe = StorageProbe::new(&device, &smartctl, Duration::from_secs(5));
        let err = probe.read_temperature().await.unwrap_err();
        assert!(matches!(err, SensorError::Command(_)));
    }
}
