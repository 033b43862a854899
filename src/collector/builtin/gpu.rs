//! GPU temperature from the firmware query tool.

use std::time::Duration;

use crate::collector::command::{self, program_exists};
use crate::collector::{SensorError, SensorInfo, SensorPlugin, Sample};

/// Default query tool.
pub const DEFAULT_GPU_COMMAND: &str = "vcgencmd";

/// Runs `<command> measure_temp` and parses `temp=48.3'C`.
#[derive(Debug, Clone)]
pub struct GpuProbe {
    command: Vec<String>,
    timeout: Duration,
}

impl GpuProbe {
    pub fn new(command_line: &str, timeout: Duration) -> Self {
        Self {
            command: command::split_command(command_line),
            timeout,
        }
    }
}

pub(crate) fn parse_measure_temp(output: &str) -> Result<f64, SensorError> {
    let value = output
        .trim()
        .split_once('=')
        .map(|(_, rest)| rest.trim_end_matches("'C").trim_end_matches("°C").trim())
        .ok_or_else(|| SensorError::Parse(format!("unexpected output: {:?}", output.trim())))?;
    value
        .parse::<f64>()
        .map_err(|_| SensorError::Parse(format!("not a temperature: {value:?}")))
}

#[async_trait::async_trait]
impl SensorPlugin for GpuProbe {
    fn name(&self) -> &str {
        "gpu"
    }

    fn info(&self) -> SensorInfo {
        SensorInfo::new("GPU")
            .detail("command", self.command.join(" "))
            .detail("interface", "firmware")
    }

    fn is_available(&self) -> bool {
        self.command.first().is_some_and(|p| program_exists(p))
    }

    async fn read_temperature(&self) -> Result<Option<Sample>, SensorError> {
        let out = command::run(&self.command, &["measure_temp"], self.timeout).await?;
        if !out.success() {
            return Err(SensorError::Command(format!(
                "exit code {:?}: {}",
                out.code,
                out.stderr.trim()
            )));
        }
        Ok(Some(Sample::new(parse_measure_temp(&out.stdout)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_measure_temp() {
        assert_eq!(parse_measure_temp("temp=48.3'C\n").unwrap(), 48.3);
        assert_eq!(parse_measure_temp("temp=51.0°C").unwrap(), 51.0);
        assert!(parse_measure_temp("error: no such command").is_err());
        assert!(parse_measure_temp("temp=n/a").is_err());
    }

    #[test]
    fn test_missing_tool_is_unavailable() {
        let probe = GpuProbe::new("/nonexistent/vcgencmd", Duration::from_secs(1));
        assert!(!probe.is_available());
    }

    #[tokio::test]
    async fn test_read_via_echo() {
        // `echo measure_temp` prints the argument, which is not a temperature.
        let probe = GpuProbe::new("echo", Duration::from_secs(5));
        assert!(probe.is_available());
        let err = probe.read_temperature().await.unwrap_err();
        assert!(matches!(err, SensorError::Parse(_)));
    }
}
