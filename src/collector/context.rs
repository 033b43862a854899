//! Collector context: every source of a cycle, built once at startup.

use std::sync::Arc;
use std::time::Duration;

use strum_macros::{AsRefStr, Display};

use crate::collector::builtin::{CpuProbe, GpuProbe, StorageProbe};
use crate::collector::{PluginLoadError, SensorPlugin};
use crate::config::{CollectionConfig, DEFAULT_PROBE_TIMEOUT};

/// Where a source's sample lands in the cycle's readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SourceRole {
    Cpu,
    Gpu,
    Storage,
    External,
}

/// Sources sampled on every cycle, plus the per-probe timeout.
#[derive(Clone)]
pub struct CollectorContext {
    cpu: Option<Arc<dyn SensorPlugin>>,
    gpu: Option<Arc<dyn SensorPlugin>>,
    storage: Vec<Arc<dyn SensorPlugin>>,
    external: Vec<Arc<dyn SensorPlugin>>,
    probe_timeout: Duration,
}

impl std::fmt::Debug for CollectorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorContext")
            .field("cpu", &self.cpu.is_some())
            .field("gpu", &self.gpu.is_some())
            .field("storage", &self.storage.len())
            .field("external", &self.external.len())
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}

impl CollectorContext {
    /// Build every enabled source from configuration.
    ///
    /// # Errors
    /// Returns `PluginLoadError` for the first external sensor that does not resolve.
    pub fn from_config(config: &CollectionConfig) -> Result<Self, PluginLoadError> {
        let sensors = &config.sensors;
        let probes = &config.probes;
        let timeout = config.probe_timeout;

        let mut builder = Self::builder().probe_timeout(timeout);

        if sensors.cpu_temp {
            builder = builder.cpu(Arc::new(CpuProbe::new(&probes.thermal_zone)));
        }
        if sensors.gpu_temp {
            builder = builder.gpu(Arc::new(GpuProbe::new(&probes.gpu_command, timeout)));
        }
        if sensors.storage_temp {
            for device in &config.storage_devices {
                builder = builder.storage(Arc::new(StorageProbe::new(
                    device,
                    &probes.smartctl_command,
                    timeout,
                )));
            }
        }
        if sensors.external_sensors {
            for plugin in probes.registry().load(&config.external_sensors)? {
                builder = builder.external(plugin);
            }
        }

        let context = builder.build();
        tracing::info!(
            cpu = context.cpu.is_some(),
            gpu = context.gpu.is_some(),
            storage = context.storage.len(),
            external = context.external.len(),
            "Collector context ready"
        );
        Ok(context)
    }

    pub fn builder() -> CollectorContextBuilder {
        CollectorContextBuilder::default()
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// All sources in sampling order: cpu, gpu, storage, external.
    pub fn sources(&self) -> Vec<(SourceRole, Arc<dyn SensorPlugin>)> {
        let mut sources = Vec::with_capacity(self.len());
        sources.extend(self.cpu.iter().map(|p| (SourceRole::Cpu, Arc::clone(p))));
        sources.extend(self.gpu.iter().map(|p| (SourceRole::Gpu, Arc::clone(p))));
        sources.extend(self.storage.iter().map(|p| (SourceRole::Storage, Arc::clone(p))));
        sources.extend(self.external.iter().map(|p| (SourceRole::External, Arc::clone(p))));
        sources
    }

    /// Number of configured sources.
    pub fn len(&self) -> usize {
        usize::from(self.cpu.is_some())
            + usize::from(self.gpu.is_some())
            + self.storage.len()
            + self.external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builder for [`CollectorContext`].
pub struct CollectorContextBuilder {
    cpu: Option<Arc<dyn SensorPlugin>>,
    gpu: Option<Arc<dyn SensorPlugin>>,
    storage: Vec<Arc<dyn SensorPlugin>>,
    external: Vec<Arc<dyn SensorPlugin>>,
    probe_timeout: Duration,
}

impl Default for CollectorContextBuilder {
    fn default() -> Self {
        Self {
            cpu: None,
            gpu: None,
            storage: Vec::new(),
            external: Vec::new(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl CollectorContextBuilder {
    pub fn cpu(mut self, plugin: Arc<dyn SensorPlugin>) -> Self {
        self.cpu = Some(plugin);
        self
    }

    pub fn gpu(mut self, plugin: Arc<dyn SensorPlugin>) -> Self {
        self.gpu = Some(plugin);
        self
    }

    /// Add one storage device source; its name is the device path.
    pub fn storage(mut self, plugin: Arc<dyn SensorPlugin>) -> Self {
        self.storage.push(plugin);
        self
    }

    /// Add one external sensor; its name is the sensor name.
    pub fn external(mut self, plugin: Arc<dyn SensorPlugin>) -> Self {
        self.external.push(plugin);
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn build(self) -> CollectorContext {
        CollectorContext {
            cpu: self.cpu,
            gpu: self.gpu,
            storage: self.storage,
            external: self.external,
            probe_timeout: self.probe_timeout,
        }
    }
}
