//! Built-in OS probes.
//!
//! - [`CpuProbe`]: kernel thermal zone file (millidegrees)
//! - [`GpuProbe`]: firmware query tool (`vcgencmd measure_temp`)
//! - [`StorageProbe`]: one storage device through `smartctl`

mod cpu;
mod gpu;
mod storage;

pub use cpu::{CpuProbe, DEFAULT_THERMAL_ZONE};
pub use gpu::{DEFAULT_GPU_COMMAND, GpuProbe};
pub use storage::{DEFAULT_SMARTCTL_COMMAND, StorageProbe};
