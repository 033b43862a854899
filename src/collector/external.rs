//! External sensor plugins.
//!
//! - [`Ds18b20Plugin`]: 1-Wire digital thermometer via the `w1_therm` sysfs interface
//! - [`DhtPlugin`]: DHT11/DHT22 via the kernel `dht11` IIO driver

mod dht;
mod ds18b20;

pub use dht::{DEFAULT_IIO_DEVICES_DIR, DhtModel, DhtPlugin, MIN_READ_INTERVAL};
pub use ds18b20::{DEFAULT_W1_DEVICES_DIR, Ds18b20Plugin};
