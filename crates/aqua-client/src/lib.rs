//! HTTP client for the aquarium controller.
//!
//! The controller keeps a flat set of named values per controller (lights,
//! fan, temperatures, top-off pump). This crate reads them and writes
//! updates the way the dashboard does: post the changed values, then
//! re-fetch the state.
//!
//! [`temperature`] logs the tank's water temperature to InfluxDB.

pub mod client;
pub mod connection;
pub mod error;
pub mod state;
pub mod temperature;

pub use client::{ClientConfig, DeviceClient, DEFAULT_CONTROLLER_ID};
pub use connection::{
    normalize_url, resolve_address, AddressError, AddressSource, ControllerAddress, API_URL_ENV,
    DEFAULT_API_PORT, DEFAULT_API_URL,
};
pub use error::{ClientError, Result};
pub use state::{
    light_values, parse_assignment, top_off_values, ControllerState, ControllerValues, LightMode,
};
pub use temperature::{
    median, parse_w1_slave, InfluxWriter, LoggerStats, MeasurementSchedule, MeasurementSink,
    TemperatureLogger, TemperatureSource, W1Sensor, DEFAULT_WRITE_TIMEOUT, W1_DEVICES_DIR,
};
