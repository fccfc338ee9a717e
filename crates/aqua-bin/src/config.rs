//! Configuration for the `aquarium` CLI, loaded with Figment.
//!
//! Sources, later ones overriding earlier ones:
//! 1. `aquarium.toml` (or the `--config` path); a missing file is fine
//! 2. Environment variables prefixed with `AQUARIUM_`, sections separated by
//!    a double underscore, e.g. `AQUARIUM_CAMERA__TARGET_FPS=12`
//!
//! Every field has a default, so an empty configuration is valid.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "aquarium.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "AQUARIUM_";

/// Configuration loading or validation failure.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File or environment could not be read into the config structure.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Values were read but are not usable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AquariumConfig {
    /// Controller API settings
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Camera stream settings
    #[serde(default)]
    pub camera: CameraConfig,
    /// Water temperature logging
    #[serde(default)]
    pub temperature: TemperatureConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Controller API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// API base URL; unset falls through to `AQUARIUM_API_URL` and the default
    #[serde(default)]
    pub api_url: Option<String>,
    /// Controller whose values are read and written
    #[serde(default = "default_controller_id")]
    pub controller_id: String,
    /// Whole-request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Connect timeout in milliseconds (HTTP and websocket)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Camera stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Camera websocket
    #[serde(default = "default_websocket_url")]
    pub websocket_url: String,
    /// Target frame rate (1-120)
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
    /// Text message that requests one frame
    #[serde(default = "default_pull_token")]
    pub pull_token: String,
    /// Keep the latest frame in this file
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

/// Water temperature logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureConfig {
    /// InfluxDB server
    #[serde(default = "default_influx_url")]
    pub influx_url: String,
    /// Database the points are written to
    #[serde(default = "default_database")]
    pub database: String,
    /// Seconds between two written points
    #[serde(default = "default_send_interval")]
    pub send_interval_secs: u64,
    /// Readings aggregated (median) into one point
    #[serde(default = "default_aggregated_count")]
    pub aggregated_count: u32,
    /// `w1_slave` file of the probe; discovered under /sys/bus/w1 when unset
    #[serde(default)]
    pub sensor_path: Option<PathBuf>,
    /// Timeout of one write in milliseconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level used when `RUST_LOG` is not set (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_controller_id() -> String {
    aqua_client::DEFAULT_CONTROLLER_ID.to_string()
}

fn default_request_timeout() -> u64 {
    5000
}

fn default_connect_timeout() -> u64 {
    3000
}

fn default_websocket_url() -> String {
    aqua_stream::DEFAULT_STREAM_URL.to_string()
}

fn default_target_fps() -> u32 {
    24
}

fn default_pull_token() -> String {
    aqua_stream::DEFAULT_PULL_TOKEN.to_string()
}

fn default_influx_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_database() -> String {
    "aquarium".to_string()
}

fn default_send_interval() -> u64 {
    180
}

fn default_aggregated_count() -> u32 {
    6
}

fn default_write_timeout() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            controller_id: default_controller_id(),
            request_timeout_ms: default_request_timeout(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            websocket_url: default_websocket_url(),
            target_fps: default_target_fps(),
            pull_token: default_pull_token(),
            snapshot_path: None,
        }
    }
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            influx_url: default_influx_url(),
            database: default_database(),
            send_interval_secs: default_send_interval(),
            aggregated_count: default_aggregated_count(),
            sensor_path: None,
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ControllerConfig {
    /// HTTP client settings for these timeouts.
    #[must_use]
    pub fn client_config(&self) -> aqua_client::ClientConfig {
        aqua_client::ClientConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

impl AquariumConfig {
    /// Load from `path` plus environment overrides and validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if !(1..=120).contains(&self.camera.target_fps) {
            return Err(ConfigError::Invalid(format!(
                "Invalid camera.target_fps {}. Must be 1-120",
                self.camera.target_fps
            )));
        }

        if self.camera.pull_token.is_empty() {
            return Err(ConfigError::Invalid(
                "camera.pull_token cannot be empty".to_string(),
            ));
        }

        if self.controller.controller_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "controller.controller_id cannot be empty".to_string(),
            ));
        }

        if self.controller.request_timeout_ms == 0 || self.controller.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "controller timeouts must be greater than zero".to_string(),
            ));
        }

        let temperature = &self.temperature;
        if temperature.send_interval_secs == 0 || temperature.aggregated_count == 0 {
            return Err(ConfigError::Invalid(
                "temperature interval and aggregated count must be greater than zero".to_string(),
            ));
        }

        if temperature.database.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "temperature.database cannot be empty".to_string(),
            ));
        }

        if temperature.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "temperature.write_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
