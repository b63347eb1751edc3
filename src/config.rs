//! Daemon configuration.
//!
//! The YAML file is deserialized into [`Config`] and then validated as a
//! whole. Only a validated `Config` is handed to the rest of the crate, so
//! downstream code can rely on unique pins, non-empty labels and positive
//! durations without re-checking.

use crate::error::{PiMoodError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const DEFAULT_FLASH_TIME_MS: u64 = 200;
const DEFAULT_BOUNCETIME_MS: u64 = 200;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5000;
const DEFAULT_LIVENESS_INTERVAL_S: u64 = 300;
const DEFAULT_MEASUREMENT_NAME: &str = "pi_mood";
const DEFAULT_INFLUX_HOST: &str = "localhost";
const DEFAULT_INFLUX_PORT: u16 = 8086;
const DEFAULT_INFLUX_USER: &str = "root";

/// One physical push-button.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ButtonSpec {
    /// GPIO pin the button is wired to
    pub pin: u8,
    /// Field key written to the time-series store
    pub label: String,
    /// Field value written to the time-series store
    pub value: i64,
}

impl ButtonSpec {
    pub fn new(pin: u8, label: impl Into<String>, value: i64) -> Self {
        Self {
            pin,
            label: label.into(),
            value,
        }
    }
}

/// The indicator output as configured in YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedConfig {
    /// GPIO pin the LED is wired to
    pub pin: u8,
    #[serde(default = "default_flash_time_ms")]
    pub flash_time_ms: u64,
}

/// Validated indicator description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorSpec {
    pub pin: u8,
    pub flash_duration: Duration,
}

/// Connection settings for the InfluxDB 1.x HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InfluxDbConfig {
    pub database_name: String,
    #[serde(default = "default_measurement_name")]
    pub measurement_name: String,
    #[serde(default = "default_influx_host")]
    pub host: String,
    #[serde(default = "default_influx_port")]
    pub port: u16,
    #[serde(default = "default_influx_user")]
    pub username: String,
    #[serde(default = "default_influx_user", skip_serializing)]
    pub password: String,
    /// Upper bound on a single write; unbounded when absent
    #[serde(default)]
    pub upload_timeout_ms: Option<u64>,
}

impl InfluxDbConfig {
    /// Create a configuration for the given database with default connection settings.
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            measurement_name: default_measurement_name(),
            host: default_influx_host(),
            port: default_influx_port(),
            username: default_influx_user(),
            password: default_influx_user(),
            upload_timeout_ms: None,
        }
    }

    /// Set the measurement name points are written under.
    pub fn with_measurement_name(mut self, name: impl Into<String>) -> Self {
        self.measurement_name = name.into();
        self
    }

    /// Set the InfluxDB host and port.
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Bound each write to the given number of milliseconds.
    pub fn with_upload_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.upload_timeout_ms = timeout_ms;
        self
    }

    /// Base URL of the HTTP API.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn upload_timeout(&self) -> Option<Duration> {
        self.upload_timeout_ms.map(Duration::from_millis)
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub buttons: Vec<ButtonSpec>,
    pub led: LedConfig,
    /// Milliseconds after an accepted press during which further edges from
    /// the same button are ignored
    #[serde(default = "default_bouncetime_ms")]
    pub bouncetime: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_liveness_interval_s")]
    pub liveness_interval_s: u64,
    pub influxdb: InfluxDbConfig,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PiMoodError::config_error(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml_str(&raw)?;

        match serde_json::to_string(&config) {
            Ok(json) => info!("Loaded configuration as: {}", json),
            Err(_) => info!("Loaded configuration from {}", path.display()),
        }

        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw)
            .map_err(|e| PiMoodError::config_error(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every cross-field rule. Returns the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.buttons.is_empty() {
            return Err(PiMoodError::config_error(
                "buttons: at least one button must be configured",
            ));
        }

        let mut seen = HashSet::new();
        for (i, button) in self.buttons.iter().enumerate() {
            if button.pin == 0 {
                return Err(PiMoodError::config_error(format!(
                    "buttons[{}].pin: must be a positive pin number",
                    i
                )));
            }
            if button.label.trim().is_empty() {
                return Err(PiMoodError::config_error(format!(
                    "buttons[{}].label: must not be empty",
                    i
                )));
            }
            if !seen.insert(button.pin) {
                return Err(PiMoodError::config_error(format!(
                    "buttons[{}].pin: pin {} is already used by another button",
                    i, button.pin
                )));
            }
        }

        if self.led.pin == 0 {
            return Err(PiMoodError::config_error(
                "led.pin: must be a positive pin number",
            ));
        }
        if seen.contains(&self.led.pin) {
            return Err(PiMoodError::config_error(format!(
                "led.pin: pin {} is already used by a button",
                self.led.pin
            )));
        }
        if self.led.flash_time_ms == 0 {
            return Err(PiMoodError::config_error(
                "led.flash_time_ms: must be greater than zero",
            ));
        }
        if self.liveness_interval_s == 0 {
            return Err(PiMoodError::config_error(
                "liveness_interval_s: must be greater than zero",
            ));
        }
        if self.influxdb.database_name.trim().is_empty() {
            return Err(PiMoodError::config_error(
                "influxdb.database_name: must not be empty",
            ));
        }
        if self.influxdb.measurement_name.trim().is_empty() {
            return Err(PiMoodError::config_error(
                "influxdb.measurement_name: must not be empty",
            ));
        }

        Ok(())
    }

    pub fn button_specs(&self) -> &[ButtonSpec] {
        &self.buttons
    }

    pub fn indicator(&self) -> IndicatorSpec {
        IndicatorSpec {
            pin: self.led.pin,
            flash_duration: Duration::from_millis(self.led.flash_time_ms),
        }
    }

    pub fn bouncetime(&self) -> Duration {
        Duration::from_millis(self.bouncetime)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_s)
    }
}

fn default_flash_time_ms() -> u64 {
    DEFAULT_FLASH_TIME_MS
}

fn default_bouncetime_ms() -> u64 {
    DEFAULT_BOUNCETIME_MS
}

fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

fn default_liveness_interval_s() -> u64 {
    DEFAULT_LIVENESS_INTERVAL_S
}

fn default_measurement_name() -> String {
    DEFAULT_MEASUREMENT_NAME.to_string()
}

fn default_influx_host() -> String {
    DEFAULT_INFLUX_HOST.to_string()
}

fn default_influx_port() -> u16 {
    DEFAULT_INFLUX_PORT
}

fn default_influx_user() -> String {
    DEFAULT_INFLUX_USER.to_string()
}
