//! Configuration management for Elektra
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files with support for environment variable overrides.

use crate::error::{ElektraError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

fn default_true() -> bool {
    true
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// CEZ account credentials (overridable via CEZ_EMAIL / CEZ_PASSWORD)
    #[serde(default)]
    pub cez: CezConfig,

    /// Electrometers to poll
    #[serde(default)]
    pub meters: Vec<MeterConfig>,

    /// Polling loop and retry configuration
    #[serde(default)]
    pub polling: PollingConfig,

    /// MQTT broker configuration
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Persisted session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Timezone the portal reports in
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "Europe/Prague".to_string()
}

/// CEZ account credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CezConfig {
    /// Account email
    #[serde(default)]
    pub email: String,

    /// Account password
    #[serde(default)]
    pub password: String,
}

/// One electrometer to poll
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Vendor-assigned electrometer id, used as routing key and topic segment
    pub electrometer_id: String,

    /// Supply-point EAN; empty means no HDO tariff feed for this meter
    #[serde(default)]
    pub ean: String,
}

/// Polling loop and retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Seconds between poll cycles
    pub poll_interval_seconds: u64,

    /// Attempt budget per report fetch
    pub max_retries: u32,

    /// Base delay for exponential backoff between attempts
    pub retry_base_delay_seconds: f64,
}

/// MQTT broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host
    pub host: String,

    /// Broker TCP port
    pub port: u16,

    /// Username (empty for anonymous)
    pub username: String,

    /// Password
    pub password: String,

    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
}

/// Persisted session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Path of the persisted session state file
    pub state_file: String,

    /// Fallback session TTL in hours when no cookie carries an expiry
    pub ttl_hours: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file or directory; empty disables file logging
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    #[serde(default = "default_true")]
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 900,
            max_retries: 3,
            retry_base_delay_seconds: 5.0,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            keep_alive_secs: 30,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_file: "/data/elektra_session.json".to_string(),
            ttl_hours: crate::session::DEFAULT_SESSION_TTL_HOURS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: String::new(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cez: CezConfig::default(),
            meters: Vec::new(),
            polling: PollingConfig::default(),
            mqtt: MqttConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
            timezone: default_timezone(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load() -> Result<Self> {
        let default_paths = [
            "elektra_config.yaml",
            "/data/elektra_config.yaml",
            "/etc/elektra/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration plus environment
        let mut config = Config::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (add-on style deployment)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("MQTT_HOST") {
            if !host.is_empty() {
                self.mqtt.host = host;
            }
        }
        if let Ok(port) = std::env::var("MQTT_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.mqtt.port = port;
            }
        }
        if let Ok(user) = std::env::var("MQTT_USER") {
            self.mqtt.username = user;
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            self.mqtt.password = password;
        }

        // A single meter may be configured entirely from the environment
        if self.meters.is_empty() {
            if let Ok(meter_id) = std::env::var("CEZ_ELECTROMETER_ID") {
                if !meter_id.is_empty() {
                    self.meters.push(MeterConfig {
                        electrometer_id: meter_id,
                        ean: std::env::var("CEZ_EAN").unwrap_or_default(),
                    });
                }
            }
        }
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.meters.is_empty() {
            return Err(ElektraError::validation(
                "meters",
                "At least one electrometer must be configured",
            ));
        }

        let mut seen_ids = std::collections::HashSet::new();
        let mut seen_eans = std::collections::HashSet::new();
        for meter in &self.meters {
            if meter.electrometer_id.is_empty() {
                return Err(ElektraError::validation(
                    "meters.electrometer_id",
                    "Electrometer id cannot be empty",
                ));
            }
            if !seen_ids.insert(meter.electrometer_id.as_str()) {
                return Err(ElektraError::validation(
                    "meters.electrometer_id",
                    "Electrometer ids must be unique",
                ));
            }
            if !meter.ean.is_empty() && !seen_eans.insert(meter.ean.as_str()) {
                return Err(ElektraError::validation(
                    "meters.ean",
                    "Non-empty EANs must be unique",
                ));
            }
        }

        if self.mqtt.host.is_empty() {
            return Err(ElektraError::validation(
                "mqtt.host",
                "Broker host cannot be empty",
            ));
        }

        if self.mqtt.port == 0 {
            return Err(ElektraError::validation(
                "mqtt.port",
                "Port must be greater than 0",
            ));
        }

        if self.polling.poll_interval_seconds == 0 {
            return Err(ElektraError::validation(
                "polling.poll_interval_seconds",
                "Must be greater than 0",
            ));
        }

        if self.polling.max_retries == 0 {
            return Err(ElektraError::validation(
                "polling.max_retries",
                "Must be at least 1",
            ));
        }

        if chrono_tz::Tz::from_str(&self.timezone).is_err() {
            return Err(ElektraError::validation(
                "timezone",
                "Unknown timezone identifier",
            ));
        }

        Ok(())
    }

    /// Portal-local timezone
    pub fn portal_timezone(&self) -> chrono_tz::Tz {
        chrono_tz::Tz::from_str(&self.timezone).unwrap_or(chrono_tz::Europe::Prague)
    }
}
