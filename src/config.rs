//! Gateway configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (default `config/gateway.toml`, optional)
//! 2. environment variables prefixed with `GREENHOUSE_`, nested with `__`
//!
//! Every section has defaults, so an empty file (or no file) yields a runnable
//! configuration pointed at a broker on localhost.
//!
//! # Example
//! ```no_run
//! use greenhouse_gateway::config::GatewayConfig;
//!
//! let config = GatewayConfig::load()?;
//! config.validate()?;
//! println!("Broker: {}:{}", config.mqtt.broker, config.mqtt.port);
//! # Ok::<(), greenhouse_gateway::error::GatewayError>(())
//! ```

use crate::error::{AppResult, GatewayError};
use crate::reporting::PASSTHROUGH_FIELDS;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/gateway.toml";

/// Prefix for environment overrides, e.g. `GREENHOUSE_MQTT__BROKER`.
pub const ENV_PREFIX: &str = "GREENHOUSE_";

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Broker connection and topics
    pub mqtt: MqttConfig,
    /// Intake queue sizing
    pub intake: IntakeConfig,
    /// Durable store and snapshot locations
    pub storage: StorageConfig,
    /// Remote reporting endpoint and window settings
    pub reporting: ReportingConfig,
    /// Desired command document
    pub control: ControlConfig,
    /// Enrichment settings
    pub enrich: EnrichConfig,
    /// Driver loop cadence
    pub driver: DriverConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
    /// Directory for `gateway.log`; console only when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Greenhouse Gateway".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            log_dir: None,
        }
    }
}

/// MQTT broker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host name or address
    pub broker: String,
    /// Broker port
    pub port: u16,
    /// Client identifier presented to the broker
    pub client_id: String,
    /// Optional user name
    pub username: Option<String>,
    /// Optional password (only used with a user name)
    pub password: Option<String>,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
    /// Topic the field device publishes sensor packets on
    pub sensor_topic: String,
    /// Topic the field device listens on for setpoints
    pub command_topic: String,
    /// Topic for the gateway heartbeat
    pub status_topic: String,
    /// Topic carrying precomputed daily summaries
    pub summary_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "greenhouse-gateway".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 60,
            sensor_topic: "greenhouse/sensors".to_string(),
            command_topic: "greenhouse/commands".to_string(),
            status_topic: "greenhouse/jetson/status".to_string(),
            summary_topic: "greenhouse/summary".to_string(),
        }
    }
}

/// Intake queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntakeConfig {
    /// Maximum number of raw packets buffered between the receive path and the driver loop
    pub capacity: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Pretty JSON copy of the most recent enriched record
    pub latest_snapshot_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("db/greenhouse.db"),
            latest_snapshot_path: PathBuf::from("runtime/latest_packet.json"),
        }
    }
}

/// Reporting endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportingConfig {
    /// Spreadsheet web-app URL; uploads are skipped when unset
    pub endpoint: Option<String>,
    /// Length of the aggregation window in seconds
    pub upload_interval_secs: u64,
    /// Upper bound for one upload request in seconds
    pub request_timeout_secs: u64,
    /// Fields reduced to their numeric mean
    pub averaging_fields: Vec<String>,
    /// Fields reduced to their most frequent value
    pub mode_fields: Vec<String>,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            upload_interval_secs: 300,
            request_timeout_secs: 30,
            averaging_fields: [
                "inside_temp_f",
                "inside_humidity_rh",
                "inside_dew_point_f",
                "inside_vpd_kpa",
                "inside_brightness_lux",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            mode_fields: ["circulation_fan_pwm", "exhaust_fan_pwm", "grow_light_pwm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ReportingConfig {
    /// Aggregation window length.
    pub fn upload_interval(&self) -> Duration {
        Duration::from_secs(self.upload_interval_secs)
    }

    /// Upload request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Command document configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    /// JSON document holding the desired actuator setpoints
    pub commands_path: PathBuf,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            commands_path: PathBuf::from("runtime/commands.json"),
        }
    }
}

/// Enrichment configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnrichConfig {
    /// Fixed local offset for time context; host local time when unset
    pub utc_offset_minutes: Option<i32>,
}

/// Driver loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    /// Tick period in milliseconds
    pub tick_interval_ms: u64,
    /// Heartbeat period in seconds
    pub heartbeat_interval_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            heartbeat_interval_secs: 10,
        }
    }
}

impl DriverConfig {
    /// Tick period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Heartbeat period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

impl GatewayConfig {
    /// Load configuration from `config/gateway.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `GREENHOUSE_`
    /// Example: `GREENHOUSE_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::figment(path.as_ref()).extract().map_err(GatewayError::from)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(GatewayError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        let format = self.application.log_format.to_lowercase();
        if !VALID_LOG_FORMATS.contains(&format.as_str()) {
            return Err(GatewayError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_LOG_FORMATS.join(", ")
            )));
        }

        if self.intake.capacity == 0 {
            return Err(GatewayError::Configuration(
                "intake.capacity must be greater than 0".to_string(),
            ));
        }

        if self.driver.tick_interval_ms == 0 || self.driver.heartbeat_interval_secs == 0 {
            return Err(GatewayError::Configuration(
                "driver intervals must be greater than 0".to_string(),
            ));
        }

        if self.reporting.upload_interval_secs == 0 {
            return Err(GatewayError::Configuration(
                "reporting.upload_interval_secs must be greater than 0".to_string(),
            ));
        }

        let topics = [
            ("sensor_topic", &self.mqtt.sensor_topic),
            ("command_topic", &self.mqtt.command_topic),
            ("status_topic", &self.mqtt.status_topic),
            ("summary_topic", &self.mqtt.summary_topic),
        ];
        for (name, topic) in topics {
            if topic.trim().is_empty() {
                return Err(GatewayError::Configuration(format!(
                    "mqtt.{name} must not be empty"
                )));
            }
        }

        if let Some(field) = self
            .reporting
            .mode_fields
            .iter()
            .find(|f| self.reporting.averaging_fields.contains(f))
        {
            return Err(GatewayError::Configuration(format!(
                "Field '{field}' is listed as both an averaging and a mode field"
            )));
        }

        if let Some(field) = self
            .reporting
            .averaging_fields
            .iter()
            .chain(&self.reporting.mode_fields)
            .find(|f| PASSTHROUGH_FIELDS.contains(&f.as_str()))
        {
            return Err(GatewayError::Configuration(format!(
                "Field '{field}' is a passthrough field and cannot be averaged or mode-reduced"
            )));
        }

        if let Some(offset) = self.enrich.utc_offset_minutes {
            if offset.unsigned_abs() >= 18 * 60 {
                return Err(GatewayError::Configuration(format!(
                    "enrich.utc_offset_minutes {offset} is outside +/-18h"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.intake.capacity, 100);
        assert_eq!(config.reporting.upload_interval(), Duration::from_secs(300));
        assert_eq!(config.driver.heartbeat_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[mqtt]
broker = "10.0.0.5"

[reporting]
upload_interval_secs = 60
mode_fields = ["season_state"]
"#
        )
        .unwrap();

        let config = GatewayConfig::load_from(file.path()).unwrap();
        assert_eq!(config.mqtt.broker, "10.0.0.5");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.reporting.upload_interval_secs, 60);
        assert_eq!(config.reporting.mode_fields, vec!["season_state".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = GatewayConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = GatewayConfig::default();
        config.intake.capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(GatewayError::Configuration(_))
        ));
    }

    #[test]
    fn test_overlapping_aggregation_fields_rejected() {
        let mut config = GatewayConfig::default();
        config.reporting.mode_fields.push("inside_temp_f".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("inside_temp_f"));
    }

    #[test]
    fn test_offset_out_of_range_rejected() {
        let mut config = GatewayConfig::default();
        config.enrich.utc_offset_minutes = Some(-19 * 60);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_passthrough_field_reduction_rejected() {
        let mut config = GatewayConfig::default();
        config.reporting.averaging_fields.push("outside_brightness_raw".to_string());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("outside_brightness_raw"));
    }

    #[test]
    fn test_extreme_offsets_rejected_without_overflow() {
        let mut config = GatewayConfig::default();
        for offset in [i32::MIN, i32::MAX] {
            config.enrich.utc_offset_minutes = Some(offset);
            assert!(config.validate().is_err());
        }
        config.enrich.utc_offset_minutes = Some(-7 * 60);
        assert!(config.validate().is_ok());
    }
}
