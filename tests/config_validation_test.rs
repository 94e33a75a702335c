//! Configuration loading and validation through the public API.

use greenhouse_gateway::config::{GatewayConfig, ENV_PREFIX};
use std::io::Write;
use std::path::PathBuf;

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config").join("gateway.toml")
}

fn write_config(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file
}

#[test]
fn shipped_config_matches_defaults() {
    let config = GatewayConfig::load_from(shipped_config()).unwrap();
    config.validate().unwrap();

    let defaults = GatewayConfig::default();
    assert_eq!(config.intake, defaults.intake);
    assert_eq!(config.reporting, defaults.reporting);
    assert_eq!(config.storage, defaults.storage);
    assert_eq!(config.driver, defaults.driver);
}

#[test]
fn environment_overrides_file() {
    let key = format!("{ENV_PREFIX}MQTT__PORT");
    std::env::set_var(&key, "2883");
    let loaded = GatewayConfig::load_from(shipped_config());
    std::env::remove_var(&key);

    let config = loaded.unwrap();
    assert_eq!(config.mqtt.port, 2883);
    assert_eq!(config.mqtt.sensor_topic, "greenhouse/sensors");
}

#[test]
fn test_type_mismatch_is_a_load_error() {
    let file = write_config("[intake]\ncapacity = \"lots\"\n");
    assert!(GatewayConfig::load_from(file.path()).is_err());
}

#[test]
fn test_zero_upload_interval_rejected() {
    let file = write_config("[reporting]\nupload_interval_secs = 0\n");
    let config = GatewayConfig::load_from(file.path()).unwrap();
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("upload_interval_secs"));
}

#[test]
fn test_empty_topic_rejected() {
    let file = write_config("[mqtt]\ncommand_topic = \"  \"\n");
    let config = GatewayConfig::load_from(file.path()).unwrap();
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("mqtt.command_topic"));
}

#[test]
fn test_invalid_log_format_rejected() {
    let file = write_config("[application]\nlog_format = \"xml\"\n");
    let config = GatewayConfig::load_from(file.path()).unwrap();
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("log_format"));
}
