//! Mapping from whatever the field device sends onto the recognized schema.
//!
//! [`normalize`] is the contract boundary for the rest of the pipeline: unknown keys
//! are dropped, recognized keys are copied verbatim when present and left out when
//! not. The timestamp is the single field that is always populated.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::record::{CanonicalRecord, RawPacket};

/// Field carrying the gateway-side receive timestamp.
pub const TIMESTAMP_FIELD: &str = "jetson_timestamp";

/// Recognized sensor and device fields, besides the timestamp.
pub const CANONICAL_FIELDS: [&str; 19] = [
    // inside environment
    "inside_temp_f",
    "inside_humidity_rh",
    "inside_dew_point_f",
    "inside_vpd_kpa",
    "inside_brightness_lux",
    // raw light channels
    "tsl_full_spectrum",
    "tsl_infrared",
    // outside optical
    "outside_brightness_raw",
    "outside_color_r",
    "outside_color_g",
    "outside_color_b",
    // actuators
    "circulation_fan_pwm",
    "exhaust_fan_pwm",
    "grow_light_pwm",
    // device health
    "esp32_runtime_ms",
    "firmware_version",
    "wifi_rssi",
    "mqtt_reconnects",
    "disconnected_sensors",
];

/// Normalize a raw packet, stamping it with the current instant if it carries no timestamp.
pub fn normalize(packet: &RawPacket) -> CanonicalRecord {
    normalize_at(packet, Utc::now())
}

/// Normalize a raw packet using `now` as the fallback timestamp.
pub fn normalize_at(packet: &RawPacket, now: DateTime<Utc>) -> CanonicalRecord {
    let mut record = CanonicalRecord::new();

    match packet.get(TIMESTAMP_FIELD) {
        Some(ts) if !ts.is_null() => {
            record.insert(TIMESTAMP_FIELD, ts.clone());
        }
        _ => {
            record.insert(TIMESTAMP_FIELD, now.to_rfc3339_opts(SecondsFormat::Micros, true));
        }
    }

    for field in CANONICAL_FIELDS {
        if let Some(value) = packet.get(field) {
            record.insert(field, value.clone());
        }
    }

    record
}
