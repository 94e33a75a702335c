//! Field-map record types shared by every pipeline stage.
//!
//! The field device sends whatever it has; downstream stages must cope with any subset
//! of fields. Records are therefore ordered maps from field name to a tagged scalar
//! rather than fixed structs:
//!
//! - a key that is missing means "absent" (never read as zero),
//! - a key holding [`FieldValue::Null`] means "present, value unknown".
//!
//! [`RawPacket`], [`CanonicalRecord`] and [`EnrichedRecord`] share the representation;
//! the aliases document which stage a value came from.

use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One scalar field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Present but unknown.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Integer reading (counters, PWM duty, raw channel counts).
    Int(i64),
    /// Floating point reading.
    Float(f64),
    /// Text (timestamps, versions, labels).
    Text(String),
}

impl FieldValue {
    /// Convert a decoded JSON value. Arrays and objects are kept as compact JSON text.
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => n.as_f64().map_or(FieldValue::Null, FieldValue::Float),
            },
            Value::String(s) => FieldValue::Text(s),
            nested @ (Value::Array(_) | Value::Object(_)) => FieldValue::Text(nested.to_string()),
        }
    }

    /// JSON form of this value.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            FieldValue::Text(s) => Value::String(s.clone()),
        }
    }

    /// Numeric view; booleans and text are not numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Text view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// `true` for [`FieldValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// Ordered field map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, FieldValue>);

/// Record exactly as received from the field device.
pub type RawPacket = Record;
/// Record restricted to the recognized schema.
pub type CanonicalRecord = Record;
/// Canonical record plus derived context fields.
pub type EnrichedRecord = Record;

impl Record {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a JSON object payload.
    pub fn from_json_slice(payload: &[u8]) -> AppResult<Self> {
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(payload)?;
        Ok(Self::from_json_map(map))
    }

    /// Build from an already-decoded JSON object.
    pub fn from_json_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        map.into_iter()
            .map(|(k, v)| (k, FieldValue::from_json(v)))
            .collect()
    }

    /// JSON object form.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Value of `field`, `None` when absent.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    /// Whether `field` is present (possibly as Null).
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Set `field`, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.0.insert(field.into(), value.into())
    }

    /// Set `field` only when absent. Returns `true` if the value was stored.
    pub fn insert_if_absent(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> bool {
        use std::collections::btree_map::Entry;
        match self.0.entry(field.into()) {
            Entry::Vacant(slot) => {
                slot.insert(value.into());
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Iterate fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Field names in key order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of present fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when no field is present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<Null> for FieldValue {
    fn from(_: Null) -> Self {
        FieldValue::Null
    }
}

/// Marker for inserting an explicit Null: `record.insert("control_mode", Null)`.
#[derive(Debug, Clone, Copy)]
pub struct Null;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_mixed_scalar_payload() {
        let record = Record::from_json_slice(
            br#"{"inside_temp_f": 72.5, "wifi_rssi": -61, "firmware_version": "1.4.2", "tsl_infrared": null}"#,
        )
        .unwrap();

        assert_eq!(record.get("inside_temp_f"), Some(&FieldValue::Float(72.5)));
        assert_eq!(record.get("wifi_rssi"), Some(&FieldValue::Int(-61)));
        assert_eq!(record.get("firmware_version").and_then(FieldValue::as_str), Some("1.4.2"));
        assert_eq!(record.get("tsl_infrared"), Some(&FieldValue::Null));
        assert!(!record.contains("inside_humidity_rh"));
    }

    #[test]
    fn nested_values_become_json_text() {
        let record = Record::from_json_slice(br#"{"disconnected_sensors": ["sht4", "apds"]}"#).unwrap();
        assert_eq!(
            record.get("disconnected_sensors"),
            Some(&FieldValue::Text(r#"["sht4","apds"]"#.to_string()))
        );
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(Record::from_json_slice(b"[1, 2, 3]").is_err());
        assert!(Record::from_json_slice(b"not json").is_err());
    }

    #[test]
    fn insert_if_absent_keeps_existing_value() {
        let mut record = Record::new();
        record.insert("control_mode", "manual");
        assert!(!record.insert_if_absent("control_mode", Null));
        assert!(record.insert_if_absent("control_reason", Null));
        assert_eq!(record.get("control_mode").and_then(FieldValue::as_str), Some("manual"));
        assert_eq!(record.get("control_reason"), Some(&FieldValue::Null));
    }

    #[test]
    fn booleans_are_not_numeric() {
        assert_eq!(FieldValue::Bool(true).as_f64(), None);
        assert_eq!(FieldValue::Int(3).as_f64(), Some(3.0));
    }
}
