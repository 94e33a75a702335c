//! Outbound delivery to the spreadsheet reporting endpoint.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{info, warn};

use super::aggregate::SAMPLE_TYPE;
use crate::error::{AppResult, GatewayError};

/// Longest response body excerpt kept in errors.
const BODY_EXCERPT_CHARS: usize = 200;

/// Sample document translation: (external name, internal field).
pub const SAMPLE_TRANSLATION: [(&str, &str); 12] = [
    ("local_time", "local_time"),
    ("inside_temp_f", "inside_temp_f"),
    ("inside_humidity_rh", "inside_humidity_rh"),
    ("inside_brightness_lux", "inside_brightness_lux"),
    ("outside_brightness_raw", "outside_brightness_raw"),
    ("cloud_coverage_pct", "cloud_coverage_pct"),
    ("circulation_fan_pwm", "circulation_fan_pwm"),
    ("exhaust_fan_pwm", "exhaust_fan_pwm"),
    ("grow_light_pwm", "grow_light_pwm"),
    ("intent_window", "intent_window"),
    ("control_mode", "control_mode"),
    ("control_reason", "control_reason"),
];

/// What happened to a document handed to a [`ReportTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the endpoint.
    Delivered,
    /// Not sent (no endpoint configured).
    Skipped,
}

/// Best-effort, single-attempt delivery of one report document.
#[async_trait]
pub trait ReportTransport: Send + Sync {
    /// Send `document` once.
    async fn send(&self, document: &Value) -> AppResult<Delivery>;
}

/// Project a sample document onto the endpoint's expected field names.
///
/// Unmapped fields are dropped; mapped fields missing from the document are sent as null.
pub fn translate_sample(document: &Value) -> Value {
    let mut translated = Map::new();
    translated.insert("type".to_string(), Value::String(SAMPLE_TYPE.to_string()));
    for (external, internal) in SAMPLE_TRANSLATION {
        let value = document.get(internal).cloned().unwrap_or(Value::Null);
        translated.insert(external.to_string(), value);
    }
    Value::Object(translated)
}

fn is_sample(document: &Value) -> bool {
    document.get("type").and_then(Value::as_str) == Some(SAMPLE_TYPE)
}

/// HTTP POST transport for the spreadsheet web app.
#[derive(Debug, Clone)]
pub struct HttpReporter {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpReporter {
    /// Reporter posting to `endpoint` (uploads skipped when `None`).
    pub fn new(endpoint: Option<String>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.filter(|e| !e.trim().is_empty()),
        })
    }

    /// Configured endpoint.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

#[async_trait]
impl ReportTransport for HttpReporter {
    async fn send(&self, document: &Value) -> AppResult<Delivery> {
        let Some(endpoint) = &self.endpoint else {
            warn!("Reporting endpoint not set, skipping upload");
            return Ok(Delivery::Skipped);
        };

        let payload = if is_sample(document) {
            translate_sample(document)
        } else {
            document.clone()
        };

        let response = self.client.post(endpoint).json(&payload).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        // The spreadsheet script answers 200 with an "ERROR: ..." body on failure.
        if !status.is_success() || body.trim_start().starts_with("ERROR") {
            return Err(GatewayError::Endpoint {
                status: status.as_u16(),
                body: body.chars().take(BODY_EXCERPT_CHARS).collect(),
            });
        }

        let kind = document.get("type").and_then(Value::as_str).unwrap_or("unknown");
        info!(kind, "Report uploaded");
        Ok(Delivery::Delivered)
    }
}
