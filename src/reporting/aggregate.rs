//! Window aggregation: folds a window of enriched records into one report.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::record::{EnrichedRecord, FieldValue, Record};

/// Fields reported as the most recent value seen in the window.
pub const PASSTHROUGH_FIELDS: [&str; 6] = [
    "local_time",
    "outside_brightness_raw",
    "cloud_coverage_pct",
    "intent_window",
    "control_mode",
    "control_reason",
];

/// Document type for sample reports.
pub const SAMPLE_TYPE: &str = "sample";
/// Document type for daily summaries.
pub const SUMMARY_TYPE: &str = "summary";

/// One report folded from a window of records (or a single first sample).
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedReport {
    /// When the report was produced.
    pub generated_at: DateTime<Utc>,
    /// How many records were folded into it.
    pub sample_count: usize,
    /// Aggregated field values.
    pub fields: Record,
}

impl AggregatedReport {
    /// Report carrying a single record unchanged.
    pub fn single(record: EnrichedRecord, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            sample_count: 1,
            fields: record,
        }
    }

    /// Outbound document: the fields plus `timestamp`, `sample_count` and `type`.
    pub fn to_document(&self) -> Value {
        let mut document = self.fields.to_json();
        if let Value::Object(map) = &mut document {
            map.insert(
                "timestamp".to_string(),
                Value::String(self.generated_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
            );
            map.insert("sample_count".to_string(), Value::from(self.sample_count));
            map.insert("type".to_string(), Value::String(SAMPLE_TYPE.to_string()));
        }
        document
    }
}

/// Per-field reduction rules for a window.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    averaging_fields: Vec<String>,
    mode_fields: Vec<String>,
}

impl Aggregator {
    /// Aggregator averaging `averaging_fields` and taking the mode of `mode_fields`.
    pub fn new(averaging_fields: Vec<String>, mode_fields: Vec<String>) -> Self {
        Self {
            averaging_fields,
            mode_fields,
        }
    }

    /// Whether `field` is averaged or mode-reduced.
    pub fn reduces(&self, field: &str) -> bool {
        self.averaging_fields.iter().chain(&self.mode_fields).any(|f| f == field)
    }

    /// Fold `window`; `None` when the window is empty.
    pub fn aggregate(&self, window: &[EnrichedRecord], generated_at: DateTime<Utc>) -> Option<AggregatedReport> {
        if window.is_empty() {
            return None;
        }

        let mut fields = Record::new();

        for field in &self.averaging_fields {
            if let Some(avg) = mean(window, field) {
                fields.insert(field.as_str(), avg);
            }
        }

        for field in &self.mode_fields {
            if let Some(value) = mode(window, field) {
                fields.insert(field.as_str(), value);
            }
        }

        for field in PASSTHROUGH_FIELDS.into_iter().filter(|f| !self.reduces(f)) {
            if let Some(value) = window.iter().rev().find_map(|r| r.get(field)) {
                fields.insert(field, value.clone());
            }
        }

        Some(AggregatedReport {
            generated_at,
            sample_count: window.len(),
            fields,
        })
    }
}

/// Mean of the numeric occurrences of `field`.
fn mean(window: &[EnrichedRecord], field: &str) -> Option<f64> {
    let (sum, count) = window
        .iter()
        .filter_map(|r| r.get(field).and_then(FieldValue::as_f64))
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Most frequent value of `field`; ties go to the value appended most recently.
fn mode(window: &[EnrichedRecord], field: &str) -> Option<FieldValue> {
    // (value, occurrences, position of last occurrence)
    let mut tally: Vec<(&FieldValue, usize, usize)> = Vec::new();

    for (position, value) in window
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.get(field).map(|v| (i, v)))
    {
        match tally.iter_mut().find(|(seen, _, _)| *seen == value) {
            Some(entry) => {
                entry.1 += 1;
                entry.2 = position;
            }
            None => tally.push((value, 1, position)),
        }
    }

    tally
        .into_iter()
        .max_by_key(|(_, count, last)| (*count, *last))
        .map(|(value, _, _)| value.clone())
}
