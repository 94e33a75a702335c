//! Wall-clock and season context derived from the record timestamp.

use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDateTime, SecondsFormat, Timelike, Utc};

use super::Enricher;
use crate::error::{AppResult, GatewayError};
use crate::normalize::TIMESTAMP_FIELD;
use crate::record::{CanonicalRecord, FieldValue, Record};

const STEP: &str = "time";

/// Formats accepted for timestamps without an offset; those are read as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Season label for a day of the year (1-based).
pub fn season_for_day_of_year(day_of_year: u32) -> &'static str {
    match day_of_year {
        80..=171 => "spring",
        172..=263 => "summer",
        264..=354 => "fall",
        _ => "winter",
    }
}

/// Control intent window for a local hour (0-23).
pub fn intent_window_for_hour(hour: u32) -> &'static str {
    match hour {
        6..=9 => "morning",
        10..=15 => "midday",
        16..=19 => "evening",
        _ => "night",
    }
}

/// Derives `local_time`, `day_of_year`, `season_state` and `intent_window`.
#[derive(Debug, Clone, Copy)]
pub struct TimeContext {
    utc_offset: Option<FixedOffset>,
}

impl TimeContext {
    /// `None` converts with the host's local offset.
    pub fn new(utc_offset: Option<FixedOffset>) -> Self {
        Self { utc_offset }
    }

    fn localize(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self.utc_offset {
            Some(offset) => instant.with_timezone(&offset),
            None => instant.with_timezone(&Local).fixed_offset(),
        }
    }
}

fn parse_timestamp(value: &FieldValue) -> AppResult<DateTime<Utc>> {
    let invalid = |detail: String| GatewayError::Enrichment {
        step: STEP,
        reason: detail,
    };

    match value {
        FieldValue::Text(text) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Ok(parsed.with_timezone(&Utc));
            }
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|naive| naive.and_utc())
                .ok_or_else(|| invalid(format!("unparseable timestamp '{text}'")))
        }
        FieldValue::Int(secs) => DateTime::from_timestamp(*secs, 0)
            .ok_or_else(|| invalid(format!("epoch seconds {secs} out of range"))),
        FieldValue::Float(secs) => DateTime::from_timestamp_millis((secs * 1000.0) as i64)
            .ok_or_else(|| invalid(format!("epoch seconds {secs} out of range"))),
        other => Err(invalid(format!("timestamp has unsupported value {other:?}"))),
    }
}

impl Enricher for TimeContext {
    fn name(&self) -> &'static str {
        STEP
    }

    fn derive(&self, record: &CanonicalRecord) -> AppResult<Record> {
        let raw = record.get(TIMESTAMP_FIELD).ok_or_else(|| GatewayError::Enrichment {
            step: STEP,
            reason: "record has no timestamp".to_string(),
        })?;
        let local = self.localize(parse_timestamp(raw)?);
        let day_of_year = local.ordinal();

        let mut fields = Record::new();
        fields.insert("local_time", local.to_rfc3339_opts(SecondsFormat::Secs, false));
        fields.insert("day_of_year", day_of_year);
        fields.insert("season_state", season_for_day_of_year(day_of_year));
        fields.insert("intent_window", intent_window_for_hour(local.hour()));
        Ok(fields)
    }
}
