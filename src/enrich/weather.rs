//! External environment context.
//!
//! No weather provider is wired up yet; the step publishes the fields as Null so the
//! store and the reports already carry the columns.

use super::Enricher;
use crate::error::AppResult;
use crate::record::{CanonicalRecord, Null, Record};

/// Fields owned by the weather step.
pub const WEATHER_FIELDS: [&str; 6] = [
    "weather_source",
    "cloud_coverage_pct",
    "precip_probability_pct",
    "forecast_confidence",
    "expected_light_trajectory",
    "expected_humidity_decay",
];

/// Placeholder weather context.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeatherContext;

impl Enricher for WeatherContext {
    fn name(&self) -> &'static str {
        "weather"
    }

    fn derive(&self, _record: &CanonicalRecord) -> AppResult<Record> {
        Ok(WEATHER_FIELDS.iter().map(|f| (*f, Null)).collect())
    }
}
