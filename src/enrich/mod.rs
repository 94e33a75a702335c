//! Enricher chain: attaches derived context to a canonical record.
//!
//! Steps run in order (time, weather, season). Each step only *computes* its fields
//! from the canonical record; the chain merges them insert-if-absent, so a step can
//! never overwrite a field the device sent or an earlier step produced. A failing step
//! is logged and skipped and its fields stay absent.
//!
//! After the steps, the control-context and forecast fields are filled with Null when
//! nothing set them, so every enriched record has the same stable key set.

mod season;
mod time;
mod weather;

pub use season::SeasonContext;
pub use time::{intent_window_for_hour, season_for_day_of_year, TimeContext};
pub use weather::WeatherContext;

use chrono::FixedOffset;
use tracing::warn;

use crate::error::AppResult;
use crate::record::{CanonicalRecord, EnrichedRecord, Null, Record};

/// Fields guaranteed on every enriched record, Null when unknown.
pub const DEFAULT_CONTEXT_FIELDS: [&str; 5] = [
    "control_mode",
    "control_reason",
    "expected_light_trajectory",
    "expected_humidity_decay",
    "forecast_confidence",
];

/// One independent enrichment step.
pub trait Enricher: Send + Sync {
    /// Step name used in logs.
    fn name(&self) -> &'static str;

    /// Derived fields for `record`.
    fn derive(&self, record: &CanonicalRecord) -> AppResult<Record>;
}

/// Ordered list of enrichment steps.
pub struct EnricherChain {
    steps: Vec<Box<dyn Enricher>>,
}

impl EnricherChain {
    /// Chain with no steps; only the default context fill applies.
    pub fn empty() -> Self {
        Self { steps: Vec::new() }
    }

    /// Time, weather and season context. `utc_offset` of `None` uses host local time.
    pub fn standard(utc_offset: Option<FixedOffset>) -> Self {
        Self::empty()
            .with_step(TimeContext::new(utc_offset))
            .with_step(WeatherContext)
            .with_step(SeasonContext)
    }

    /// Append a step.
    pub fn with_step(mut self, step: impl Enricher + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Names of the configured steps, in run order.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step and the default fill. Never fails.
    pub fn enrich(&self, record: &CanonicalRecord) -> EnrichedRecord {
        let mut enriched = record.clone();

        for step in &self.steps {
            match step.derive(record) {
                Ok(fields) => {
                    for (field, value) in fields.iter() {
                        enriched.insert_if_absent(field, value.clone());
                    }
                }
                Err(e) => warn!(step = step.name(), error = %e, "enrichment step failed, skipping"),
            }
        }

        for field in DEFAULT_CONTEXT_FIELDS {
            enriched.insert_if_absent(field, Null);
        }

        enriched
    }
}

impl std::fmt::Debug for EnricherChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnricherChain")
            .field("steps", &self.step_names())
            .finish()
    }
}
