//! Biological phase context. Placeholder until plant-specific logic exists.

use super::Enricher;
use crate::error::AppResult;
use crate::record::{CanonicalRecord, Null, Record};

/// Placeholder biological context.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeasonContext;

impl Enricher for SeasonContext {
    fn name(&self) -> &'static str {
        "season"
    }

    fn derive(&self, _record: &CanonicalRecord) -> AppResult<Record> {
        Ok([("biological_phase", Null), ("growth_stage", Null)]
            .into_iter()
            .collect())
    }
}
