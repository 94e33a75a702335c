//! Reporting buffer: throttles and summarizes traffic to the reporting endpoint.
//!
//! Two independent channels share one outbound [`ReportTransport`]:
//!
//! ```text
//! sample channel:   AwaitingFirst --first record--> Accumulating --interval elapsed--> flush
//!                        (sent as-is, count=1)          ^                                 |
//!                                                       +---------------------------------+
//! summary channel:  forward once per distinct `date`
//! ```
//!
//! Delivery is best-effort: a failed upload is logged and counted, never retried or
//! requeued. The durable copy of every record lives in the persistence sink.

pub mod aggregate;
pub mod endpoint;

pub use aggregate::{AggregatedReport, Aggregator, PASSTHROUGH_FIELDS, SAMPLE_TYPE, SUMMARY_TYPE};
pub use endpoint::{translate_sample, Delivery, HttpReporter, ReportTransport, SAMPLE_TRANSLATION};

use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::record::{EnrichedRecord, FieldValue, Record};

/// Key identifying the day a summary belongs to.
pub const SUMMARY_DATE_FIELD: &str = "date";

/// Sample channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleChannelState {
    /// Nothing sent yet; the next record goes out immediately.
    AwaitingFirst,
    /// Collecting records until the window interval elapses.
    Accumulating {
        /// When the window was last flushed.
        last_flush: Instant,
    },
}

/// What `add_sample` did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// First record ever, forwarded as a single-sample report.
    SentFirst,
    /// Added to the current window.
    Buffered,
    /// Window flushed as an aggregate of `sample_count` records.
    Flushed {
        /// Records folded into the aggregate.
        sample_count: usize,
    },
}

/// What `submit_summary` did with a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// Handed to the transport.
    Forwarded,
    /// A summary for this date was already forwarded.
    Duplicate,
    /// No usable `date` key.
    MissingDate,
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportingStats {
    /// Documents accepted by the endpoint.
    pub delivered: u64,
    /// Documents the endpoint or network rejected.
    pub failed: u64,
    /// Documents not sent because no endpoint is configured.
    pub skipped: u64,
}

/// Windowed sample reporting plus deduplicated daily summaries.
pub struct ReportingBuffer {
    aggregator: Aggregator,
    interval: Duration,
    state: SampleChannelState,
    window: Vec<EnrichedRecord>,
    forwarded_dates: HashSet<String>,
    last_summary_date: Option<String>,
    transport: Arc<dyn ReportTransport>,
    stats: ReportingStats,
}

impl ReportingBuffer {
    /// Buffer flushing every `interval` through `transport`.
    pub fn new(aggregator: Aggregator, interval: Duration, transport: Arc<dyn ReportTransport>) -> Self {
        Self {
            aggregator,
            interval,
            state: SampleChannelState::AwaitingFirst,
            window: Vec::new(),
            forwarded_dates: HashSet::new(),
            last_summary_date: None,
            transport,
            stats: ReportingStats::default(),
        }
    }

    /// Current sample channel state.
    pub fn state(&self) -> SampleChannelState {
        self.state
    }

    /// Records waiting in the current window.
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Delivery counters.
    pub fn stats(&self) -> ReportingStats {
        self.stats
    }

    /// Date of the most recently forwarded summary.
    pub fn last_summary_date(&self) -> Option<&str> {
        self.last_summary_date.as_deref()
    }

    /// Feed one enriched record, using the current instant.
    pub async fn add_sample(&mut self, record: EnrichedRecord) -> SampleOutcome {
        self.add_sample_at(record, Instant::now()).await
    }

    /// Feed one enriched record observed at `now`.
    pub async fn add_sample_at(&mut self, record: EnrichedRecord, now: Instant) -> SampleOutcome {
        let last_flush = match self.state {
            SampleChannelState::AwaitingFirst => {
                info!("Sending first sample immediately");
                let report = AggregatedReport::single(record, Utc::now());
                self.state = SampleChannelState::Accumulating { last_flush: now };
                self.deliver(report.to_document()).await;
                return SampleOutcome::SentFirst;
            }
            SampleChannelState::Accumulating { last_flush } => last_flush,
        };

        self.window.push(record);

        if now.saturating_duration_since(last_flush) < self.interval {
            return SampleOutcome::Buffered;
        }

        let window = std::mem::take(&mut self.window);
        self.state = SampleChannelState::Accumulating { last_flush: now };

        match self.aggregator.aggregate(&window, Utc::now()) {
            Some(report) => {
                debug!(sample_count = report.sample_count, "Flushing reporting window");
                let sample_count = report.sample_count;
                self.deliver(report.to_document()).await;
                SampleOutcome::Flushed { sample_count }
            }
            None => SampleOutcome::Flushed { sample_count: 0 },
        }
    }

    /// Forward a precomputed daily summary unless one for the same date already went out.
    pub async fn submit_summary(&mut self, summary: Record) -> SummaryOutcome {
        let date = match summary.get(SUMMARY_DATE_FIELD).and_then(FieldValue::as_str) {
            Some(date) if !date.trim().is_empty() => date.to_string(),
            _ => {
                warn!("Summary payload missing date, skipping");
                return SummaryOutcome::MissingDate;
            }
        };

        if self.forwarded_dates.contains(&date) {
            info!(date = %date, "Daily summary already sent, skipping");
            return SummaryOutcome::Duplicate;
        }

        let mut document = summary.to_json();
        if let Value::Object(map) = &mut document {
            map.insert("type".to_string(), Value::String(SUMMARY_TYPE.to_string()));
        }

        info!(date = %date, "Uploading daily summary");
        self.deliver(document).await;
        self.forwarded_dates.insert(date.clone());
        self.last_summary_date = Some(date);
        SummaryOutcome::Forwarded
    }

    async fn deliver(&mut self, document: Value) {
        match self.transport.send(&document).await {
            Ok(Delivery::Delivered) => self.stats.delivered += 1,
            Ok(Delivery::Skipped) => self.stats.skipped += 1,
            Err(e) => {
                self.stats.failed += 1;
                warn!(error = %e, "Report upload failed, dropping");
            }
        }
    }
}

impl std::fmt::Debug for ReportingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportingBuffer")
            .field("interval", &self.interval)
            .field("state", &self.state)
            .field("window_len", &self.window.len())
            .field("last_summary_date", &self.last_summary_date)
            .field("stats", &self.stats)
            .finish()
    }
}
