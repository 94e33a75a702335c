//! Driver loop: the fixed-cadence heart of the gateway.
//!
//! Every tick runs three isolated responsibilities in order:
//!
//! 1. **Ingest** - drain the packets queued when the tick began through
//!    normalize -> enrich -> (sink, snapshot, reporting buffer), then forward any
//!    queued daily summaries.
//! 2. **Dispatch** - reconcile the desired command state with the field device.
//! 3. **Heartbeat** - publish `{status, timestamp, current_commands}` when due.
//!
//! A failure inside one responsibility is logged and never prevents the others from
//! running, in this tick or the next.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::control::{CommandDispatcher, CommandState, FileCommandSource, ReconcileOutcome};
use crate::enrich::EnricherChain;
use crate::error::{AppResult, GatewayError};
use crate::intake::IntakeQueue;
use crate::normalize::normalize;
use crate::record::{RawPacket, Record};
use crate::reporting::{Aggregator, HttpReporter, ReportingBuffer};
use crate::storage::{LatestSnapshot, RecordSink, SqliteSink};
use crate::transport::{Channel, MqttTransport, Publisher, TransportHandles};

/// Heartbeat status value.
pub const HEARTBEAT_STATUS: &str = "alive";

/// Status document published on the status channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heartbeat {
    /// Always `"alive"`.
    pub status: &'static str,
    /// UTC RFC 3339 time of the heartbeat.
    pub timestamp: String,
    /// Most recently read desired command state.
    pub current_commands: Option<CommandState>,
}

impl Heartbeat {
    /// Heartbeat at `now` carrying `current_commands`.
    pub fn new(current_commands: Option<CommandState>, now: DateTime<Utc>) -> Self {
        Self {
            status: HEARTBEAT_STATUS,
            timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, true),
            current_commands,
        }
    }
}

/// Every core component, owned in one place.
pub struct GatewayContext {
    /// Sensor packets from the receive path.
    pub intake: IntakeQueue<RawPacket>,
    /// Daily summaries from the receive path.
    pub summaries: IntakeQueue<Record>,
    /// Enrichment steps.
    pub enricher: EnricherChain,
    /// Durable store.
    pub sink: Box<dyn RecordSink>,
    /// Latest-record snapshot, if enabled.
    pub snapshot: Option<LatestSnapshot>,
    /// Windowed reporting.
    pub reporting: ReportingBuffer,
    /// Command change detection.
    pub dispatcher: CommandDispatcher,
    /// Outbound command and status channels.
    pub publisher: Arc<dyn Publisher>,
}

/// Fixed offset for `minutes` east of UTC.
pub fn utc_offset_from_minutes(minutes: i32) -> AppResult<FixedOffset> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| GatewayError::Configuration(format!("invalid UTC offset {minutes} minutes")))
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Sensor packets pushed through the pipeline.
    pub ingested: usize,
    /// Daily summaries handed to the reporting buffer.
    pub summaries: usize,
    /// Dispatcher result, `None` when reconcile failed.
    pub dispatch: Option<ReconcileOutcome>,
    /// Whether a heartbeat went out.
    pub heartbeat_sent: bool,
}

/// Runs the gateway ticks.
pub struct Driver {
    context: GatewayContext,
    tick_interval: Duration,
    heartbeat_interval: Duration,
    last_heartbeat: Option<Instant>,
}

impl Driver {
    /// Driver over an assembled context.
    pub fn new(context: GatewayContext, tick_interval: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            context,
            tick_interval,
            heartbeat_interval,
            last_heartbeat: None,
        }
    }

    /// Assemble the production gateway: MQTT transport, SQLite sink, HTTP reporter and
    /// file-backed command document. Spawns the transport task, so it must run inside a
    /// tokio runtime.
    pub fn from_config(config: &GatewayConfig) -> AppResult<Self> {
        let intake = IntakeQueue::new(config.intake.capacity);
        let summaries = IntakeQueue::new(config.intake.capacity);

        let utc_offset = match config.enrich.utc_offset_minutes {
            Some(minutes) => Some(utc_offset_from_minutes(minutes)?),
            None => None,
        };

        let reporter = HttpReporter::new(
            config.reporting.endpoint.clone(),
            config.reporting.request_timeout(),
        )?;
        let reporting = ReportingBuffer::new(
            Aggregator::new(
                config.reporting.averaging_fields.clone(),
                config.reporting.mode_fields.clone(),
            ),
            config.reporting.upload_interval(),
            Arc::new(reporter),
        );

        let transport = MqttTransport::start(
            &config.mqtt,
            TransportHandles {
                sensors: intake.producer(),
                summaries: summaries.producer(),
            },
        );

        let context = GatewayContext {
            intake,
            summaries,
            enricher: EnricherChain::standard(utc_offset),
            sink: Box::new(SqliteSink::new(&config.storage.database_path)),
            snapshot: Some(LatestSnapshot::new(&config.storage.latest_snapshot_path)),
            reporting,
            dispatcher: CommandDispatcher::new(FileCommandSource::new(&config.control.commands_path)),
            publisher: Arc::new(transport),
        };

        Ok(Self::new(
            context,
            config.driver.tick_interval(),
            config.driver.heartbeat_interval(),
        ))
    }

    /// Owned components.
    pub fn context(&self) -> &GatewayContext {
        &self.context
    }

    /// Owned components, mutably.
    pub fn context_mut(&mut self) -> &mut GatewayContext {
        &mut self.context
    }

    /// Run one tick observed at `now`.
    pub async fn tick(&mut self, now: Instant) -> TickReport {
        let ingested = self.ingest().await;
        let summaries = self.forward_summaries().await;
        let dispatch = self.dispatch().await;
        let heartbeat_sent = self.heartbeat(now).await;

        TickReport {
            ingested,
            summaries,
            dispatch,
            heartbeat_sent,
        }
    }

    /// Tick until `shutdown` resolves, then close the sink and the transport.
    pub async fn run<F>(mut self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            tick = ?self.tick_interval,
            heartbeat = ?self.heartbeat_interval,
            "Gateway driver loop started"
        );

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick(Instant::now()).await;
                }
            }
        }

        self.shutdown().await
    }

    /// Close the sink, then the transport.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        let mut failures = Vec::new();

        if let Err(e) = self.context.sink.close().await {
            error!(error = %e, "Failed to close record sink");
            failures.push(e);
        }
        if let Err(e) = self.context.publisher.close().await {
            error!(error = %e, "Failed to close transport");
            failures.push(e);
        }

        if failures.is_empty() {
            info!("Gateway stopped cleanly");
            Ok(())
        } else {
            Err(GatewayError::ShutdownFailed(failures))
        }
    }

    async fn ingest(&mut self) -> usize {
        // Packets arriving mid-drain wait for the next tick.
        let pending = self.context.intake.len();
        let mut processed = 0;

        for _ in 0..pending {
            let Some(packet) = self.context.intake.poll() else {
                break;
            };
            self.process_packet(&packet).await;
            processed += 1;
        }

        if processed > 0 {
            debug!(processed, "Ingested sensor packets");
        }
        processed
    }

    async fn process_packet(&mut self, packet: &RawPacket) {
        let canonical = normalize(packet);
        let enriched = self.context.enricher.enrich(&canonical);

        if let Err(e) = self.context.sink.insert(&enriched).await {
            warn!(error = %e, "Failed to persist record");
        }

        if let Some(snapshot) = &self.context.snapshot {
            if let Err(e) = snapshot.save(&enriched).await {
                warn!(error = %e, path = %snapshot.path().display(), "Failed to save latest snapshot");
            }
        }

        self.context.reporting.add_sample(enriched).await;
    }

    async fn forward_summaries(&mut self) -> usize {
        let pending = self.context.summaries.len();
        let mut forwarded = 0;

        for _ in 0..pending {
            let Some(summary) = self.context.summaries.poll() else {
                break;
            };
            self.context.reporting.submit_summary(summary).await;
            forwarded += 1;
        }
        forwarded
    }

    async fn dispatch(&self) -> Option<ReconcileOutcome> {
        match self.context.dispatcher.reconcile(self.context.publisher.as_ref()).await {
            Ok(outcome) => Some(outcome),
            Err(GatewayError::TransportNotConnected) => {
                debug!("Transport not connected, command dispatch deferred");
                None
            }
            Err(e) => {
                warn!(error = %e, "Command dispatch failed");
                None
            }
        }
    }

    async fn heartbeat(&mut self, now: Instant) -> bool {
        let due = self
            .last_heartbeat
            .map_or(true, |last| now.saturating_duration_since(last) >= self.heartbeat_interval);
        if !due {
            return false;
        }

        let heartbeat = Heartbeat::new(self.context.dispatcher.current_state(), Utc::now());
        let document = match serde_json::to_value(&heartbeat) {
            Ok(document) => document,
            Err(e) => {
                warn!(error = %e, "Failed to encode heartbeat");
                return false;
            }
        };

        match self.context.publisher.publish(Channel::Status, &document).await {
            Ok(()) => {
                self.last_heartbeat = Some(now);
                true
            }
            Err(e) => {
                debug!(error = %e, "Heartbeat not sent");
                false
            }
        }
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("tick_interval", &self.tick_interval)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("last_heartbeat", &self.last_heartbeat)
            .finish_non_exhaustive()
    }
}
