//! # Greenhouse Gateway Core Library
//!
//! This crate is the core of the greenhouse telemetry gateway. It sits between a field
//! device that streams sensor packets over MQTT and two consumers: a local SQLite store
//! that keeps every record, and a remote spreadsheet endpoint that receives a throttled,
//! aggregated view. In the other direction it forwards actuator setpoints to the device
//! whenever the desired command document changes.
//!
//! ## Data Flow
//!
//! ```text
//! MQTT sensor topic -> IntakeQueue -> normalize -> EnricherChain -> SqliteSink
//!                                                               \-> ReportingBuffer -> HTTP
//! command document -> CommandDispatcher -> MQTT command topic
//! heartbeat         -> MQTT status topic
//! ```
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based configuration (`GatewayConfig`) from TOML plus
//!   `GREENHOUSE_` environment overrides.
//! - **`error`**: The `GatewayError` enum used across the crate.
//! - **`logging`**: `tracing` subscriber setup (pretty, compact or JSON, optional log file).
//! - **`record`**: `FieldValue` and the `Record` field map shared by every pipeline stage.
//! - **`intake`**: Bounded drop-newest queue between the receive path and the driver loop.
//! - **`normalize`**: Maps raw packets onto the recognized schema.
//! - **`enrich`**: Ordered enrichment steps (time, weather, season) plus the default fill.
//! - **`storage`**: The `RecordSink` trait, the SQLite sink and the latest-record snapshot.
//! - **`reporting`**: Window aggregation, daily summary dedup and the HTTP reporter.
//! - **`control`**: Command document and change-detecting dispatcher.
//! - **`transport`**: The `Publisher` seam and the `rumqttc` transport.
//! - **`driver`**: `GatewayContext` and the fixed-cadence `Driver` loop.

pub mod config;
pub mod control;
pub mod driver;
pub mod enrich;
pub mod error;
pub mod intake;
pub mod logging;
pub mod normalize;
pub mod record;
pub mod reporting;
pub mod storage;
pub mod transport;

pub use config::GatewayConfig;
pub use driver::{Driver, GatewayContext};
pub use error::{AppResult, GatewayError};
pub use record::{FieldValue, Record};
