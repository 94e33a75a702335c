//! Custom error types for the gateway.
//!
//! This module defines the primary error type, `GatewayError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures the gateway runs into, from configuration problems
//! to a reporting endpoint that rejects an upload.
//!
//! ## Error Hierarchy
//!
//! `GatewayError` consolidates the following sources:
//!
//! - **`Config`**: Wraps errors from `figment`, typically TOML parse errors or type
//!   mismatches between the file/environment and `GatewayConfig`.
//! - **`Configuration`**: Semantic errors caught by `GatewayConfig::validate`, such as a
//!   zero intake capacity.
//! - **`Io`**, **`Json`**, **`Storage`**, **`Http`**: Wrapped library errors for file,
//!   serialization, SQLite and HTTP failures.
//! - **`Transport`** / **`TransportNotConnected`**: MQTT client failures. A publish
//!   before the broker connection is established is reported, never panics.
//! - **`Enrichment`**: A single enrichment step failed. The chain logs and skips it.
//! - **`Endpoint`**: The reporting endpoint answered with a failure.
//! - **`CommandDocument`**: The desired command document could not be read.
//!
//! None of these are process-fatal while the driver loop runs. `is_transient` tells the
//! loop which failures are ordinary I/O hiccups that only cost one record on one channel.

use thiserror::Error;

/// Convenience alias for results using the gateway error type.
pub type AppResult<T> = std::result::Result<T, GatewayError>;

/// Every failure the gateway core can report.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite failure in the persistence sink.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// HTTP transport failure towards the reporting endpoint.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The reporting endpoint answered but did not accept the document.
    #[error("Reporting endpoint rejected upload with status {status}: {body}")]
    Endpoint {
        /// HTTP status code returned by the endpoint.
        status: u16,
        /// First part of the response body.
        body: String,
    },

    /// MQTT client failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A publish was attempted before the broker connection was established.
    #[error("Transport not connected, cannot publish")]
    TransportNotConnected,

    /// One enrichment step failed; its fields stay absent.
    #[error("Enrichment step '{step}' failed: {reason}")]
    Enrichment {
        /// Name of the failing step.
        step: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// The desired command document is unreadable or malformed.
    #[error("Command document error: {0}")]
    CommandDocument(String),

    /// A background task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(String),

    /// One or more components failed to close cleanly.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<GatewayError>),
}

impl GatewayError {
    /// Transient I/O failures cost one record on one channel and nothing more.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Io(_)
            | GatewayError::Storage(_)
            | GatewayError::Http(_)
            | GatewayError::Endpoint { .. }
            | GatewayError::Transport(_)
            | GatewayError::TransportNotConnected => true,
            GatewayError::Config(_)
            | GatewayError::Configuration(_)
            | GatewayError::Json(_)
            | GatewayError::Enrichment { .. }
            | GatewayError::CommandDocument(_)
            | GatewayError::Task(_)
            | GatewayError::ShutdownFailed(_) => false,
        }
    }
}

impl From<rumqttc::ClientError> for GatewayError {
    fn from(value: rumqttc::ClientError) -> Self {
        GatewayError::Transport(value.to_string())
    }
}

impl From<tokio::task::JoinError> for GatewayError {
    fn from(value: tokio::task::JoinError) -> Self {
        GatewayError::Task(value.to_string())
    }
}
