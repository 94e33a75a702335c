//! Wire-protocol boundary towards the field device.
//!
//! The core only needs two things from the transport: raw packets pushed into the
//! intake queue, and a way to publish documents on the command and status channels.
//! [`Publisher`] is that second seam; [`mqtt::MqttTransport`] implements it.

pub mod mqtt;

pub use mqtt::{MqttTransport, TransportHandles};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AppResult;

/// Logical outbound channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Actuator setpoints for the field device.
    Command,
    /// Gateway heartbeat.
    Status,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Command => write!(f, "command"),
            Channel::Status => write!(f, "status"),
        }
    }
}

/// Publishes JSON documents on a logical channel.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `document` on `channel`. Fails with `TransportNotConnected` before the
    /// broker connection is up.
    async fn publish(&self, channel: Channel, document: &Value) -> AppResult<()>;

    /// Release the connection. Called once on shutdown.
    async fn close(&self) -> AppResult<()> {
        Ok(())
    }
}
