//! Command dispatch: forwards the desired actuator setpoints to the field device
//! whenever they change.
//!
//! The desired state lives in a small JSON document written by the control logic.
//! [`CommandDispatcher::reconcile`] reads it, compares it with what was last sent and
//! publishes on the command channel only on the first call or after a change. The
//! read-compare-publish-update sequence runs under one async mutex so it stays atomic
//! even if more than one task reconciles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AppResult, GatewayError};
use crate::transport::{Channel, Publisher};

/// Actuator setpoints, each 0-255.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandState {
    /// Circulation fan duty.
    pub circulation_fan_pwm: u8,
    /// Exhaust fan duty.
    pub exhaust_fan_pwm: u8,
    /// Grow light duty.
    pub grow_light_pwm: u8,
}

/// Where the desired command state comes from.
#[async_trait]
pub trait CommandSource: Send + Sync {
    /// Read the current desired state.
    async fn load(&self) -> AppResult<CommandState>;
}

/// Command document stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileCommandSource {
    path: PathBuf,
}

impl FileCommandSource {
    /// Source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Document location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_defaults(&self) -> AppResult<CommandState> {
        let defaults = CommandState::default();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_string_pretty(&defaults)?).await?;
        info!(path = %self.path.display(), "Created default command document");
        Ok(defaults)
    }
}

#[async_trait]
impl CommandSource for FileCommandSource {
    async fn load(&self) -> AppResult<CommandState> {
        let body = match tokio::fs::read(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return self.write_defaults().await,
            Err(e) => {
                return Err(GatewayError::CommandDocument(format!(
                    "{}: {e}",
                    self.path.display()
                )))
            }
        };

        serde_json::from_slice(&body)
            .map_err(|e| GatewayError::CommandDocument(format!("{}: {e}", self.path.display())))
    }
}

/// What a reconcile cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing had been sent yet; the state was published.
    InitialSync(CommandState),
    /// The desired state changed and was published.
    Changed(CommandState),
    /// Desired and dispatched states match.
    Unchanged,
}

/// Publishes the desired command state when it differs from the last one sent.
pub struct CommandDispatcher {
    source: Box<dyn CommandSource>,
    dispatched: Mutex<Option<CommandState>>,
    current: RwLock<Option<CommandState>>,
}

impl CommandDispatcher {
    /// Dispatcher reading from `source`.
    pub fn new(source: impl CommandSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            dispatched: Mutex::new(None),
            current: RwLock::new(None),
        }
    }

    /// Most recently read desired state, whether or not it went out.
    pub fn current_state(&self) -> Option<CommandState> {
        self.current.read().ok().and_then(|state| *state)
    }

    /// Last state the transport accepted.
    pub async fn dispatched_state(&self) -> Option<CommandState> {
        *self.dispatched.lock().await
    }

    /// Read the desired state and publish it if it differs from the dispatched one.
    pub async fn reconcile(&self, publisher: &dyn Publisher) -> AppResult<ReconcileOutcome> {
        let mut dispatched = self.dispatched.lock().await;

        let desired = self.source.load().await?;
        if let Ok(mut current) = self.current.write() {
            *current = Some(desired);
        }

        let outcome = match *dispatched {
            None => ReconcileOutcome::InitialSync(desired),
            Some(previous) if previous != desired => ReconcileOutcome::Changed(desired),
            Some(_) => {
                debug!("Command state unchanged");
                return Ok(ReconcileOutcome::Unchanged);
            }
        };

        let document = serde_json::to_value(desired)?;
        if let Err(e) = publisher.publish(Channel::Command, &document).await {
            warn!(error = %e, "Command publish failed, will retry next cycle");
            return Err(e);
        }

        match outcome {
            ReconcileOutcome::InitialSync(_) => info!(state = ?desired, "Initial command sync"),
            _ => info!(state = ?desired, "Command state changed"),
        }
        *dispatched = Some(desired);
        Ok(outcome)
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("current", &self.current_state())
            .finish_non_exhaustive()
    }
}
