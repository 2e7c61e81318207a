use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use chrono::{serde::ts_seconds, serde::ts_seconds_option, DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::Tier;

/// Lifecycle state of one managed server process.
///
/// `Starting` becomes `Ready` on the first successful health check within
/// the startup deadline, or `Error` when the deadline passes or the process
/// exits. A `Ready` server drops to `Error` on a failed steady-state poll
/// and stays there until explicitly restarted. `Stopped` is terminal until
/// the next start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Starting,
    Ready,
    Error,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Starting => write!(f, "starting"),
            ServerState::Ready => write!(f, "ready"),
            ServerState::Error => write!(f, "error"),
            ServerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Runtime record of one managed llama-server process.
///
/// At most one handle exists per enabled model, and its port is unique
/// among active handles within the configured range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerHandle {
    /// Model this server is loaded with
    pub model_id: String,
    /// Tier the model serves
    pub tier: Tier,
    /// Port the server is bound to
    pub port: u16,
    /// Current lifecycle state
    pub state: ServerState,
    /// When the process was spawned
    #[serde(with = "ts_seconds")]
    pub started_at: DateTime<Utc>,
    /// When the server last answered a health check
    #[serde(with = "ts_seconds_option")]
    pub last_health_check: Option<DateTime<Utc>>,
}

/// Custom error types for server lifecycle operations
#[derive(Debug)]
pub enum StartupError {
    /// The configured llama-server binary does not exist
    BinaryMissing(PathBuf),
    /// The model file referenced by the registry entry does not exist
    ModelFileMissing(PathBuf),
    /// Every port in the configured range is taken by an active handle
    PortExhausted,
    /// The allocated port is already bound by another process
    PortInUse(u16),
    /// The OS refused to spawn the process
    SpawnFailed(String),
    /// The process exited before reporting healthy
    ProcessExited { model_id: String },
    /// The server did not report healthy within the startup deadline
    HealthTimeout { model_id: String, waited_seconds: f64 },
    /// No handle exists for the requested model id
    HandleNotFound(String),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StartupError::BinaryMissing(path) => {
                write!(f, "llama-server binary not found at: {}", path.display())
            }
            StartupError::ModelFileMissing(path) => {
                write!(f, "Model file not found at: {}", path.display())
            }
            StartupError::PortExhausted => {
                write!(f, "No free port left in the configured range")
            }
            StartupError::PortInUse(port) => {
                write!(f, "Port {} is already bound by another process", port)
            }
            StartupError::SpawnFailed(msg) => write!(f, "Failed to spawn server: {}", msg),
            StartupError::ProcessExited { model_id } => {
                write!(f, "Server for model {} exited during startup", model_id)
            }
            StartupError::HealthTimeout { model_id, waited_seconds } => write!(
                f,
                "Server for model {} did not become healthy within {:.0}s",
                model_id, waited_seconds
            ),
            StartupError::HandleNotFound(id) => write!(f, "No server handle for model: {}", id),
        }
    }
}

impl Error for StartupError {}
