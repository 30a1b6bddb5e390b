use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::AgentId;

/// Process-level failures. A run that stalls (stuck occupants, no reachable
/// assembly point) is not an error; it ends with `RunOutcome::Stalled`.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid building layout: {0}")]
    InvalidLayout(String),

    #[error("invalid simulation config: {0}")]
    InvalidConfig(String),

    #[error("world actor is no longer running")]
    WorldUnavailable,

    #[error("agent {agent} failed: {reason}")]
    AgentFailed { agent: AgentId, reason: String },

    #[error("agent task panicked: {0}")]
    AgentPanicked(String),

    #[error("failed to read config from {path:?}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SimResult<T> = Result<T, SimError>;
