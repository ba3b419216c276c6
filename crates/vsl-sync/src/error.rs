//! Error types for vsl-sync.

use std::time::Duration;

use thiserror::Error;
use vsl_core::{AgentId, ErrorKind};

/// Result type for vsl-sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while synchronising with other agents.
#[derive(Debug, Error)]
pub enum Error {
    /// A message could not be delivered to an agent.
    #[error("delivery to {agent} failed: {reason}")]
    DeliveryFailed { agent: AgentId, reason: String },

    /// A round trip did not complete in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A peer sent something that does not follow the protocol.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The agent registry rejected an operation.
    #[error("registry error: {0}")]
    Registry(String),

    /// The storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(#[from] vsl_core::Error),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn delivery(agent: impl Into<AgentId>, reason: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            agent: agent.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeliveryFailed { .. } => ErrorKind::DeliveryFailed,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidMessage(_)
            | Self::Registry(_)
            | Self::Storage(_)
            | Self::Serialization(_) => ErrorKind::Unexpected,
        }
    }

    /// Soft failures are logged and retried later; they never stop a loop.
    pub fn is_soft(&self) -> bool {
        matches!(self.kind(), ErrorKind::DeliveryFailed | ErrorKind::Timeout)
    }
}
