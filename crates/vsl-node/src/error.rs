//! Error types for the VSL node.

use thiserror::Error;
use vsl_core::ErrorKind;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running an agent.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] vsl_core::Error),

    /// Lock table error
    #[error("Lock error: {0}")]
    Lock(#[from] vsl_locking::Error),

    /// Sync protocol error
    #[error("Sync error: {0}")]
    Sync(#[from] vsl_sync::Error),

    /// An agent with this id is already attached to the network
    #[error("Agent already attached: {0}")]
    AlreadyAttached(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Lock(e) => e.kind(),
            Self::Sync(e) => e.kind(),
            Self::Config(_) | Self::Storage(_) | Self::AlreadyAttached(_) => ErrorKind::Unexpected,
        }
    }
}
