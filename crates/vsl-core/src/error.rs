//! Error types for vsl-core.

use thiserror::Error;

/// Result type for vsl-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by storage and model operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Nothing is stored at or below the address.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request is malformed or targets the wrong agent.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend failure reported by a storage implementation.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Coarse error classification shared by the locking and sync layers.
///
/// Callers branch on the kind: lock-state and permission errors are
/// caller-correctable, delivery failures are retried internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A conflicting lock is held by someone else.
    AlreadyLocked,
    /// No lock covers the path.
    NotLocked,
    /// Wrong holder or insufficient access ids.
    NoPermission,
    /// A message could not be delivered to another agent.
    DeliveryFailed,
    /// A round trip exceeded its bounded wait.
    Timeout,
    /// Any other collaborator failure.
    Unexpected,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AlreadyLocked => "AlreadyLocked",
            Self::NotLocked => "NotLocked",
            Self::NoPermission => "NoPermission",
            Self::DeliveryFailed => "DeliveryFailed",
            Self::Timeout => "Timeout",
            Self::Unexpected => "Unexpected",
        };
        f.write_str(name)
    }
}
