//! Error types for vsl-locking.

use thiserror::Error;
use vsl_core::{Address, ErrorKind};

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by [`LockTable`](crate::LockTable) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The path, an ancestor or a descendant is held by another holder.
    #[error("{path} is already locked by {holder}")]
    AlreadyLocked { path: Address, holder: String },

    /// No lock covers the address.
    #[error("no lock covers {0}")]
    NotLocked(Address),

    /// The requester is not the holder or lacks the required access ids.
    #[error("permission denied: {0}")]
    NoPermission(String),

    /// A holder callback reported a failure.
    #[error("lock callback failed: {0}")]
    Callback(String),

    /// The storage collaborator failed while flushing staged writes.
    #[error("storage error: {0}")]
    Storage(#[from] vsl_core::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyLocked { .. } => ErrorKind::AlreadyLocked,
            Self::NotLocked(_) => ErrorKind::NotLocked,
            Self::NoPermission(_) => ErrorKind::NoPermission,
            Self::Callback(_) | Self::Storage(_) => ErrorKind::Unexpected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_distinguish_retryable_from_permission() {
        let locked = Error::AlreadyLocked {
            path: Address::new("/a"),
            holder: "svc1".into(),
        };
        assert_eq!(locked.kind(), ErrorKind::AlreadyLocked);
        assert_eq!(Error::NoPermission("x".into()).kind(), ErrorKind::NoPermission);
        assert_eq!(
            Error::Storage(vsl_core::Error::Storage("down".into())).kind(),
            ErrorKind::Unexpected
        );
        assert_eq!(locked.to_string(), "/a is already locked by svc1");
    }
}
