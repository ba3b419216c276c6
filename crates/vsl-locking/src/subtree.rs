//! The record of one held lock.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use vsl_core::{Address, WILDCARD_ACCESS_ID};

use crate::callback::LockCallback;

/// Identity and access ids of whoever asks for a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: String,
    pub access_ids: BTreeSet<String>,
}

impl Requester {
    pub fn new<I, S>(id: impl Into<String>, access_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            access_ids: access_ids.into_iter().map(Into::into).collect(),
        }
    }

    /// True if the requester holds the wildcard or shares an id with `required`.
    pub fn may_access(&self, required: &[String]) -> bool {
        self.access_ids.contains(WILDCARD_ACCESS_ID)
            || required.iter().any(|id| self.access_ids.contains(id))
    }
}

/// One active exclusive lock on a subtree.
pub struct LockedSubtree {
    pub(crate) path: Address,
    pub(crate) holder_id: String,
    pub(crate) acquired_at: Instant,
    pub(crate) validity: Duration,
    /// Staged writes at or below `path`, invisible to storage until commit.
    pub(crate) pending_writes: BTreeMap<Address, String>,
    pub(crate) expiry_warning_sent: bool,
    pub(crate) callback: Arc<dyn LockCallback>,
}

impl LockedSubtree {
    pub(crate) fn new(
        path: Address,
        holder_id: String,
        validity: Duration,
        callback: Arc<dyn LockCallback>,
    ) -> Self {
        Self {
            path,
            holder_id,
            acquired_at: Instant::now(),
            validity,
            pending_writes: BTreeMap::new(),
            expiry_warning_sent: false,
            callback,
        }
    }

    pub fn path(&self) -> &Address {
        &self.path
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn expires_at(&self) -> Instant {
        self.acquired_at + self.validity
    }

    /// Validity left at `now`, zero once expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at().saturating_duration_since(now)
    }

    pub fn pending_writes(&self) -> &BTreeMap<Address, String> {
        &self.pending_writes
    }

    pub(crate) fn info(&self, now: Instant) -> LockInfo {
        LockInfo {
            path: self.path.clone(),
            holder_id: self.holder_id.clone(),
            remaining: self.remaining(now),
            pending_writes: self.pending_writes.len(),
            expiry_warning_sent: self.expiry_warning_sent,
        }
    }
}

impl std::fmt::Debug for LockedSubtree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedSubtree")
            .field("path", &self.path)
            .field("holder_id", &self.holder_id)
            .field("validity", &self.validity)
            .field("pending_writes", &self.pending_writes.len())
            .field("expiry_warning_sent", &self.expiry_warning_sent)
            .finish_non_exhaustive()
    }
}

/// Diagnostic snapshot of a held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub path: Address,
    pub holder_id: String,
    pub remaining: Duration,
    pub pending_writes: usize,
    pub expiry_warning_sent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoopCallback;

    #[test]
    fn wildcard_grants_access() {
        let requester = Requester::new("svc1", ["*"]);
        assert!(requester.may_access(&[]));
        assert!(requester.may_access(&["admins".to_string()]));
    }

    #[test]
    fn access_requires_intersection() {
        let requester = Requester::new("svc1", ["readers", "writers"]);
        assert!(requester.may_access(&["writers".to_string(), "admins".to_string()]));
        assert!(!requester.may_access(&["admins".to_string()]));
        assert!(!requester.may_access(&[]));
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_counts_down_to_zero() {
        let lock = LockedSubtree::new(
            Address::new("/a"),
            "svc1".into(),
            Duration::from_secs(10),
            Arc::new(NoopCallback),
        );
        assert_eq!(lock.remaining(Instant::now()), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(lock.remaining(Instant::now()), Duration::from_secs(6));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(lock.remaining(Instant::now()), Duration::ZERO);
    }
}
