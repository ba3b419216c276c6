//! The lock table.
//!
//! # Exclusivity
//!
//! No two held locks overlap: for any two locked paths neither is an
//! ancestor of the other. The only exception is the instant inside
//! [`LockTable::acquire`] where a same-holder lock is folded (committed) so a
//! broader or narrower one can take its place.
//!
//! # Serialisation
//!
//! Every operation runs under one table-wide mutex. Commit flushes staged
//! writes to storage while still holding it, so a commit is atomic with
//! respect to every other acquire, commit, rollback and sweep.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vsl_core::{Address, Storage, TreeNode};

use crate::callback::{notify, LockCallback};
use crate::config::LockConfig;
use crate::error::{Error, Result};
use crate::subtree::{LockInfo, LockedSubtree, Requester};

/// Outcome of one expiration sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Locks whose holders were warned of imminent expiry.
    pub warned: Vec<Address>,
    /// Locks removed with their staged writes discarded.
    pub expired: Vec<Address>,
}

/// Authoritative set of subtree locks held on one agent.
pub struct LockTable {
    storage: Arc<dyn Storage>,
    config: LockConfig,
    locks: Mutex<BTreeMap<Address, LockedSubtree>>,
}

impl LockTable {
    pub fn new(storage: Arc<dyn Storage>, config: LockConfig) -> Self {
        Self {
            storage,
            config,
            locks: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire an exclusive lock on `path`.
    ///
    /// Locks held by the same requester on an ancestor or on descendants are
    /// committed first and replaced by the new lock. Any overlapping lock held
    /// by someone else fails the call with [`Error::AlreadyLocked`].
    pub async fn acquire(
        &self,
        path: &Address,
        requester: &Requester,
        required_access_ids: &[String],
        callback: Arc<dyn LockCallback>,
    ) -> Result<()> {
        if !requester.may_access(required_access_ids) {
            return Err(Error::NoPermission(format!(
                "{} has none of the access ids required for {}",
                requester.id, path
            )));
        }

        let mut locks = self.locks.lock().await;

        if let Some(existing) = locks.get(path) {
            return Err(Error::AlreadyLocked {
                path: path.clone(),
                holder: existing.holder_id.clone(),
            });
        }

        let overlapping: Vec<Address> = locks
            .keys()
            .filter(|held| held.overlaps(path))
            .cloned()
            .collect();
        if let Some(foreign) = overlapping
            .iter()
            .filter_map(|held| locks.get(held))
            .find(|lock| lock.holder_id != requester.id)
        {
            return Err(Error::AlreadyLocked {
                path: foreign.path.clone(),
                holder: foreign.holder_id.clone(),
            });
        }

        // held locks are disjoint, so their staged writes never collide
        let folded: BTreeMap<Address, String> = overlapping
            .iter()
            .filter_map(|held| locks.get(held))
            .flat_map(|lock| lock.pending_writes.clone())
            .collect();
        if !folded.is_empty() {
            if let Err(e) = self.storage.apply_batch(folded).await {
                warn!(path = %path, error = %e, "Fold failed, locks kept");
                return Err(e.into());
            }
        }
        for held in overlapping {
            info!(folded = %held, path = %path, holder = %requester.id, "Folded same-holder lock");
            locks.remove(&held);
        }

        locks.insert(
            path.clone(),
            LockedSubtree::new(
                path.clone(),
                requester.id.clone(),
                self.config.validity,
                Arc::clone(&callback),
            ),
        );
        drop(locks);

        debug!(path = %path, holder = %requester.id, "Lock acquired");
        notify("acquired", path, callback.on_acquired(path));
        Ok(())
    }

    /// Stage a write under the nearest lock at or above `address`.
    pub async fn stage_write(&self, address: &Address, value: impl Into<String>) -> Result<()> {
        let mut locks = self.locks.lock().await;
        let responsible = Self::responsible_path(&locks, address)
            .ok_or_else(|| Error::NotLocked(address.clone()))?;
        if let Some(lock) = locks.get_mut(&responsible) {
            lock.pending_writes.insert(address.clone(), value.into());
        }
        Ok(())
    }

    /// Flush the staged writes of the lock on `path` and release it.
    pub async fn commit(&self, path: &Address, requester_id: &str) -> Result<()> {
        let mut locks = self.locks.lock().await;
        Self::check_holder(&locks, path, requester_id)?;
        self.commit_locked(&mut locks, path).await
    }

    /// Release the lock on `path`, discarding its staged writes.
    pub async fn rollback(&self, path: &Address, requester_id: &str) -> Result<()> {
        let mut locks = self.locks.lock().await;
        Self::check_holder(&locks, path, requester_id)?;
        if let Some(lock) = locks.remove(path) {
            debug!(path = %path, discarded = lock.pending_writes.len(), "Lock rolled back");
        }
        Ok(())
    }

    /// True if `path` or one of its ancestors is locked.
    pub async fn is_locked(&self, path: &Address) -> bool {
        let locks = self.locks.lock().await;
        Self::responsible_path(&locks, path).is_some()
    }

    /// True if the lock covering `path` is held by `holder_id`.
    pub async fn is_locked_by(&self, path: &Address, holder_id: &str) -> bool {
        let locks = self.locks.lock().await;
        Self::responsible_path(&locks, path)
            .and_then(|p| locks.get(&p))
            .is_some_and(|lock| lock.holder_id == holder_id)
    }

    /// True if some address strictly below `path` is locked.
    pub async fn has_locked_descendant(&self, path: &Address) -> bool {
        let locks = self.locks.lock().await;
        locks.keys().any(|held| path.is_ancestor_of(held))
    }

    /// Return a copy of `node` (read at `address`) with `issuer_id`'s own
    /// staged writes applied.
    ///
    /// Every node on the way from `address` down to a written address gets
    /// its version bumped; the written node takes the staged value. Writes
    /// staged by other holders are never visible.
    pub async fn overlay_pending_writes(
        &self,
        address: &Address,
        node: &TreeNode,
        issuer_id: &str,
    ) -> TreeNode {
        let locks = self.locks.lock().await;
        let mut result = node.clone();

        let own_writes = locks
            .values()
            .filter(|lock| lock.holder_id == issuer_id)
            .flat_map(|lock| lock.pending_writes.iter());
        for (written, value) in own_writes {
            let Some(segments) = address.relative_segments(written) else {
                continue;
            };
            let mut current = &mut result;
            current.version += 1;
            for segment in segments {
                current = current.child_mut_or_insert(segment);
                current.version += 1;
            }
            current.value = Some(value.clone());
        }
        result
    }

    /// Warn holders of locks close to expiry and drop expired locks.
    ///
    /// The whole table is inspected under the mutex; callbacks run after it
    /// is released. Expired staged writes are discarded, never committed.
    pub async fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let mut warned = Vec::new();
        let mut expired = Vec::new();

        {
            let mut locks = self.locks.lock().await;
            for lock in locks.values_mut() {
                if lock.remaining(now) <= self.config.warning_threshold && !lock.expiry_warning_sent {
                    lock.expiry_warning_sent = true;
                    warned.push((lock.path.clone(), Arc::clone(&lock.callback)));
                }
            }

            let expired_paths: Vec<Address> = locks
                .values()
                .filter(|lock| lock.remaining(now).is_zero())
                .map(|lock| lock.path.clone())
                .collect();
            for path in expired_paths {
                if let Some(lock) = locks.remove(&path) {
                    warn!(
                        path = %path,
                        holder = %lock.holder_id,
                        discarded = lock.pending_writes.len(),
                        "Lock expired"
                    );
                    expired.push((path, lock.callback));
                }
            }
        }

        let mut report = SweepReport::default();
        for (path, callback) in warned {
            debug!(path = %path, "Lock about to expire");
            notify("will_expire", &path, callback.on_will_expire(&path));
            report.warned.push(path);
        }
        for (path, callback) in expired {
            notify("expired", &path, callback.on_expired(&path));
            report.expired.push(path);
        }
        report
    }

    /// Snapshot of every held lock.
    pub async fn held_locks(&self) -> Vec<LockInfo> {
        let now = Instant::now();
        let locks = self.locks.lock().await;
        locks.values().map(|lock| lock.info(now)).collect()
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }

    fn responsible_path(locks: &BTreeMap<Address, LockedSubtree>, address: &Address) -> Option<Address> {
        std::iter::once(address.clone())
            .chain(address.ancestors())
            .find(|candidate| locks.contains_key(candidate))
    }

    fn check_holder(
        locks: &BTreeMap<Address, LockedSubtree>,
        path: &Address,
        requester_id: &str,
    ) -> Result<()> {
        let lock = locks
            .get(path)
            .ok_or_else(|| Error::NotLocked(path.clone()))?;
        if lock.holder_id != requester_id {
            return Err(Error::NoPermission(format!(
                "{} is held by {}, not {}",
                path, lock.holder_id, requester_id
            )));
        }
        Ok(())
    }

    /// Flush and remove the lock on `path`. The lock is kept if storage fails.
    async fn commit_locked(
        &self,
        locks: &mut BTreeMap<Address, LockedSubtree>,
        path: &Address,
    ) -> Result<()> {
        let Some(lock) = locks.remove(path) else {
            return Err(Error::NotLocked(path.clone()));
        };
        if !lock.pending_writes.is_empty() {
            if let Err(e) = self.storage.apply_batch(lock.pending_writes.clone()).await {
                warn!(path = %path, error = %e, "Commit failed, lock kept");
                locks.insert(path.clone(), lock);
                return Err(e.into());
            }
        }
        debug!(path = %path, writes = lock.pending_writes.len(), "Lock committed");
        Ok(())
    }
}
