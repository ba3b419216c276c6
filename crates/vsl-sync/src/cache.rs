//! Buffers for messages that cannot be used yet.
//!
//! [`UpdateReplayCache`] holds structural updates whose predecessor has not
//! been applied. [`KeyDeliveryQueue`] holds group keys that could not be
//! delivered to a group member. Both are time bounded: entries past their
//! max age are discarded, and the sync protocol recovers by other means
//! (a full snapshot pull or the next merge's key).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use vsl_core::{AgentId, BackgroundTask, StructuralUpdate};

use crate::handshake::GroupKey;

#[derive(Debug)]
struct CachedUpdate {
    update: StructuralUpdate,
    cached_at: Instant,
}

/// Out-of-order structural updates keyed by `(origin, hash_from)`.
#[derive(Debug)]
pub struct UpdateReplayCache {
    max_age: Duration,
    entries: Mutex<HashMap<(AgentId, String), CachedUpdate>>,
}

impl UpdateReplayCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Cache `update` until its predecessor arrives. Replaces an earlier
    /// update from the same origin with the same `hash_from`.
    pub async fn put(&self, update: StructuralUpdate) {
        let key = (update.origin_agent.clone(), update.hash_from.clone());
        debug!(update = %update, "Caching out-of-order update");
        self.entries.lock().await.insert(
            key,
            CachedUpdate {
                update,
                cached_at: Instant::now(),
            },
        );
    }

    /// Remove and return the update from `origin` that follows `current_hash`.
    ///
    /// An entry older than the max age is removed but not returned.
    pub async fn take_matching(&self, origin: &str, current_hash: &str) -> Option<StructuralUpdate> {
        let mut entries = self.entries.lock().await;
        let cached = entries.remove(&(origin.to_string(), current_hash.to_string()))?;
        if cached.cached_at.elapsed() > self.max_age {
            warn!(update = %cached.update, "Dropping stale cached update");
            return None;
        }
        Some(cached.update)
    }

    /// Evict entries older than the max age. Returns how many were evicted.
    pub async fn sweep(&self) -> usize {
        let max_age = self.max_age;
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, cached| {
            let keep = cached.cached_at.elapsed() <= max_age;
            if !keep {
                warn!(update = %cached.update, "Evicting stale cached update");
            }
            keep
        });
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Spawn the periodic eviction sweep.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> BackgroundTask {
        let cache = Arc::clone(self);
        BackgroundTask::spawn_interval("update-cache-sweeper", period, move || {
            let cache = Arc::clone(&cache);
            async move {
                cache.sweep().await;
            }
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PendingKey {
    pub key: GroupKey,
    pub queued_at: Instant,
}

/// Group keys awaiting redelivery, at most one per agent.
#[derive(Debug, Default)]
pub(crate) struct KeyDeliveryQueue {
    pending: Mutex<BTreeMap<AgentId, PendingKey>>,
}

impl KeyDeliveryQueue {
    /// Queue `key` for `agent`, superseding any older undelivered key.
    pub async fn push(&self, agent: AgentId, key: GroupKey) {
        self.pending.lock().await.insert(
            agent,
            PendingKey {
                key,
                queued_at: Instant::now(),
            },
        );
    }

    /// Take every queued key, leaving the queue empty.
    pub async fn drain(&self) -> Vec<(AgentId, PendingKey)> {
        std::mem::take(&mut *self.pending.lock().await).into_iter().collect()
    }

    /// Put back an entry that still failed, unless a newer key was queued
    /// for the agent in the meantime.
    pub async fn requeue(&self, agent: AgentId, pending: PendingKey) {
        self.pending.lock().await.entry(agent).or_insert(pending);
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(origin: &str, from: &str, to: &str) -> StructuralUpdate {
        StructuralUpdate::delta(origin, from, to)
    }

    #[tokio::test]
    async fn take_matching_is_find_and_remove() {
        let cache = UpdateReplayCache::new(Duration::from_secs(60));
        cache.put(update("k2", "h1", "h2")).await;

        assert!(cache.take_matching("k2", "h0").await.is_none());
        assert!(cache.take_matching("k3", "h1").await.is_none());

        let taken = cache.take_matching("k2", "h1").await.unwrap();
        assert_eq!(taken.hash_to, "h2");
        assert!(cache.take_matching("k2", "h1").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn same_predecessor_replaces() {
        let cache = UpdateReplayCache::new(Duration::from_secs(60));
        cache.put(update("k2", "h1", "h2")).await;
        cache.put(update("k2", "h1", "h2b")).await;
        cache.put(update("k3", "h1", "x")).await;
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.take_matching("k2", "h1").await.unwrap().hash_to, "h2b");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_are_never_returned() {
        let cache = UpdateReplayCache::new(Duration::from_secs(60));
        cache.put(update("k2", "h1", "h2")).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.take_matching("k2", "h1").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_stale_entries() {
        let cache = UpdateReplayCache::new(Duration::from_secs(60));
        cache.put(update("k2", "h1", "h2")).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.put(update("k2", "h2", "h3")).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(cache.sweep().await, 1);
        assert!(cache.take_matching("k2", "h2").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_evicts_in_background() {
        let cache = Arc::new(UpdateReplayCache::new(Duration::from_millis(500)));
        cache.put(update("k2", "h1", "h2")).await;
        let sweeper = cache.spawn_sweeper(Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(cache.is_empty().await);
        assert!(sweeper.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn newer_key_supersedes_requeue() {
        let queue = KeyDeliveryQueue::default();
        let old = GroupKey::new(vec![1], "s");
        let new = GroupKey::new(vec![2], "s");
        queue.push("k2".into(), old).await;

        let drained = queue.drain().await;
        assert_eq!(queue.len().await, 0);
        queue.push("k2".into(), new.clone()).await;
        for (agent, pending) in drained {
            queue.requeue(agent, pending).await;
        }

        let remaining = queue.drain().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].1.key, new);
    }
}
