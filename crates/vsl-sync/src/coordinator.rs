//! Group Sync Coordinator - merge handshakes and update replication.
//!
//! # Merging groups
//!
//! Each group has one leader. On every loop iteration a leader looks at the
//! agents it has discovered but is not connected to, and for each foreign
//! group decides with [`should_initiate`] whether it is the side that opens
//! the handshake:
//!
//! ```text
//!   initiator I                                responder R
//!   ───────────                                ───────────
//!   HandshakeData{I's group}        ────────►  try handshake lock, must lead
//!                                              new group key
//!                                              apply merge (I's group)
//!                                   ◄────────  HandshakeData{R's group, key}
//!   apply merge (R's group, key)
//! ```
//!
//! Applying a merge hands the key to every member the agent was connected to
//! before the merge, marks the remote agents connected, pulls a snapshot of
//! every remote agent whose hash is not known locally and forwards it to the
//! old members. Delivery failures never fail the merge: keys that cannot be
//! delivered are queued and retried at the start of the next iterations.
//!
//! # Update ordering
//!
//! Structural updates from one origin form a hash chain. [`handle_update`]
//! applies an update only when its `hash_from` matches the local hash for
//! the origin (or it is a snapshot) and otherwise parks it in the
//! [`UpdateReplayCache`] until the gap is filled.
//!
//! [`handle_update`]: GroupSyncCoordinator::handle_update

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};
use vsl_core::{AgentId, BackgroundTask, Storage, StructuralUpdate};

use crate::cache::{KeyDeliveryQueue, UpdateReplayCache};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::handshake::{AgentInfo, GroupKey, HandshakeData};
use crate::policy::should_initiate;
use crate::transport::{AgentRegistry, Transport};

/// What [`GroupSyncCoordinator::handle_update`] did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The update describes the local agent's own subtree.
    OwnUpdate,
    /// The local replica is already at the update's `hash_to`.
    AlreadyCurrent,
    /// The update and `count - 1` cached successors were applied.
    Applied { count: usize },
    /// The predecessor is missing; the update waits in the replay cache.
    Cached,
}

impl std::fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OwnUpdate => write!(f, "OwnUpdate"),
            Self::AlreadyCurrent => write!(f, "AlreadyCurrent"),
            Self::Applied { count } => write!(f, "Applied({count})"),
            Self::Cached => write!(f, "Cached"),
        }
    }
}

/// Result of an initiated handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Completed,
    /// Either side was busy or the target was no longer a leader.
    Deferred,
}

/// Counters describing the coordinator's activity so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub updates_applied: u64,
    pub updates_cached: u64,
    pub updates_ignored: u64,
    pub handshakes_completed: u64,
    pub handshakes_deferred: u64,
    pub pending_key_deliveries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    updates_applied: AtomicU64,
    updates_cached: AtomicU64,
    updates_ignored: AtomicU64,
    handshakes_completed: AtomicU64,
    handshakes_deferred: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

/// Keeps one agent's group membership, group key and replicas in sync.
pub struct GroupSyncCoordinator {
    agent_id: AgentId,
    config: SyncConfig,
    storage: Arc<dyn Storage>,
    transport: Arc<dyn Transport>,
    registry: Arc<dyn AgentRegistry>,
    replay_cache: Arc<UpdateReplayCache>,
    key_queue: KeyDeliveryQueue,
    group_key: RwLock<Option<GroupKey>>,
    /// At most one handshake in flight, initiated or answered.
    handshake_lock: Mutex<()>,
    /// Serialises update application so hash checks and writes are atomic.
    update_lock: Mutex<()>,
    counters: Counters,
}

impl GroupSyncCoordinator {
    pub fn new(
        agent_id: impl Into<AgentId>,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        registry: Arc<dyn AgentRegistry>,
        config: SyncConfig,
    ) -> Self {
        let replay_cache = Arc::new(UpdateReplayCache::new(config.update_cache_max_age));
        Self {
            agent_id: agent_id.into(),
            config,
            storage,
            transport,
            registry,
            replay_cache,
            key_queue: KeyDeliveryQueue::default(),
            group_key: RwLock::new(None),
            handshake_lock: Mutex::new(()),
            update_lock: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn replay_cache(&self) -> &Arc<UpdateReplayCache> {
        &self.replay_cache
    }

    /// Apply a structural update in hash-chain order.
    pub async fn handle_update(&self, update: StructuralUpdate) -> Result<UpdateOutcome> {
        if update.origin_agent == self.agent_id {
            bump(&self.counters.updates_ignored, 1);
            return Ok(UpdateOutcome::OwnUpdate);
        }

        let _guard = self.update_lock.lock().await;
        let origin = update.origin_agent.clone();
        let local_hash = self.storage.current_hash(&origin).await?;

        if update.hash_to == local_hash {
            trace!(update = %update, "Update already applied");
            bump(&self.counters.updates_ignored, 1);
            return Ok(UpdateOutcome::AlreadyCurrent);
        }

        if !update.is_snapshot() && update.hash_from != local_hash {
            debug!(update = %update, local_hash = %local_hash, "Predecessor missing");
            self.replay_cache.put(update).await;
            bump(&self.counters.updates_cached, 1);
            return Ok(UpdateOutcome::Cached);
        }

        self.storage.apply_structural_update(&update).await?;
        let mut hash = update.hash_to;
        let mut count = 1;
        while let Some(next) = self.replay_cache.take_matching(&origin, &hash).await {
            debug!(update = %next, "Replaying cached update");
            if let Err(e) = self.storage.apply_structural_update(&next).await {
                warn!(update = %next, error = %e, "Cached update rejected, keeping it cached");
                self.replay_cache.put(next).await;
                bump(&self.counters.updates_applied, count as u64);
                return Err(e.into());
            }
            hash = next.hash_to;
            count += 1;
        }

        debug!(origin = %origin, hash = %hash, count, "Updates applied");
        bump(&self.counters.updates_applied, count as u64);
        Ok(UpdateOutcome::Applied { count })
    }

    /// Pull a full snapshot of `agent` if `announced_hash` differs from ours.
    ///
    /// Returns whether a snapshot was pulled.
    pub async fn check_remote_hash(&self, agent: &str, announced_hash: &str) -> Result<bool> {
        let local_hash = self.storage.current_hash(agent).await?;
        if local_hash == announced_hash {
            return Ok(false);
        }
        info!(agent = %agent, local_hash = %local_hash, announced_hash = %announced_hash, "Hash mismatch, pulling snapshot");
        let snapshot = self.transport.request_full_update(agent).await?;
        self.handle_update(snapshot).await?;
        Ok(true)
    }

    /// Send a local structural update to every connected agent.
    ///
    /// Returns how many recipients accepted it.
    pub async fn publish_local_update(&self, update: &StructuralUpdate) -> usize {
        let members = self.registry.connected_agent_infos().await;
        let sends = members.iter().map(|member| async move {
            let result = self.transport.send_update(&member.agent_id, update).await;
            (member.agent_id.as_str(), result)
        });

        let mut delivered = 0;
        for (agent, result) in join_all(sends).await {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => warn!(target = %agent, update = %update, error = %e, "Failed to publish update"),
            }
        }
        debug!(update = %update, delivered, recipients = members.len(), "Update published");
        delivered
    }

    /// Answer a handshake request from another group's leader.
    ///
    /// Returns `None` without waiting when a handshake is already in flight
    /// or this agent does not lead its group.
    pub async fn handle_handshake_request(&self, request: HandshakeData) -> Result<Option<HandshakeData>> {
        let Ok(_guard) = self.handshake_lock.try_lock() else {
            debug!(agent = %self.agent_id, "Handshake in flight, deferring request");
            bump(&self.counters.handshakes_deferred, 1);
            return Ok(None);
        };
        if !self.registry.is_leader().await {
            debug!(agent = %self.agent_id, "Not leader, deferring handshake request");
            bump(&self.counters.handshakes_deferred, 1);
            return Ok(None);
        }

        let prior = self.registry.connected_agent_infos().await;
        let known_agents = self.group_view(&prior).await?;
        let key = GroupKey::generate(self.config.group_key_len, self.config.cipher_suite.as_str());

        self.apply_merge_update(&request, &prior, key.clone()).await;
        bump(&self.counters.handshakes_completed, 1);
        info!(
            agent = %self.agent_id,
            merged = request.known_agents.len(),
            fingerprint = %short(&key.fingerprint()),
            "Accepted group merge"
        );
        Ok(Some(HandshakeData::reply(known_agents, &key)))
    }

    /// Open a handshake with the leader of another group.
    pub async fn initiate_handshake(&self, target: &str) -> Result<HandshakeOutcome> {
        let Ok(_guard) = self.handshake_lock.try_lock() else {
            bump(&self.counters.handshakes_deferred, 1);
            return Ok(HandshakeOutcome::Deferred);
        };

        let prior = self.registry.connected_agent_infos().await;
        let request = HandshakeData::request(self.group_view(&prior).await?);
        let after = self.config.handshake_timeout;
        let reply = tokio::time::timeout(after, self.transport.send_handshake(target, request))
            .await
            .map_err(|_| Error::Timeout {
                operation: "handshake",
                after,
            })??;

        let Some(reply) = reply else {
            debug!(agent = %self.agent_id, target = %target, "Handshake deferred by target");
            bump(&self.counters.handshakes_deferred, 1);
            return Ok(HandshakeOutcome::Deferred);
        };
        let key = reply.group_key().ok_or_else(|| {
            Error::InvalidMessage(format!("handshake reply from {target} carries no group key"))
        })?;

        self.apply_merge_update(&reply, &prior, key).await;
        bump(&self.counters.handshakes_completed, 1);
        info!(agent = %self.agent_id, target = %target, merged = reply.known_agents.len(), "Group merge completed");
        Ok(HandshakeOutcome::Completed)
    }

    /// Retry queued group keys. Returns how many were delivered.
    pub async fn redeliver_group_keys(&self) -> usize {
        let max_age = self.config.group_key_cache_max_age;
        let mut delivered = 0;
        for (agent, pending) in self.key_queue.drain().await {
            match self.transport.deliver_group_key(&agent, &pending.key).await {
                Ok(()) => {
                    debug!(target = %agent, "Queued group key delivered");
                    delivered += 1;
                }
                Err(e) if pending.queued_at.elapsed() > max_age => {
                    warn!(target = %agent, error = %e, "Dropping undeliverable group key");
                }
                Err(e) => {
                    trace!(target = %agent, error = %e, "Group key still undeliverable");
                    self.key_queue.requeue(agent, pending).await;
                }
            }
        }
        delivered
    }

    /// One loop iteration: key redelivery, then the handshake scan.
    pub async fn run_once(&self) {
        self.redeliver_group_keys().await;

        if !self.registry.is_leader().await {
            return;
        }
        let local_size = self.registry.network_size().await;
        let mut visited = HashSet::new();

        for agent in self.registry.unconnected_agent_ids().await {
            let Some(group) = self.registry.announced_group(&agent).await else {
                continue;
            };
            if !visited.insert(group.group_id.clone()) {
                continue;
            }
            let Some(leader) = self.registry.leader_of(&group.group_id).await else {
                continue;
            };
            if !should_initiate(local_size, &self.agent_id, group.size, &leader) {
                trace!(agent = %self.agent_id, remote = %leader, "Waiting for remote leader to initiate");
                continue;
            }

            match self.initiate_handshake(&leader).await {
                // group membership changed, rescan next iteration
                Ok(HandshakeOutcome::Completed) => return,
                Ok(HandshakeOutcome::Deferred) => {}
                Err(e) if e.is_soft() => {
                    debug!(agent = %self.agent_id, target = %leader, error = %e, "Handshake not completed, retrying later")
                }
                Err(e) => warn!(agent = %self.agent_id, target = %leader, error = %e, "Handshake failed"),
            }
        }
    }

    /// Spawn the coordinator loop.
    pub fn spawn(self: &Arc<Self>) -> BackgroundTask {
        let coordinator = Arc::clone(self);
        BackgroundTask::spawn_interval("group-sync", self.config.sync_interval, move || {
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.run_once().await }
        })
    }

    /// Full snapshot of the local agent's own subtree.
    pub async fn full_update(&self) -> Result<StructuralUpdate> {
        Ok(self.storage.snapshot(&self.agent_id).await?)
    }

    /// Install a group key received from another member.
    pub async fn handle_group_key(&self, key: GroupKey) {
        info!(agent = %self.agent_id, fingerprint = %short(&key.fingerprint()), "Received group key");
        *self.group_key.write().await = Some(key);
    }

    pub async fn group_key_fingerprint(&self) -> Option<String> {
        self.group_key.read().await.as_ref().map(GroupKey::fingerprint)
    }

    pub async fn stats(&self) -> SyncStats {
        SyncStats {
            updates_applied: self.counters.updates_applied.load(Ordering::Relaxed),
            updates_cached: self.counters.updates_cached.load(Ordering::Relaxed),
            updates_ignored: self.counters.updates_ignored.load(Ordering::Relaxed),
            handshakes_completed: self.counters.handshakes_completed.load(Ordering::Relaxed),
            handshakes_deferred: self.counters.handshakes_deferred.load(Ordering::Relaxed),
            pending_key_deliveries: self.key_queue.len().await,
        }
    }

    /// What this agent announces about itself.
    pub async fn local_info(&self) -> Result<AgentInfo> {
        let local_hash = self.storage.current_hash(&self.agent_id).await?;
        Ok(AgentInfo::new(self.agent_id.clone(), local_hash))
    }

    /// The local agent followed by its connected members.
    async fn group_view(&self, connected: &[AgentInfo]) -> Result<Vec<AgentInfo>> {
        let mut agents = Vec::with_capacity(connected.len() + 1);
        agents.push(self.local_info().await?);
        agents.extend(connected.iter().cloned());
        Ok(agents)
    }

    async fn apply_merge_update(&self, remote: &HandshakeData, prior_connected: &[AgentInfo], key: GroupKey) {
        *self.group_key.write().await = Some(key.clone());
        for member in prior_connected {
            self.deliver_key_with_retry(&member.agent_id, &key).await;
        }

        let known: HashMap<&str, &str> = prior_connected
            .iter()
            .map(|a| (a.agent_id.as_str(), a.current_hash.as_str()))
            .collect();
        let now = SystemTime::now();
        let mut merged = Vec::new();
        for info in &remote.known_agents {
            if info.agent_id == self.agent_id
                || known.get(info.agent_id.as_str()) == Some(&info.current_hash.as_str())
            {
                continue;
            }
            match self.registry.move_to_connected(info, now, now).await {
                Ok(()) => merged.push(info),
                Err(e) => warn!(agent = %info.agent_id, error = %e, "Failed to connect merged agent"),
            }
        }

        for info in merged {
            match self.storage.current_hash(&info.agent_id).await {
                Ok(hash) if hash == info.current_hash => continue,
                Ok(_) => {}
                Err(e) => {
                    warn!(agent = %info.agent_id, error = %e, "Failed to read local hash");
                    continue;
                }
            }
            if let Err(e) = self.pull_and_forward(&info.agent_id, prior_connected).await {
                warn!(agent = %info.agent_id, error = %e, "Failed to pull snapshot of merged agent");
            }
        }
    }

    async fn deliver_key_with_retry(&self, agent: &str, key: &GroupKey) {
        for attempt in 1..=2 {
            match self.transport.deliver_group_key(agent, key).await {
                Ok(()) => return,
                Err(e) => debug!(target = %agent, attempt, error = %e, "Group key delivery failed"),
            }
        }
        warn!(target = %agent, "Group key undeliverable, queued for redelivery");
        self.key_queue.push(agent.to_string(), key.clone()).await;
    }

    async fn pull_and_forward(&self, agent: &str, forward_to: &[AgentInfo]) -> Result<()> {
        let snapshot = self.transport.request_full_update(agent).await?;
        if !snapshot.is_snapshot() || snapshot.origin_agent != agent {
            return Err(Error::InvalidMessage(format!(
                "expected a snapshot of {agent}, got {snapshot}"
            )));
        }
        self.handle_update(snapshot.clone()).await?;

        for member in forward_to.iter().filter(|m| m.agent_id != agent) {
            if let Err(e) = self.transport.send_update(&member.agent_id, &snapshot).await {
                warn!(target = %member.agent_id, update = %snapshot, error = %e, "Failed to forward snapshot");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for GroupSyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupSyncCoordinator")
            .field("agent_id", &self.agent_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}
