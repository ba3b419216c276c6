//! In-process network of agents.
//!
//! [`LocalNetwork`] lets several agents run in one process. It plays both
//! the transport (calls go straight to the target's coordinator) and the
//! membership registry:
//!
//! - every attached agent discovers every other attached agent
//! - `move_to_connected` records a symmetric link between two agents
//! - an agent's group is everything reachable through links, and its
//!   leader is the smallest id in the group (the group id is the leader id)
//!
//! The state lock is never held while awaiting another agent.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use vsl_core::{AgentId, StructuralUpdate};
use vsl_sync::{
    AgentInfo, AgentRegistry, GroupAnnouncement, GroupKey, GroupSyncCoordinator, HandshakeData,
    Transport,
};

use crate::error::{Error, Result};

struct AgentSlot {
    coordinator: Weak<GroupSyncCoordinator>,
    reachable: bool,
    /// Linked agents and when the link was first seen.
    links: BTreeMap<AgentId, SystemTime>,
}

#[derive(Default)]
struct NetworkState {
    agents: BTreeMap<AgentId, AgentSlot>,
}

impl NetworkState {
    /// The agent's group, the agent itself included.
    fn group_of(&self, agent: &str) -> BTreeSet<AgentId> {
        let mut group = BTreeSet::new();
        if !self.agents.contains_key(agent) {
            return group;
        }
        let mut frontier = vec![agent.to_string()];
        while let Some(current) = frontier.pop() {
            if !group.insert(current.clone()) {
                continue;
            }
            if let Some(slot) = self.agents.get(&current) {
                frontier.extend(slot.links.keys().filter(|id| !group.contains(*id)).cloned());
            }
        }
        group
    }

    fn leader_of(&self, agent: &str) -> Option<AgentId> {
        self.group_of(agent).into_iter().next()
    }

    fn coordinators(&self, ids: impl IntoIterator<Item = AgentId>) -> Vec<Arc<GroupSyncCoordinator>> {
        ids.into_iter()
            .filter_map(|id| self.agents.get(&id))
            .filter_map(|slot| slot.coordinator.upgrade())
            .collect()
    }
}

/// Shared handle to an in-process network.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    state: Arc<RwLock<NetworkState>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport endpoint for `agent`.
    pub fn transport(&self, agent: impl Into<AgentId>) -> Arc<LocalTransport> {
        Arc::new(LocalTransport {
            network: self.clone(),
            local: agent.into(),
        })
    }

    /// Registry view for `agent`.
    pub fn registry(&self, agent: impl Into<AgentId>) -> Arc<LocalRegistry> {
        Arc::new(LocalRegistry {
            network: self.clone(),
            local: agent.into(),
        })
    }

    /// Make a coordinator reachable under its agent id.
    pub async fn attach(&self, coordinator: &Arc<GroupSyncCoordinator>) -> Result<()> {
        let agent = coordinator.agent_id().to_string();
        let mut state = self.state.write().await;
        if let Some(existing) = state.agents.get(&agent) {
            if existing.coordinator.strong_count() > 0 {
                return Err(Error::AlreadyAttached(agent));
            }
        }
        state.agents.insert(
            agent.clone(),
            AgentSlot {
                coordinator: Arc::downgrade(coordinator),
                reachable: true,
                links: BTreeMap::new(),
            },
        );
        info!(agent = %agent, agents = state.agents.len(), "Agent attached");
        Ok(())
    }

    /// Remove an agent and every link to it.
    pub async fn detach(&self, agent: &str) {
        let mut state = self.state.write().await;
        if state.agents.remove(agent).is_some() {
            for slot in state.agents.values_mut() {
                slot.links.remove(agent);
            }
            info!(agent = %agent, "Agent detached");
        }
    }

    /// Simulate an agent becoming unreachable (or reachable again).
    pub async fn set_reachable(&self, agent: &str, reachable: bool) {
        let mut state = self.state.write().await;
        if let Some(slot) = state.agents.get_mut(agent) {
            slot.reachable = reachable;
            debug!(agent = %agent, reachable, "Reachability changed");
        }
    }

    /// Attached agent ids in the group of `agent`, sorted.
    pub async fn group_of(&self, agent: &str) -> Vec<AgentId> {
        self.state.read().await.group_of(agent).into_iter().collect()
    }

    pub async fn agent_ids(&self) -> Vec<AgentId> {
        self.state.read().await.agents.keys().cloned().collect()
    }

    async fn reach(&self, target: &str) -> vsl_sync::Result<Arc<GroupSyncCoordinator>> {
        let state = self.state.read().await;
        let slot = state
            .agents
            .get(target)
            .ok_or_else(|| vsl_sync::Error::delivery(target, "unknown agent"))?;
        if !slot.reachable {
            return Err(vsl_sync::Error::delivery(target, "unreachable"));
        }
        slot.coordinator
            .upgrade()
            .ok_or_else(|| vsl_sync::Error::delivery(target, "agent stopped"))
    }

    async fn infos(coordinators: Vec<Arc<GroupSyncCoordinator>>) -> Vec<AgentInfo> {
        let mut infos = Vec::with_capacity(coordinators.len());
        for coordinator in coordinators {
            match coordinator.local_info().await {
                Ok(info) => infos.push(info),
                Err(e) => warn!(agent = %coordinator.agent_id(), error = %e, "Failed to read agent info"),
            }
        }
        infos
    }
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNetwork").finish_non_exhaustive()
    }
}

/// [`Transport`] endpoint of one agent on a [`LocalNetwork`].
#[derive(Debug)]
pub struct LocalTransport {
    network: LocalNetwork,
    local: AgentId,
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send_handshake(&self, target: &str, data: HandshakeData) -> vsl_sync::Result<Option<HandshakeData>> {
        debug!(from = %self.local, target = %target, "Sending handshake");
        self.network.reach(target).await?.handle_handshake_request(data).await
    }

    async fn request_full_update(&self, agent: &str) -> vsl_sync::Result<StructuralUpdate> {
        self.network.reach(agent).await?.full_update().await
    }

    async fn send_update(&self, target: &str, update: &StructuralUpdate) -> vsl_sync::Result<()> {
        let outcome = self.network.reach(target).await?.handle_update(update.clone()).await?;
        debug!(from = %self.local, target = %target, update = %update, %outcome, "Update delivered");
        Ok(())
    }

    async fn deliver_group_key(&self, target: &str, key: &GroupKey) -> vsl_sync::Result<()> {
        self.network.reach(target).await?.handle_group_key(key.clone()).await;
        Ok(())
    }
}

/// [`AgentRegistry`] view of one agent on a [`LocalNetwork`].
#[derive(Debug)]
pub struct LocalRegistry {
    network: LocalNetwork,
    local: AgentId,
}

#[async_trait]
impl AgentRegistry for LocalRegistry {
    async fn is_leader(&self) -> bool {
        let state = self.network.state.read().await;
        state.leader_of(&self.local).as_deref() == Some(self.local.as_str())
    }

    async fn unconnected_agent_ids(&self) -> Vec<AgentId> {
        let state = self.network.state.read().await;
        let group = state.group_of(&self.local);
        state
            .agents
            .keys()
            .filter(|id| !group.contains(*id))
            .cloned()
            .collect()
    }

    async fn connected_agent_infos(&self) -> Vec<AgentInfo> {
        let members = {
            let state = self.network.state.read().await;
            let mut group = state.group_of(&self.local);
            group.remove(&self.local);
            state.coordinators(group)
        };
        LocalNetwork::infos(members).await
    }

    async fn network_size(&self) -> usize {
        self.network.state.read().await.group_of(&self.local).len().max(1)
    }

    async fn leader_of(&self, group_id: &str) -> Option<AgentId> {
        self.network.state.read().await.leader_of(group_id)
    }

    async fn announced_group(&self, agent_id: &str) -> Option<GroupAnnouncement> {
        let state = self.network.state.read().await;
        let group = state.group_of(agent_id);
        let leader = group.iter().next()?.clone();
        Some(GroupAnnouncement {
            group_id: leader,
            size: group.len(),
        })
    }

    async fn move_to_connected(
        &self,
        agent: &AgentInfo,
        first_seen: SystemTime,
        _last_seen: SystemTime,
    ) -> vsl_sync::Result<()> {
        let mut state = self.network.state.write().await;
        if !state.agents.contains_key(&agent.agent_id) {
            return Err(vsl_sync::Error::Registry(format!("unknown agent {}", agent.agent_id)));
        }
        for (from, to) in [(&self.local, &agent.agent_id), (&agent.agent_id, &self.local)] {
            if let Some(slot) = state.agents.get_mut(from) {
                slot.links.entry(to.clone()).or_insert(first_seen);
            }
        }
        debug!(agent = %self.local, connected = %agent.agent_id, "Agent connected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsl_core::MemoryStore;
    use vsl_sync::SyncConfig;

    async fn join(network: &LocalNetwork, agent: &str) -> Arc<GroupSyncCoordinator> {
        let coordinator = Arc::new(GroupSyncCoordinator::new(
            agent,
            Arc::new(MemoryStore::new(agent)),
            network.transport(agent),
            network.registry(agent),
            SyncConfig::default(),
        ));
        network.attach(&coordinator).await.unwrap();
        coordinator
    }

    #[tokio::test]
    async fn lone_agents_lead_their_own_group() {
        let network = LocalNetwork::new();
        let _k1 = join(&network, "k1").await;
        let _k2 = join(&network, "k2").await;

        let registry = network.registry("k2");
        assert!(registry.is_leader().await);
        assert_eq!(registry.network_size().await, 1);
        assert_eq!(registry.unconnected_agent_ids().await, vec!["k1".to_string()]);
        assert_eq!(
            registry.announced_group("k1").await,
            Some(GroupAnnouncement {
                group_id: "k1".into(),
                size: 1
            })
        );
    }

    #[tokio::test]
    async fn links_are_symmetric_and_transitive() {
        let network = LocalNetwork::new();
        let _agents = [join(&network, "k1").await, join(&network, "k2").await, join(&network, "k3").await];
        let now = SystemTime::now();

        network
            .registry("k2")
            .move_to_connected(&AgentInfo::new("k3", ""), now, now)
            .await
            .unwrap();
        network
            .registry("k1")
            .move_to_connected(&AgentInfo::new("k2", ""), now, now)
            .await
            .unwrap();

        assert_eq!(network.group_of("k3").await, vec!["k1", "k2", "k3"]);
        let k3 = network.registry("k3");
        assert!(!k3.is_leader().await);
        assert!(k3.unconnected_agent_ids().await.is_empty());
        let ids: Vec<_> = k3.connected_agent_infos().await.into_iter().map(|a| a.agent_id).collect();
        assert_eq!(ids, vec!["k1", "k2"]);
        assert_eq!(k3.leader_of("k3").await.as_deref(), Some("k1"));
    }

    #[tokio::test]
    async fn unreachable_and_detached_agents_fail_delivery() {
        let network = LocalNetwork::new();
        let _k1 = join(&network, "k1").await;
        let k2 = join(&network, "k2").await;
        let transport = network.transport("k1");

        network.set_reachable("k2", false).await;
        let err = transport.request_full_update("k2").await.unwrap_err();
        assert_eq!(err.kind(), vsl_core::ErrorKind::DeliveryFailed);

        network.set_reachable("k2", true).await;
        let snapshot = transport.request_full_update("k2").await.unwrap();
        assert_eq!(snapshot.origin_agent, "k2");

        drop(k2);
        assert!(transport.request_full_update("k2").await.is_err());
        network.detach("k2").await;
        assert_eq!(network.agent_ids().await, vec!["k1"]);
    }

    #[tokio::test]
    async fn duplicate_attach_is_rejected() {
        let network = LocalNetwork::new();
        let _k1 = join(&network, "k1").await;
        let duplicate = Arc::new(GroupSyncCoordinator::new(
            "k1",
            Arc::new(MemoryStore::new("k1")),
            network.transport("k1"),
            network.registry("k1"),
            SyncConfig::default(),
        ));
        assert!(matches!(network.attach(&duplicate).await, Err(Error::AlreadyAttached(_))));
    }

    #[tokio::test]
    async fn group_key_reaches_target() {
        let network = LocalNetwork::new();
        let _k1 = join(&network, "k1").await;
        let k2 = join(&network, "k2").await;

        let key = GroupKey::generate(32, "suite");
        network.transport("k1").deliver_group_key("k2", &key).await.unwrap();
        assert_eq!(k2.group_key_fingerprint().await, Some(key.fingerprint()));
    }
}
