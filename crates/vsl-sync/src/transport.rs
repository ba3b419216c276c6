//! Collaborators the coordinator talks through.

use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vsl_core::{AgentId, StructuralUpdate};

use crate::error::Result;
use crate::handshake::{AgentInfo, GroupKey, HandshakeData};

/// Point-to-point messaging between agents.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a handshake request. `None` means the target deferred.
    async fn send_handshake(&self, target: &str, data: HandshakeData) -> Result<Option<HandshakeData>>;

    /// Ask `agent` for a full snapshot of its own subtree.
    async fn request_full_update(&self, agent: &str) -> Result<StructuralUpdate>;

    async fn send_update(&self, target: &str, update: &StructuralUpdate) -> Result<()>;

    async fn deliver_group_key(&self, target: &str, key: &GroupKey) -> Result<()>;
}

/// Group identity and size as announced by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAnnouncement {
    pub group_id: String,
    pub size: usize,
}

/// Membership view of the local agent.
///
/// Connected agents are the other members of the local group; unconnected
/// agents have been discovered but belong to another group.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn is_leader(&self) -> bool;

    async fn unconnected_agent_ids(&self) -> Vec<AgentId>;

    /// Other members of the local group. Never includes the local agent.
    async fn connected_agent_infos(&self) -> Vec<AgentInfo>;

    /// Size of the local group, local agent included.
    async fn network_size(&self) -> usize;

    async fn leader_of(&self, group_id: &str) -> Option<AgentId>;

    async fn announced_group(&self, agent_id: &str) -> Option<GroupAnnouncement>;

    async fn move_to_connected(
        &self,
        agent: &AgentInfo,
        first_seen: SystemTime,
        last_seen: SystemTime,
    ) -> Result<()>;
}
