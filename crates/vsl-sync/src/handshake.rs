//! Messages exchanged during a group merge.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use vsl_core::{content_hash, AgentId};

use crate::error::Result;

/// What an agent announces about itself to the rest of the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub agent_id: AgentId,
    #[serde(default)]
    pub reachable_transports: Vec<String>,
    /// Structural hash of the agent's own subtree.
    #[serde(default)]
    pub current_hash: String,
}

impl AgentInfo {
    pub fn new(agent_id: impl Into<AgentId>, current_hash: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            reachable_transports: Vec::new(),
            current_hash: current_hash.into(),
        }
    }

    #[must_use]
    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.reachable_transports.push(transport.into());
        self
    }
}

/// A symmetric key shared by every member of a group.
#[derive(Clone, PartialEq, Eq)]
pub struct GroupKey {
    key: Vec<u8>,
    cipher_suite: String,
}

impl GroupKey {
    pub fn new(key: Vec<u8>, cipher_suite: impl Into<String>) -> Self {
        Self {
            key,
            cipher_suite: cipher_suite.into(),
        }
    }

    /// Fresh random key of `len` bytes.
    pub fn generate(len: usize, cipher_suite: impl Into<String>) -> Self {
        let mut key = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(key, cipher_suite)
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn cipher_suite(&self) -> &str {
        &self.cipher_suite
    }

    /// BLAKE3 digest of the key bytes. Safe to log and compare.
    pub fn fingerprint(&self) -> String {
        content_hash(&self.key)
    }
}

impl std::fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fingerprint = self.fingerprint();
        f.debug_struct("GroupKey")
            .field("cipher_suite", &self.cipher_suite)
            .field("fingerprint", &&fingerprint[..16])
            .finish_non_exhaustive()
    }
}

/// Payload of a handshake request or reply.
///
/// A request carries only the initiator's group. A reply from a responder
/// that accepted the merge also carries the new group key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeData {
    pub known_agents: Vec<AgentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_key")]
    pub new_group_key: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_group_key_cipher_suite: Option<String>,
}

impl HandshakeData {
    pub fn request(known_agents: Vec<AgentInfo>) -> Self {
        Self {
            known_agents,
            ..Self::default()
        }
    }

    pub fn reply(known_agents: Vec<AgentInfo>, key: &GroupKey) -> Self {
        Self {
            known_agents,
            new_group_key: Some(key.key.clone()),
            new_group_key_cipher_suite: Some(key.cipher_suite.clone()),
        }
    }

    /// The group key, if both the key and its cipher suite are present.
    pub fn group_key(&self) -> Option<GroupKey> {
        match (&self.new_group_key, &self.new_group_key_cipher_suite) {
            (Some(key), Some(suite)) => Some(GroupKey::new(key.clone(), suite.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Key bytes travel as a hex string.
mod hex_key {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match key {
            Some(bytes) => s.serialize_some(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|encoded| hex::decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}
