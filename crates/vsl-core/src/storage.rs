//! Storage collaborator and the in-memory store.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::{content_hash, Address, AgentId, StructuralNode, StructuralUpdate, TreeNode};

/// The tree storage engine as seen by locking and sync.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write a batch of values. The batch is applied as a unit.
    async fn apply_batch(&self, writes: BTreeMap<Address, String>) -> Result<()>;

    /// Read the node at `address` with all of its descendants.
    async fn get_subtree(&self, address: &Address) -> Result<TreeNode>;

    /// Current structural hash of `agent`'s subtree (empty if unknown).
    async fn current_hash(&self, agent: &str) -> Result<String>;

    /// Apply a remote agent's structural delta and record its `hash_to`.
    async fn apply_structural_update(&self, update: &StructuralUpdate) -> Result<()>;

    /// Full snapshot of `agent`'s subtree at its current hash.
    async fn snapshot(&self, agent: &str) -> Result<StructuralUpdate>;
}

#[derive(Debug, Clone)]
struct VersionedValue {
    value: String,
    version: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    values: BTreeMap<Address, VersionedValue>,
    structure: BTreeMap<Address, StructuralNode>,
    /// Last applied `hash_to` per remote agent.
    remote_hashes: HashMap<AgentId, String>,
}

impl StoreState {
    fn structure_under(&self, prefix: &Address) -> BTreeMap<Address, StructuralNode> {
        self.structure
            .iter()
            .filter(|(addr, _)| prefix.contains(addr))
            .map(|(addr, node)| (addr.clone(), node.clone()))
            .collect()
    }

    fn structure_hash(&self, agent: &str) -> Result<String> {
        let nodes = self.structure_under(&Address::new(agent));
        let bytes = serde_json::to_vec(&nodes)?;
        Ok(content_hash(&bytes))
    }

    fn remove_subtree(&mut self, address: &Address) {
        self.structure.retain(|addr, _| !address.contains(addr));
        self.values.retain(|addr, _| !address.contains(addr));
    }
}

/// In-memory [`Storage`] for one agent.
///
/// The local agent's structural hash is computed from its descriptors; hashes
/// of remote agents are whatever the last applied update declared.
#[derive(Debug)]
pub struct MemoryStore {
    local_agent: AgentId,
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new(local_agent: impl Into<AgentId>) -> Self {
        Self {
            local_agent: local_agent.into(),
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn local_agent(&self) -> &str {
        &self.local_agent
    }

    /// Commit a structural change to the local agent's subtree.
    ///
    /// Returns the hash-chained update describing the change, ready to be
    /// published to the rest of the group.
    pub async fn modify_structure(
        &self,
        added: BTreeMap<Address, StructuralNode>,
        removed: BTreeSet<Address>,
    ) -> Result<StructuralUpdate> {
        ensure_within(&Address::new(&self.local_agent), added.keys().chain(removed.iter()))?;

        let mut state = self.state.write().await;
        let hash_from = state.structure_hash(&self.local_agent)?;
        for addr in &removed {
            state.remove_subtree(addr);
        }
        for (addr, node) in &added {
            state.structure.insert(addr.clone(), node.clone());
        }
        let hash_to = state.structure_hash(&self.local_agent)?;

        debug!(agent = %self.local_agent, added = added.len(), removed = removed.len(), "Local structure changed");

        Ok(StructuralUpdate {
            hash_from,
            hash_to,
            origin_agent: self.local_agent.clone(),
            added_or_changed_nodes: added,
            removed_nodes: removed,
        })
    }

    /// Structural descriptor stored at `address`, if any.
    pub async fn structural_node(&self, address: &Address) -> Option<StructuralNode> {
        self.state.read().await.structure.get(address).cloned()
    }

    /// Number of stored values.
    pub async fn value_count(&self) -> usize {
        self.state.read().await.values.len()
    }
}

/// Every address must lie at or below `prefix`.
fn ensure_within<'a>(prefix: &Address, mut addresses: impl Iterator<Item = &'a Address>) -> Result<()> {
    match addresses.find(|a| !prefix.contains(a)) {
        Some(addr) => Err(Error::InvalidInput(format!(
            "{} is outside subtree {}",
            addr, prefix
        ))),
        None => Ok(()),
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn apply_batch(&self, writes: BTreeMap<Address, String>) -> Result<()> {
        let mut state = self.state.write().await;
        for (addr, value) in writes {
            trace!(address = %addr, "Writing value");
            let entry = state
                .values
                .entry(addr)
                .or_insert_with(|| VersionedValue {
                    value: String::new(),
                    version: 0,
                });
            entry.value = value;
            entry.version += 1;
        }
        Ok(())
    }

    async fn get_subtree(&self, address: &Address) -> Result<TreeNode> {
        let state = self.state.read().await;
        let mut root = TreeNode::new(address.clone());
        let mut found = false;

        let structural = state.structure.keys().filter(|a| address.contains(a));
        for addr in structural {
            found = true;
            let mut node = &mut root;
            for segment in address.relative_segments(addr).unwrap_or_default() {
                node = node.child_mut_or_insert(segment);
            }
        }

        for (addr, stored) in state.values.iter().filter(|(a, _)| address.contains(a)) {
            found = true;
            let mut node = &mut root;
            for segment in address.relative_segments(addr).unwrap_or_default() {
                node = node.child_mut_or_insert(segment);
            }
            node.value = Some(stored.value.clone());
            node.version = stored.version;
        }

        if found {
            Ok(root)
        } else {
            Err(Error::NotFound(address.to_string()))
        }
    }

    async fn current_hash(&self, agent: &str) -> Result<String> {
        let state = self.state.read().await;
        if agent == self.local_agent {
            state.structure_hash(agent)
        } else {
            Ok(state.remote_hashes.get(agent).cloned().unwrap_or_default())
        }
    }

    async fn apply_structural_update(&self, update: &StructuralUpdate) -> Result<()> {
        if update.origin_agent == self.local_agent {
            return Err(Error::InvalidInput(format!(
                "refusing to apply own update {}",
                update
            )));
        }

        let prefix = Address::new(&update.origin_agent);
        ensure_within(
            &prefix,
            update
                .added_or_changed_nodes
                .keys()
                .chain(update.removed_nodes.iter()),
        )?;

        let mut state = self.state.write().await;
        if update.is_snapshot() {
            state.structure.retain(|addr, _| !prefix.contains(addr));
        }
        for addr in &update.removed_nodes {
            state.remove_subtree(addr);
        }
        for (addr, node) in &update.added_or_changed_nodes {
            state.structure.insert(addr.clone(), node.clone());
        }
        state
            .remote_hashes
            .insert(update.origin_agent.clone(), update.hash_to.clone());

        debug!(update = %update, "Applied structural update");
        Ok(())
    }

    async fn snapshot(&self, agent: &str) -> Result<StructuralUpdate> {
        let state = self.state.read().await;
        let hash_to = if agent == self.local_agent {
            state.structure_hash(agent)?
        } else {
            state.remote_hashes.get(agent).cloned().unwrap_or_default()
        };
        let nodes = state.structure_under(&Address::new(agent));
        Ok(StructuralUpdate::snapshot(agent, hash_to, nodes))
    }
}
