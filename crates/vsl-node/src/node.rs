//! VSL Node - one agent with all of its components.
//!
//! Architecture:
//! - One [`MemoryStore`] shared by the lock table and the sync coordinator
//! - [`LockTable`] plus its expiration sweeper for local service writes
//! - [`GroupSyncCoordinator`] loop plus the replay-cache sweeper for
//!   replication across agents

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use vsl_core::{Address, BackgroundTask, MemoryStore, Storage, StructuralNode, StructuralUpdate, TreeNode};
use vsl_locking::{LockExpirationSweeper, LockTable};
use vsl_sync::GroupSyncCoordinator;

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::local::LocalNetwork;

struct RunningTasks {
    lock_sweeper: LockExpirationSweeper,
    cache_sweeper: BackgroundTask,
    sync_loop: BackgroundTask,
}

/// A running agent.
pub struct VslNode {
    config: NodeConfig,
    storage: Arc<MemoryStore>,
    locks: Arc<LockTable>,
    sync: Arc<GroupSyncCoordinator>,
    network: LocalNetwork,
    tasks: Mutex<Option<RunningTasks>>,
}

impl VslNode {
    /// Create the agent's components and attach it to `network`.
    ///
    /// Background loops do not run until [`start`](Self::start).
    pub async fn new(config: NodeConfig, network: LocalNetwork) -> Result<Self> {
        let agent = config.agent_id.clone();
        let storage = Arc::new(MemoryStore::new(agent.clone()));
        let locks = Arc::new(LockTable::new(
            Arc::clone(&storage) as Arc<dyn Storage>,
            config.lock.clone(),
        ));
        let sync = Arc::new(GroupSyncCoordinator::new(
            agent.clone(),
            Arc::clone(&storage) as Arc<dyn Storage>,
            network.transport(agent.clone()),
            network.registry(agent),
            config.sync.clone(),
        ));
        network.attach(&sync).await?;

        Ok(Self {
            config,
            storage,
            locks,
            sync,
            network,
            tasks: Mutex::new(None),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<MemoryStore> {
        &self.storage
    }

    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    pub fn sync(&self) -> &Arc<GroupSyncCoordinator> {
        &self.sync
    }

    /// Start the lock sweeper, the replay-cache sweeper and the sync loop.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            warn!(agent = %self.agent_id(), "Node already started");
            return;
        }
        *tasks = Some(RunningTasks {
            lock_sweeper: LockExpirationSweeper::spawn(Arc::clone(&self.locks)),
            cache_sweeper: self
                .sync
                .replay_cache()
                .spawn_sweeper(self.config.sync.cache_sweep_interval),
            sync_loop: self.sync.spawn(),
        });
        info!(agent = %self.agent_id(), "Node started");
    }

    pub async fn is_running(&self) -> bool {
        self.tasks.lock().await.is_some()
    }

    /// Stop every background loop and leave the network.
    pub async fn shutdown(&self) {
        let grace = self.config.shutdown_grace;
        if let Some(tasks) = self.tasks.lock().await.take() {
            let stopped = [
                tasks.sync_loop.shutdown(grace).await,
                tasks.cache_sweeper.shutdown(grace).await,
                tasks.lock_sweeper.shutdown(grace).await,
            ];
            if stopped.contains(&false) {
                warn!(agent = %self.agent_id(), "Some background tasks were aborted");
            }
        }
        self.network.detach(self.agent_id()).await;

        let stats = self.sync.stats().await;
        match serde_json::to_string(&stats) {
            Ok(json) => info!(agent = %self.agent_id(), stats = %json, "Node stopped"),
            Err(_) => info!(agent = %self.agent_id(), ?stats, "Node stopped"),
        }
    }

    /// Read the subtree at `address` as `issuer` sees it.
    ///
    /// The issuer's own staged writes are overlaid on committed state, so
    /// a writer sees its changes before commit. Nothing stored reads as an
    /// empty node.
    pub async fn read(&self, address: &Address, issuer: &str) -> Result<TreeNode> {
        let stored = match self.storage.get_subtree(address).await {
            Ok(node) => node,
            Err(vsl_core::Error::NotFound(_)) => TreeNode::new(address.clone()),
            Err(e) => return Err(Error::Storage(e)),
        };
        Ok(self.locks.overlay_pending_writes(address, &stored, issuer).await)
    }

    /// Change this agent's structure and publish the change to the group.
    pub async fn commit_structure(
        &self,
        added: BTreeMap<Address, StructuralNode>,
        removed: BTreeSet<Address>,
    ) -> Result<StructuralUpdate> {
        let update = self.storage.modify_structure(added, removed).await?;
        let delivered = self.sync.publish_local_update(&update).await;
        info!(agent = %self.agent_id(), update = %update, delivered, "Structure committed");
        Ok(update)
    }
}

impl std::fmt::Debug for VslNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VslNode")
            .field("agent_id", &self.config.agent_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::assert_ok;
    use vsl_locking::{NoopCallback, Requester};

    async fn node(network: &LocalNetwork, agent: &str) -> VslNode {
        VslNode::new(NodeConfig::new(agent), network.clone()).await.unwrap()
    }

    #[tokio::test]
    async fn read_overlays_own_staged_writes() {
        let network = LocalNetwork::new();
        let node = node(&network, "k1").await;
        let path = Address::new("/k1/config");
        assert_ok!(
            node.locks()
                .acquire(&path, &Requester::new("svc1", ["*"]), &[], Arc::new(NoopCallback))
                .await
        );
        assert_ok!(node.locks().stage_write(&path.join("mode"), "fast").await);

        let own = node.read(&path, "svc1").await.unwrap();
        assert_eq!(own.child("mode").unwrap().value.as_deref(), Some("fast"));

        let other = node.read(&path, "svc2").await.unwrap();
        assert!(other.is_empty());

        assert_ok!(node.locks().commit(&path, "svc1").await);
        let committed = node.read(&path, "svc2").await.unwrap();
        assert_eq!(committed.child("mode").unwrap().value.as_deref(), Some("fast"));
    }

    #[tokio::test]
    async fn structure_changes_outside_own_subtree_fail() {
        let network = LocalNetwork::new();
        let node = node(&network, "k1").await;
        let added = BTreeMap::from([(Address::new("/k2/x"), StructuralNode::new())]);
        let err = node.commit_structure(added, BTreeSet::new()).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_shutdown() {
        let network = LocalNetwork::new();
        let node = node(&network, "k1").await;
        assert!(!node.is_running().await);

        node.start().await;
        node.start().await;
        assert!(node.is_running().await);
        tokio::time::sleep(Duration::from_secs(2)).await;

        node.shutdown().await;
        assert!(!node.is_running().await);
        assert!(network.agent_ids().await.is_empty());
    }

    #[tokio::test]
    async fn agent_ids_are_unique_per_network() {
        let network = LocalNetwork::new();
        let _first = node(&network, "k1").await;
        let err = VslNode::new(NodeConfig::new("k1"), network.clone()).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyAttached(_)));
    }
}
