//! Test support for multi-agent scenarios.
//!
//! A [`Cluster`] is a set of [`VslNode`]s sharing one [`LocalNetwork`].
//! Scenarios usually drive the sync protocol by hand with
//! [`Cluster::sync_round`] instead of starting the background loops, so
//! every step is deterministic.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use vsl_core::StructuralUpdate;
use vsl_node::{LocalNetwork, NodeConfig, VslNode};
use vsl_sync::{GroupKey, HandshakeData, Transport};

/// Install a test-friendly subscriber once. Respects `RUST_LOG`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Node config with short intervals suited to tests.
pub fn fast_config(agent: &str) -> NodeConfig {
    let mut config = NodeConfig::new(agent);
    config.sync = config
        .sync
        .with_sync_interval(Duration::from_millis(50))
        .with_cache_sweep_interval(Duration::from_millis(50))
        .with_handshake_timeout(Duration::from_secs(1));
    config.lock = config.lock.with_sweep_interval(Duration::from_millis(50));
    config.shutdown_grace = Duration::from_secs(1);
    config
}

/// Agents on one in-process network.
pub struct Cluster {
    pub network: LocalNetwork,
    nodes: BTreeMap<String, VslNode>,
}

impl Cluster {
    pub async fn new(agents: &[&str]) -> vsl_node::Result<Self> {
        Self::with_config(agents, fast_config).await
    }

    pub async fn with_config(agents: &[&str], config: impl Fn(&str) -> NodeConfig) -> vsl_node::Result<Self> {
        let network = LocalNetwork::new();
        let mut nodes = BTreeMap::new();
        for agent in agents {
            let node = VslNode::new(config(agent), network.clone()).await?;
            nodes.insert(agent.to_string(), node);
        }
        Ok(Self { network, nodes })
    }

    /// The node for `agent`. Panics on unknown ids, as a test helper.
    pub fn node(&self, agent: &str) -> &VslNode {
        match self.nodes.get(agent) {
            Some(node) => node,
            None => panic!("no agent {agent} in cluster"),
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &VslNode> {
        self.nodes.values()
    }

    /// One coordinator iteration on every agent, in id order.
    pub async fn sync_round(&self) {
        for node in self.nodes.values() {
            node.sync().run_once().await;
        }
    }

    /// Group key fingerprints of every agent, in id order.
    pub async fn fingerprints(&self) -> Vec<Option<String>> {
        let mut fingerprints = Vec::new();
        for node in self.nodes.values() {
            fingerprints.push(node.sync().group_key_fingerprint().await);
        }
        fingerprints
    }

    pub async fn start(&self) {
        for node in self.nodes.values() {
            node.start().await;
        }
    }

    pub async fn shutdown(self) {
        for node in self.nodes.values() {
            node.shutdown().await;
        }
    }
}

/// Wraps a transport so snapshot requests pause until released.
///
/// `entered` is notified when a request arrives; the request then waits
/// for `release`.
pub struct GatedTransport {
    inner: Arc<dyn Transport>,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl GatedTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self {
            inner,
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send_handshake(&self, target: &str, data: HandshakeData) -> vsl_sync::Result<Option<HandshakeData>> {
        self.inner.send_handshake(target, data).await
    }

    async fn request_full_update(&self, agent: &str) -> vsl_sync::Result<StructuralUpdate> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.request_full_update(agent).await
    }

    async fn send_update(&self, target: &str, update: &StructuralUpdate) -> vsl_sync::Result<()> {
        self.inner.send_update(target, update).await
    }

    async fn deliver_group_key(&self, target: &str, key: &GroupKey) -> vsl_sync::Result<()> {
        self.inner.deliver_group_key(target, key).await
    }
}
