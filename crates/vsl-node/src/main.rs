//! VSL node binary
//!
//! Runs a single agent configured from `VSL_*` environment variables until
//! interrupted.

use vsl_node::{LocalNetwork, NodeConfig, VslNode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    vsl_node::init_tracing();

    let config = NodeConfig::from_env()?;
    tracing::info!(
        agent = %config.agent_id,
        lock_validity = ?config.lock.validity,
        sync_interval = ?config.sync.sync_interval,
        "Starting VSL node"
    );

    let node = VslNode::new(config, LocalNetwork::new()).await?;
    node.start().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");
    node.shutdown().await;

    Ok(())
}
