//! VSL Node - a knowledge-store agent.
//!
//! Wires the storage, the subtree lock table and the group sync coordinator
//! of one agent together and runs their background loops.
//!
//! # Architecture
//!
//! - **Node**: [`VslNode`] owns one agent's components and their lifecycle
//! - **Config**: [`NodeConfig`] from `VSL_*` environment variables
//! - **Local network**: [`LocalNetwork`] runs several agents in one process,
//!   acting as their transport and membership registry
//! - **Logging**: [`init_tracing`] for binaries
//!
//! # Example
//!
//! ```no_run
//! use vsl_node::{LocalNetwork, NodeConfig, VslNode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let network = LocalNetwork::new();
//!     let node = VslNode::new(NodeConfig::new("agent1"), network).await?;
//!     node.start().await;
//!     tokio::signal::ctrl_c().await?;
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod local;
pub mod logging;
pub mod node;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use local::{LocalNetwork, LocalRegistry, LocalTransport};
pub use logging::{init_tracing, DEFAULT_LOG_FILTER};
pub use node::VslNode;
