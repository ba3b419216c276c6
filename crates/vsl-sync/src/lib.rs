//! VSL Sync - keeping agent groups consistent.
//!
//! Agents that discover each other merge their groups through a leader to
//! leader handshake. Every merge distributes a fresh symmetric group key
//! and exchanges structural snapshots. After that, each agent publishes its
//! own structural changes as hash-chained [`StructuralUpdate`]s which other
//! members apply strictly in chain order.
//!
//! # Components
//!
//! - [`GroupSyncCoordinator`]: the handshake loop and the update handler
//! - [`UpdateReplayCache`]: updates waiting for their predecessor
//! - [`Transport`] and [`AgentRegistry`]: what the coordinator needs from
//!   the network and from membership tracking
//! - [`should_initiate`]: which side of a merge opens the handshake
//!
//! [`StructuralUpdate`]: vsl_core::StructuralUpdate

mod cache;
mod config;
mod coordinator;
mod error;
mod handshake;
mod policy;
mod transport;

pub use cache::UpdateReplayCache;
pub use config::{SyncConfig, DEFAULT_CIPHER_SUITE};
pub use coordinator::{GroupSyncCoordinator, HandshakeOutcome, SyncStats, UpdateOutcome};
pub use error::{Error, Result};
pub use handshake::{AgentInfo, GroupKey, HandshakeData};
pub use policy::should_initiate;
pub use transport::{AgentRegistry, GroupAnnouncement, Transport};
