//! VSL Core - the shared vocabulary of the knowledge store.
//!
//! Every agent holds a replica of part of a global tree. Nodes in that tree are
//! named by slash-separated [`Address`]es whose first segment is the agent that
//! owns the subtree (`/agent1/sensors/temp`).
//!
//! # Contents
//!
//! - **Addresses**: normalised hierarchical paths with ancestor/descendant algebra
//! - **Tree nodes**: versioned value nodes returned by reads ([`TreeNode`])
//! - **Structure**: access-control and type descriptors ([`StructuralNode`])
//! - **Updates**: hash-chained structural deltas ([`StructuralUpdate`])
//! - **Storage**: the collaborator trait consumed by locking and sync, with an
//!   in-memory implementation ([`MemoryStore`])
//! - **Tasks**: cancellable interval loops used by every sweeper ([`BackgroundTask`])
//!
//! # Hashing
//!
//! Structural hashes are BLAKE3 digests, hex encoded. An empty hash string
//! means "no predecessor" and marks a full snapshot.

mod address;
mod error;
mod node;
mod storage;
mod task;
mod update;

pub use address::Address;
pub use error::{Error, ErrorKind, Result};
pub use node::{CacheParameters, StructuralNode, TreeNode};
pub use storage::{MemoryStore, Storage};
pub use task::{BackgroundTask, MIN_PERIOD};
pub use update::StructuralUpdate;

/// Identity of an agent (its name in the registry).
pub type AgentId = String;

/// The access id that satisfies every permission check.
pub const WILDCARD_ACCESS_ID: &str = "*";

/// Hash bytes with BLAKE3 and hex encode the digest.
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_deterministic() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
    }

    #[test]
    fn content_hash_different_inputs() {
        assert_ne!(content_hash(b"hello"), content_hash(b"world"));
    }

    #[test]
    fn content_hash_is_hex() {
        let hash = content_hash(b"tree");
        assert_eq!(hash.len(), 64);
        assert!(hex::decode(&hash).is_ok());
    }
}
