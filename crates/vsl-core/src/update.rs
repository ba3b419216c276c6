//! Structural updates - the unit of cross-agent replication.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::{Address, AgentId, StructuralNode};

/// A delta to one agent's subtree, chained by content hash.
///
/// An update is only applicable to a replica whose current hash for
/// `origin_agent` equals `hash_from`. An empty `hash_from` marks a full
/// snapshot that needs no predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralUpdate {
    pub hash_from: String,
    pub hash_to: String,
    pub origin_agent: AgentId,
    #[serde(default)]
    pub added_or_changed_nodes: BTreeMap<Address, StructuralNode>,
    #[serde(default)]
    pub removed_nodes: BTreeSet<Address>,
}

impl StructuralUpdate {
    /// A full snapshot of `origin`'s subtree at `hash_to`.
    pub fn snapshot(
        origin: impl Into<AgentId>,
        hash_to: impl Into<String>,
        nodes: BTreeMap<Address, StructuralNode>,
    ) -> Self {
        Self {
            hash_from: String::new(),
            hash_to: hash_to.into(),
            origin_agent: origin.into(),
            added_or_changed_nodes: nodes,
            removed_nodes: BTreeSet::new(),
        }
    }

    /// An incremental delta from `hash_from` to `hash_to`.
    pub fn delta(
        origin: impl Into<AgentId>,
        hash_from: impl Into<String>,
        hash_to: impl Into<String>,
    ) -> Self {
        Self {
            hash_from: hash_from.into(),
            hash_to: hash_to.into(),
            origin_agent: origin.into(),
            added_or_changed_nodes: BTreeMap::new(),
            removed_nodes: BTreeSet::new(),
        }
    }

    pub fn with_node(mut self, address: Address, node: StructuralNode) -> Self {
        self.added_or_changed_nodes.insert(address, node);
        self
    }

    pub fn with_removed(mut self, address: Address) -> Self {
        self.removed_nodes.insert(address);
        self
    }

    /// True if this update needs no causal predecessor.
    pub fn is_snapshot(&self) -> bool {
        self.hash_from.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl std::fmt::Display for StructuralUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short = |h: &str| h.chars().take(8).collect::<String>();
        write!(
            f,
            "{}[{} -> {}]",
            self.origin_agent,
            if self.is_snapshot() { "snapshot".to_string() } else { short(&self.hash_from) },
            short(&self.hash_to)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_has_no_predecessor() {
        let update = StructuralUpdate::snapshot("k1", "h1", BTreeMap::new());
        assert!(update.is_snapshot());
        assert!(!StructuralUpdate::delta("k1", "h1", "h2").is_snapshot());
    }

    #[test]
    fn json_uses_nested_camel_case_objects() {
        let update = StructuralUpdate::delta("k1", "h1", "h2")
            .with_node(
                Address::new("/k1/temp"),
                StructuralNode::new().with_types(["/basic/number"]),
            )
            .with_removed(Address::new("/k1/old"));

        let json: serde_json::Value = serde_json::from_str(&update.to_json().unwrap()).unwrap();
        assert_eq!(json["hashFrom"], "h1");
        assert_eq!(json["originAgent"], "k1");
        assert_eq!(json["addedOrChangedNodes"]["/k1/temp"]["types"][0], "/basic/number");
        assert_eq!(json["removedNodes"][0], "/k1/old");
    }

    #[test]
    fn from_json_tolerates_missing_collections() {
        let update =
            StructuralUpdate::from_json(r#"{"hashFrom":"","hashTo":"h9","originAgent":"k2"}"#)
                .unwrap();
        assert!(update.is_snapshot());
        assert!(update.added_or_changed_nodes.is_empty());
    }

    #[test]
    fn display_is_compact() {
        let update = StructuralUpdate::delta("k1", "abcdef0123456789", "0123456789abcdef");
        assert_eq!(update.to_string(), "k1[abcdef01 -> 01234567]");
    }
}
