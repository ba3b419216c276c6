//! Tree nodes and structural descriptors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Address;

/// A versioned node returned by reads, with its loaded descendants.
///
/// `version` counts the writes applied to this node. Children are keyed by
/// their last address segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub address: Address,
    pub value: Option<String>,
    pub version: u64,
    pub children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    /// Create an empty node (no value, version 0).
    pub fn new(address: Address) -> Self {
        Self {
            address,
            value: None,
            version: 0,
            children: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<String>, version: u64) -> Self {
        self.value = Some(value.into());
        self.version = version;
        self
    }

    pub fn child(&self, name: &str) -> Option<&TreeNode> {
        self.children.get(name)
    }

    /// Get the child for `name`, creating an empty one if absent.
    pub fn child_mut_or_insert(&mut self, name: &str) -> &mut TreeNode {
        let address = self.address.join(name);
        self.children
            .entry(name.to_string())
            .or_insert_with(|| TreeNode::new(address))
    }

    /// Find a node at or below this one.
    pub fn find(&self, address: &Address) -> Option<&TreeNode> {
        let segments = self.address.relative_segments(address)?;
        let mut node = self;
        for segment in segments {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    /// Number of nodes in this subtree, including this one.
    pub fn len(&self) -> usize {
        1 + self.children.values().map(TreeNode::len).sum::<usize>()
    }

    /// True if the node has neither a value nor children.
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }
}

/// Cache parameters attached to a structural node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheParameters {
    /// How long a cached value stays fresh.
    pub ttl_ms: u64,
    /// Name of the caching strategy (e.g. "pull", "push").
    pub strategy: String,
}

/// Structural description of a node: who may read and write it, what type it
/// has and which children it declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralNode {
    /// Access ids allowed to read the node.
    #[serde(default)]
    pub readers: Vec<String>,
    /// Access ids allowed to write the node.
    #[serde(default)]
    pub writers: Vec<String>,
    /// Value restriction expression, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restriction: Option<String>,
    /// Type names, most specific first.
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheParameters>,
    /// Addresses of declared children.
    #[serde(default)]
    pub children: Vec<Address>,
}

impl StructuralNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_readers<I, S>(mut self, readers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.readers = readers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_writers<I, S>(mut self, writers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writers = writers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_restriction(mut self, restriction: impl Into<String>) -> Self {
        self.restriction = Some(restriction.into());
        self
    }

    pub fn with_cache(mut self, cache: CacheParameters) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = Address>,
    {
        self.children = children.into_iter().collect();
        self
    }
}
