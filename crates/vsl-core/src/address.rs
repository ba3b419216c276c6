//! Hierarchical addresses.

use serde::{Deserialize, Serialize};

/// A normalised, slash-separated address in the knowledge tree.
///
/// Normalisation strips empty segments, so `"a/b"`, `"/a/b/"` and `"//a//b"`
/// all name `/a/b`. The tree root is `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalise an address.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let segments: Vec<&str> = raw
            .as_ref()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        Self(format!("/{}", segments.join("/")))
    }

    /// The tree root.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Path segments, root first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Number of segments (the root has depth 0).
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// The owning agent, i.e. the first segment.
    pub fn agent(&self) -> Option<&str> {
        self.segments().next()
    }

    /// The last segment.
    pub fn name(&self) -> Option<&str> {
        self.segments().last()
    }

    pub fn parent(&self) -> Option<Address> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Strict ancestors, nearest first, ending with the root.
    pub fn ancestors(&self) -> impl Iterator<Item = Address> {
        std::iter::successors(self.parent(), Address::parent)
    }

    /// Append a single child segment.
    pub fn join(&self, segment: &str) -> Address {
        Self::new(format!("{}/{}", self.0, segment))
    }

    /// True if `other` lies strictly below this address.
    pub fn is_ancestor_of(&self, other: &Address) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// True if `other` is this address or lies below it.
    pub fn contains(&self, other: &Address) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// True if one of the two addresses contains the other.
    pub fn overlaps(&self, other: &Address) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Segments leading from this address down to `descendant`.
    ///
    /// Returns `None` if `descendant` is not contained by this address.
    pub fn relative_segments<'a>(&self, descendant: &'a Address) -> Option<Vec<&'a str>> {
        if !self.contains(descendant) {
            return None;
        }
        Some(descendant.segments().skip(self.depth()).collect())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalises_slashes() {
        assert_eq!(Address::new("a/b").as_str(), "/a/b");
        assert_eq!(Address::new("/a/b/").as_str(), "/a/b");
        assert_eq!(Address::new("//a//b").as_str(), "/a/b");
        assert_eq!(Address::new("").as_str(), "/");
        assert!(Address::new("/").is_root());
    }

    #[test]
    fn parent_chain() {
        let addr = Address::new("/a/b/c");
        assert_eq!(addr.parent(), Some(Address::new("/a/b")));
        assert_eq!(Address::new("/a").parent(), Some(Address::root()));
        assert_eq!(Address::root().parent(), None);

        let ancestors: Vec<_> = addr.ancestors().map(|a| a.to_string()).collect();
        assert_eq!(ancestors, vec!["/a/b", "/a", "/"]);
    }

    #[test]
    fn ancestor_requires_segment_boundary() {
        let a = Address::new("/a");
        assert!(a.is_ancestor_of(&Address::new("/a/b")));
        assert!(!a.is_ancestor_of(&Address::new("/ab")));
        assert!(!a.is_ancestor_of(&Address::new("/a")));
        assert!(a.contains(&Address::new("/a")));
        assert!(Address::root().is_ancestor_of(&a));
    }

    #[test]
    fn relative_segments_below() {
        let base = Address::new("/a");
        let leaf = Address::new("/a/b/c");
        assert_eq!(base.relative_segments(&leaf), Some(vec!["b", "c"]));
        assert_eq!(base.relative_segments(&base), Some(vec![]));
        assert_eq!(base.relative_segments(&Address::new("/x")), None);
    }

    #[test]
    fn agent_and_name() {
        let addr = Address::new("/agent1/sensors/temp");
        assert_eq!(addr.agent(), Some("agent1"));
        assert_eq!(addr.name(), Some("temp"));
        assert_eq!(Address::root().agent(), None);
    }

    #[test]
    fn serde_as_plain_string() {
        let addr = Address::new("x/y");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"/x/y\"");
        let back: Address = serde_json::from_str("\"x//y/\"").unwrap();
        assert_eq!(back, addr);
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-c]{1,2}"
    }

    proptest! {
        #[test]
        fn every_ancestor_contains_address(segs in prop::collection::vec(segment(), 0..6)) {
            let addr = Address::new(segs.join("/"));
            for ancestor in addr.ancestors() {
                prop_assert!(ancestor.is_ancestor_of(&addr));
                prop_assert!(!addr.is_ancestor_of(&ancestor));
            }
            prop_assert_eq!(addr.ancestors().count(), addr.depth());
        }

        #[test]
        fn overlap_is_symmetric(
            a in prop::collection::vec(segment(), 0..4),
            b in prop::collection::vec(segment(), 0..4),
        ) {
            let a = Address::new(a.join("/"));
            let b = Address::new(b.join("/"));
            prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
        }
    }
}
