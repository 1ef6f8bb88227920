//! # Graph Store
//!
//! The mutable cache: one root [`Branch`] addressed by path segments.
//! References are stored as target paths, never as pointers, so cycle
//! detection is a visited-path check and the whole store serialises as
//! plain JSON.
//!
//! Writes come from two places only: the merge engine and the optimistic
//! half of a `set`. Expired nodes are evicted lazily by whoever resolves
//! them; there is no background sweep.

pub mod resolve;
pub mod merge;

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::model::{Branch, Envelope, Node, Path};
use crate::Result;

pub use merge::{merge, MergeContext};
pub use resolve::{canonical_location, resolve, walk, Lookup, Resolved, Walk};

/// A store behind a lock. Each `Model` owns one unless it was explicitly
/// built over a shared handle.
pub type StoreHandle = Arc<RwLock<GraphStore>>;

/// The cache tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphStore {
    root: Branch,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a seed in node-descriptor form.
    pub fn from_seed(seed: &Value) -> Result<Self> {
        let mut store = Self::new();
        let envelope = Envelope::new(Branch::from_json(seed)?, Vec::new());
        merge(&mut store, &envelope, &MergeContext::default())?;
        Ok(store)
    }

    pub fn handle(self) -> StoreHandle {
        Arc::new(RwLock::new(self))
    }

    pub fn root(&self) -> &Branch {
        &self.root
    }

    /// The node stored at `path`. References are not followed.
    pub fn get(&self, path: &Path) -> Option<&Node> {
        self.root.get_path(path.keys())
    }

    pub(crate) fn get_mut(&mut self, path: &Path) -> Option<&mut Node> {
        self.root.get_path_mut(path.keys())
    }

    pub fn has(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    /// Write `node` at `path`, creating intermediate branches on demand.
    /// Writing a branch at the root replaces the whole tree.
    pub fn set(&mut self, path: &Path, node: Node) -> Option<Node> {
        if path.is_empty() {
            return match node {
                Node::Branch(b) => Some(Node::Branch(std::mem::replace(&mut self.root, b))),
                other => {
                    tracing::warn!(kind = other.kind(), "ignoring non-branch write at the graph root");
                    None
                }
            };
        }
        self.root.set_path(path.keys(), node)
    }

    pub fn delete(&mut self, path: &Path) -> Option<Node> {
        if path.is_empty() {
            return Some(Node::Branch(std::mem::take(&mut self.root)));
        }
        self.root.remove_path(path.keys())
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// The whole store in seed format.
    pub fn to_json(&self) -> Value {
        self.root.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use serde_json::json;

    #[test]
    fn test_get_set_has_delete() {
        let mut store = GraphStore::new();
        let p = path!["videos", 1234, "summary"];
        assert!(!store.has(&p));

        store.set(&p, Node::atom("hello"));
        assert!(store.has(&p));
        assert!(store.get(&path!["videos", 1234]).is_some_and(Node::is_branch));
        assert_eq!(store.get(&p), Some(&Node::atom("hello")));

        assert_eq!(store.delete(&p), Some(Node::atom("hello")));
        assert!(!store.has(&p));
        assert!(store.has(&path!["videos", 1234]));
    }

    #[test]
    fn test_get_does_not_follow_references() {
        let mut store = GraphStore::new();
        store.set(&path!["a"], Node::reference(path!["b"]));
        store.set(&path!["b", "x"], Node::atom(1));
        assert_eq!(store.get(&path!["a", "x"]), None);
    }

    #[test]
    fn test_seed_round_trips() {
        let seed = json!({
            "lolomo": { "summary": { "$type": "atom", "value": "hello" } },
            "genreList": { "0": { "0": { "$type": "ref", "value": ["videos", 1234] } } },
        });
        let store = GraphStore::from_seed(&seed).unwrap();
        assert_eq!(store.get(&path!["lolomo", "summary"]), Some(&Node::atom("hello")));
        assert_eq!(
            store.to_json(),
            json!({
                "lolomo": { "summary": "hello" },
                "genreList": { "0": { "0": { "$type": "ref", "value": ["videos", 1234] } } },
            })
        );
    }
}
