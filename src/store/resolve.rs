//! Resolver — walks the store for concrete paths, following references.
//!
//! Each path is walked on its own. A reference replaces the walked prefix
//! with its target and the walk restarts from the root; revisiting a path
//! already seen in the same walk is a `CircularReference` for that path
//! only. Expired nodes read as missing.

use std::collections::HashSet;

use serde_json::Value;

use crate::model::{Boxed, Branch, Node, Path, Terminal, Timestamp};
use crate::Error;

use super::GraphStore;

/// The outcome of walking one path.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Terminal),
    /// Absent or expired. `stale` holds the expired terminal, if any.
    Missing { stale: Option<Terminal> },
    Circular,
}

/// Everything a single walk learned.
#[derive(Debug, Clone)]
pub struct Walk {
    pub lookup: Lookup,
    /// The requested path after every reference substitution.
    pub location: Path,
    /// The prefix of `location` where the walk stopped.
    pub stop: Path,
    /// References crossed on the way, as `(location, target)`.
    pub refs: Vec<(Path, Path)>,
    /// Set when the walk stopped on an expired node.
    pub expired: Option<Path>,
}

enum Step {
    Follow { at: Path, target: Path },
    Stop { lookup: Lookup, depth: usize, expired: bool },
}

fn step(root: &Branch, path: &Path, now: Timestamp) -> Step {
    let mut branch = root;
    for (i, key) in path.iter().enumerate() {
        let depth = i + 1;
        let last = depth == path.len();

        let Some(node) = branch.get(&key.segment()) else {
            return Step::Stop { lookup: Lookup::Missing { stale: None }, depth, expired: false };
        };

        if node.is_expired(now) {
            let stale = match node {
                Node::Atom(b) if last => Some(Terminal::Atom(b.clone())),
                Node::Error(b) => Some(Terminal::Error(b.clone())),
                _ => None,
            };
            return Step::Stop { lookup: Lookup::Missing { stale }, depth, expired: true };
        }

        let lookup = match node {
            Node::Branch(b) => {
                branch = b;
                continue;
            }
            Node::Ref { target, .. } => {
                return Step::Follow { at: path.prefix(depth), target: target.clone() };
            }
            Node::Atom(b) if last => Lookup::Found(Terminal::Atom(b.clone())),
            // An error anywhere on the way is the answer for the whole path.
            Node::Error(b) => Lookup::Found(Terminal::Error(b.clone())),
            Node::Atom(_) | Node::Void => Lookup::Found(Terminal::Void),
        };
        return Step::Stop { lookup, depth, expired: false };
    }

    // Ran out of keys on a branch (or at the root).
    Step::Stop { lookup: Lookup::Found(Terminal::Void), depth: path.len(), expired: false }
}

/// Walk one path through the store.
pub fn walk(store: &GraphStore, path: &Path, now: Timestamp, max_hops: usize) -> Walk {
    let mut current = path.clone();
    let mut visited: HashSet<Path> = HashSet::from([path.clone()]);
    let mut refs = Vec::new();

    loop {
        match step(store.root(), &current, now) {
            Step::Follow { at, target } => {
                let next = target.join(&current.keys()[at.len()..]);
                refs.push((at, target));
                if refs.len() > max_hops || !visited.insert(next.clone()) {
                    return Walk {
                        lookup: Lookup::Circular,
                        stop: current.clone(),
                        location: current,
                        refs,
                        expired: None,
                    };
                }
                current = next;
            }
            Step::Stop { lookup, depth, expired } => {
                let stop = current.prefix(depth);
                let expired = expired.then(|| stop.clone());
                return Walk { lookup, location: current, stop, refs, expired };
            }
        }
    }
}

/// The result of resolving a batch of paths.
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    /// Requested path → terminal, in request order. A path caught in a
    /// reference cycle resolves to an Error terminal.
    pub resolved: Vec<(Path, Terminal)>,
    /// Requested paths (verbatim, not their reference chains) that need a fetch.
    pub missing: Vec<Path>,
    /// Expired terminals found for missing paths; usable as a progressive seed.
    pub stale: Vec<(Path, Terminal)>,
    /// Per-path failures that did not stop the batch, with their cause.
    pub failed: Vec<(Path, Error)>,
    /// Physical locations of expired nodes, for lazy eviction.
    pub expired: Vec<Path>,
    /// Where each missing walk ended, as `(location, stop)`. Unchanged
    /// between two rounds means the last fetch taught the cache nothing.
    pub frontier: Vec<(Path, Path)>,
}

/// Resolve every path independently.
pub fn resolve(store: &GraphStore, paths: &[Path], now: Timestamp, max_hops: usize) -> Resolved {
    let mut out = Resolved::default();
    for path in paths {
        let walk = walk(store, path, now, max_hops);
        if let Some(at) = walk.expired {
            out.expired.push(at);
        }
        match walk.lookup {
            Lookup::Found(terminal) => out.resolved.push((path.clone(), terminal)),
            Lookup::Missing { stale } => {
                if let Some(terminal) = stale {
                    out.stale.push((path.clone(), terminal));
                }
                out.missing.push(path.clone());
                out.frontier.push((walk.location, walk.stop));
            }
            Lookup::Circular => {
                tracing::debug!(path = %path, "circular reference");
                let err = Error::CircularReference { path: path.clone() };
                let value = Value::from(err.to_string());
                out.resolved.push((path.clone(), Terminal::Error(Boxed::new(value))));
                out.failed.push((path.clone(), err));
            }
        }
    }
    out
}

/// Rewrite `path` through references found on its strict prefixes.
///
/// `genreList[0][0].summary` becomes `videos[1234].summary` when
/// `genreList[0][0]` is a live reference to `videos[1234]`. The last key is
/// never followed, so writing at the result overwrites what is there rather
/// than what it points to. A cycle leaves the path unchanged.
pub fn canonical_location(store: &GraphStore, path: &Path, now: Timestamp, max_hops: usize) -> Path {
    let mut current = path.clone();
    let mut visited: HashSet<Path> = HashSet::from([path.clone()]);

    for _ in 0..=max_hops {
        let Some((depth, target)) = reference_on_prefix(store.root(), &current, now) else {
            return current;
        };
        let next = target.join(&current.keys()[depth..]);
        if !visited.insert(next.clone()) {
            return path.clone();
        }
        current = next;
    }
    path.clone()
}

fn reference_on_prefix(root: &Branch, path: &Path, now: Timestamp) -> Option<(usize, Path)> {
    let parents = &path.keys()[..path.len().saturating_sub(1)];
    let mut branch = root;
    for (i, key) in parents.iter().enumerate() {
        match branch.get(&key.segment())? {
            Node::Branch(b) => branch = b,
            node @ Node::Ref { target, .. } if !node.is_expired(now) => {
                return Some((i + 1, target.clone()));
            }
            _ => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use serde_json::json;

    const NOW: Timestamp = 1_000_000;

    fn store(seed: serde_json::Value) -> GraphStore {
        GraphStore::from_seed(&seed).unwrap()
    }

    #[test]
    fn test_follows_reference_chain() {
        let s = store(json!({
            "genreList": { "0": { "0": { "$type": "ref", "value": ["lists", "a", 0] } } },
            "lists": { "a": { "0": { "$type": "ref", "value": ["videos", 1234] } } },
            "videos": { "1234": { "summary": "hello" } },
        }));
        let w = walk(&s, &path!["genreList", 0, 0, "summary"], NOW, 64);
        assert_eq!(w.lookup, Lookup::Found(Terminal::Atom(Boxed::new(json!("hello")))));
        assert_eq!(w.location, path!["videos", 1234, "summary"]);
        assert_eq!(w.refs.len(), 2);
    }

    #[test]
    fn test_reference_cycle_fails_only_that_path() {
        let s = store(json!({
            "a": { "$type": "ref", "value": ["b"] },
            "b": { "$type": "ref", "value": ["a"] },
            "c": 3,
        }));
        let out = resolve(&s, &[path!["a"], path!["c"]], NOW, 64);
        assert_eq!(out.failed.len(), 1);
        assert!(matches!(&out.failed[0], (p, Error::CircularReference { .. }) if *p == path!["a"]));
        assert_eq!(
            out.resolved,
            vec![
                (path!["a"], Terminal::Error(Boxed::new(json!("Circular reference while resolving a")))),
                (path!["c"], Terminal::Atom(Boxed::new(json!(3)))),
            ]
        );
    }

    #[test]
    fn test_growing_self_reference_is_bounded() {
        let s = store(json!({ "a": { "$type": "ref", "value": ["a", "x"] } }));
        let w = walk(&s, &path!["a"], NOW, 16);
        assert_eq!(w.lookup, Lookup::Circular);
        assert!(w.refs.len() <= 17);
    }

    #[test]
    fn test_missing_paths_are_reported_verbatim() {
        let s = store(json!({ "genreList": { "0": { "0": { "$type": "ref", "value": ["videos", 1] } } } }));
        let requested = path!["genreList", 0, 0, "summary"];
        let out = resolve(&s, &[requested.clone()], NOW, 64);
        assert_eq!(out.missing, vec![requested]);
    }

    #[test]
    fn test_expired_nodes_read_as_missing_with_stale_seed() {
        let s = store(json!({
            "fresh": { "$type": "atom", "value": 1, "$expires": NOW + 10 },
            "old": { "$type": "atom", "value": 2, "$expires": NOW - 10 },
            "olderr": { "$type": "error", "value": "x", "$expires": NOW - 10 },
        }));
        let out = resolve(&s, &[path!["fresh"], path!["old"], path!["olderr"]], NOW, 64);
        assert_eq!(out.resolved.len(), 1);
        assert_eq!(out.missing, vec![path!["old"], path!["olderr"]]);
        assert_eq!(out.stale.len(), 2);
        assert_eq!(out.expired, vec![path!["old"], path!["olderr"]]);
    }

    #[test]
    fn test_errors_atoms_and_branches_as_terminals() {
        let s = store(json!({
            "err": { "$type": "error", "value": "boom" },
            "atom": 5,
            "branch": { "x": 1 },
            "gone": { "$type": "atom" },
        }));
        let out = resolve(
            &s,
            &[path!["err", "deeper"], path!["atom", "deeper"], path!["branch"], path!["gone"]],
            NOW,
            64,
        );
        let terms: Vec<&Terminal> = out.resolved.iter().map(|(_, t)| t).collect();
        assert!(terms[0].is_error());
        assert!(terms[1].is_void());
        assert!(terms[2].is_void());
        assert!(terms[3].is_void());
        assert!(out.missing.is_empty());
    }

    #[test]
    fn test_canonical_location_follows_prefix_references_only() {
        let s = store(json!({
            "genreList": { "0": {
                "0": { "$type": "ref", "value": ["videos", 1234] },
                "1": { "$type": "ref", "value": ["videos", 766] },
            } },
        }));
        assert_eq!(
            canonical_location(&s, &path!["genreList", 0, 0, "summary"], NOW, 64),
            path!["videos", 1234, "summary"]
        );
        // The reference itself is the last key: it is the write target.
        assert_eq!(
            canonical_location(&s, &path!["genreList", 0, 1], NOW, 64),
            path!["genreList", 0, 1]
        );
    }
}
