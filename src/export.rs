//! Output projections — pure transforms of resolved data.
//!
//! ```text
//! Response ──► to_json()          nested JSON view
//!          ──► to_path_values()   flat [{path, value}]
//! GraphStore ──► envelope_for()   {jsonGraph, paths} with the references walked
//! ```

use serde_json::{Map, Value};

use crate::execution::Response;
use crate::model::{Branch, Envelope, Path, PathSet, PathValue, Timestamp};
use crate::store::{walk, GraphStore, Lookup};

/// The `{jsonGraph, paths}` envelope answering `paths` from `store`.
///
/// Every reference crossed on the way is included so the receiver can
/// repeat the walk. A path ending on a branch carries the whole subtree;
/// paths the store cannot answer are left out of the graph.
pub fn envelope_for(store: &GraphStore, paths: &[PathSet], now: Timestamp, max_hops: usize) -> Envelope {
    let mut graph = Branch::new();
    for set in paths {
        for path in set.expand() {
            let walk = walk(store, &path, now, max_hops);
            for (at, _) in &walk.refs {
                copy(store, at, &mut graph);
            }
            if matches!(walk.lookup, Lookup::Found(_)) {
                copy(store, &walk.stop, &mut graph);
            }
        }
    }
    Envelope::new(graph, paths.to_vec())
}

fn copy(store: &GraphStore, at: &Path, graph: &mut Branch) {
    if at.is_empty() {
        return;
    }
    if let Some(node) = store.get(at) {
        graph.set_path(at.keys(), node.clone());
    }
}

// ============================================================================
// Response projections
// ============================================================================

impl Response {
    /// Nested JSON: `{"genreList": {"0": {"0": {"summary": ...}}}}`.
    ///
    /// Void paths are omitted unless values are boxed.
    pub fn to_json(&self) -> Value {
        let mut root = Map::new();
        for (path, terminal) in self.entries() {
            if terminal.is_void() && !self.boxed() {
                continue;
            }
            insert(&mut root, path, terminal.to_json(self.boxed()));
        }
        Value::Object(root)
    }

    /// One `{path, value}` per non-void entry, in request order.
    pub fn to_path_values(&self) -> Vec<PathValue> {
        self.entries()
            .iter()
            .filter(|(_, t)| !t.is_void() || self.boxed())
            .map(|(path, t)| PathValue::new(path.clone(), t.to_json(self.boxed())))
            .collect()
    }

    /// Per-path errors as `{path, value}` pairs, reference cycles included.
    pub fn errors(&self) -> Vec<PathValue> {
        self.entries()
            .iter()
            .filter(|(_, t)| t.is_error())
            .map(|(path, t)| PathValue::new(path.clone(), t.to_json(self.boxed())))
            .collect()
    }
}

fn insert(root: &mut Map<String, Value>, path: &Path, value: Value) {
    let Some((last, parents)) = path.keys().split_last() else {
        return;
    };
    let mut node = root;
    for key in parents {
        let slot = node.entry(key.segment().into_owned()).or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else { return };
        node = next;
    }
    node.insert(last.segment().into_owned(), value);
}
