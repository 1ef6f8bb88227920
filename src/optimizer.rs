//! Set Optimizer — turns `set` mutations into an outbound envelope.
//!
//! Each mutation path is expanded and rewritten through the references
//! already in the local cache, so the source receives writes at canonical
//! locations. Compound values written at several locations in one call are
//! sent once; the other locations carry a reference to the first.

use std::collections::HashMap;

use serde_json::Value;

use crate::model::{Boxed, Branch, Envelope, IntoPathSet, Node, Path, PathSet, PathValue, Timestamp};
use crate::store::{canonical_location, GraphStore};
use crate::{Error, Result};

/// A value to write at every path of a path set.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub path: PathSet,
    pub value: Value,
}

impl Mutation {
    pub fn new(path: impl IntoPathSet, value: impl Into<Value>) -> Result<Self> {
        Ok(Self { path: path.into_path_set()?, value: value.into() })
    }
}

impl From<PathValue> for Mutation {
    fn from(pv: PathValue) -> Self {
        Self { path: PathSet::from(pv.path), value: pv.value }
    }
}

/// One concrete write of a prepared set.
#[derive(Debug, Clone, PartialEq)]
pub struct SetWrite {
    /// The path the caller named.
    pub requested: Path,
    /// Where the write lands after following cached references.
    pub canonical: Path,
    pub value: Value,
    node: Node,
}

/// The outcome of [`prepare`].
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSet {
    /// What to send to the data source.
    pub envelope: Envelope,
    /// One write per canonical location; a later mutation replaces an
    /// earlier one at the same location.
    pub writes: Vec<SetWrite>,
    /// Every concrete path named by the mutations, deduplicated, in order.
    pub requested: Vec<Path>,
}

impl PreparedSet {
    /// The mutations that wrote `paths`, for re-sending them.
    pub fn mutations_for(&self, paths: &[Path]) -> Vec<Mutation> {
        self.writes
            .iter()
            .filter(|w| paths.contains(&w.requested))
            .map(|w| Mutation { path: PathSet::from(&w.requested), value: w.value.clone() })
            .collect()
    }
}

/// Build the outbound envelope for `mutations` against the current cache.
///
/// Only compound values (objects and arrays) are shared between locations:
/// a value deep-equal to one already written is sent as a reference to the
/// first location. Equal primitives are sent inline at every location,
/// since a reference to a scalar is larger than the scalar itself.
pub fn prepare(
    store: &GraphStore,
    mutations: &[Mutation],
    now: Timestamp,
    max_hops: usize,
) -> Result<PreparedSet> {
    let mut writes: Vec<SetWrite> = Vec::new();
    let mut slots: HashMap<Path, usize> = HashMap::new();
    let mut requested: Vec<Path> = Vec::new();

    for mutation in mutations {
        let mut node = Node::from_mutation(mutation.value.clone())?;
        node.normalize(now);

        for path in mutation.path.expand() {
            if path.is_empty() {
                return Err(Error::InvalidPathSet {
                    position: None,
                    message: "cannot set the graph root".into(),
                });
            }
            if !requested.contains(&path) {
                requested.push(path.clone());
            }
            let canonical = canonical_location(store, &path, now, max_hops);
            let write = SetWrite {
                requested: path,
                canonical: canonical.clone(),
                value: mutation.value.clone(),
                node: node.clone(),
            };
            match slots.get(&canonical) {
                Some(&i) => writes[i] = write,
                None => {
                    slots.insert(canonical, writes.len());
                    writes.push(write);
                }
            }
        }
    }

    let mut graph = Branch::new();
    let mut shared: Vec<(&Boxed, &Path)> = Vec::new();
    let mut deduplicated = 0;
    for write in &writes {
        let outbound = match &write.node {
            Node::Atom(boxed) if is_compound(&boxed.value) => {
                match shared.iter().find(|(value, _)| *value == boxed) {
                    Some((_, first)) => {
                        deduplicated += 1;
                        Node::reference((*first).clone())
                    }
                    None => {
                        shared.push((boxed, &write.canonical));
                        write.node.clone()
                    }
                }
            }
            other => other.clone(),
        };
        graph.set_path(write.canonical.keys(), outbound);
    }

    let paths: Vec<PathSet> = writes.iter().map(|w| PathSet::from(&w.canonical)).collect();
    tracing::debug!(writes = writes.len(), deduplicated, "prepared set");
    Ok(PreparedSet { envelope: Envelope::new(graph, paths), writes, requested })
}

fn is_compound(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// Write every value of `prepared` into `store` ahead of the source's answer.
pub fn apply_optimistic(store: &mut GraphStore, prepared: &PreparedSet) -> Vec<Path> {
    prepared
        .writes
        .iter()
        .map(|w| {
            store.set(&w.canonical, w.node.clone());
            w.canonical.clone()
        })
        .collect()
}
