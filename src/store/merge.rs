//! Merge Engine — applies an incoming graph fragment to the store.
//!
//! A merge runs in two phases. Planning walks the envelope and produces a
//! flat list of `(location, node)` writes without touching the store; any
//! structural problem fails here and nothing is applied. Applying then
//! writes each node at its canonical location under the caller's lock.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::DEFAULT_MAX_REFERENCE_HOPS;
use crate::model::node::now_millis;
use crate::model::{Branch, Envelope, Node, Path, Timestamp};
use crate::projector::{self, ErrorProjector};
use crate::{Error, Result};

use super::{canonical_location, GraphStore};

/// Per-merge settings.
#[derive(Clone)]
pub struct MergeContext {
    /// Clock reading used for `$expires` normalisation and expiry checks.
    pub now: Timestamp,
    /// Applied to every Error node arriving in the fragment.
    pub projector: Option<Arc<dyn ErrorProjector>>,
    pub max_hops: usize,
}

impl Default for MergeContext {
    fn default() -> Self {
        Self { now: now_millis(), projector: None, max_hops: DEFAULT_MAX_REFERENCE_HOPS }
    }
}

impl std::fmt::Debug for MergeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeContext")
            .field("now", &self.now)
            .field("projector", &self.projector.is_some())
            .field("max_hops", &self.max_hops)
            .finish()
    }
}

/// Merge `envelope` into `store`, returning the locations written.
///
/// With paths, only nodes along those paths are taken from the fragment
/// (following references inside the fragment), and paths the fragment does
/// not answer are recorded as Void. Without paths, every leaf of the
/// fragment is merged.
pub fn merge(store: &mut GraphStore, envelope: &Envelope, cx: &MergeContext) -> Result<Vec<Path>> {
    let writes = plan(envelope, cx)?;
    let planned = writes.len();
    let touched = apply(store, writes, cx);
    tracing::debug!(planned, written = touched.len(), "merged envelope");
    Ok(touched)
}

// ============================================================================
// Planning
// ============================================================================

type Write = (Path, Node);

fn plan(envelope: &Envelope, cx: &MergeContext) -> Result<Vec<Write>> {
    let mut writes = Vec::new();

    if envelope.paths.is_empty() {
        collect_leaves(&envelope.graph, Path::root(), &mut writes);
    } else {
        if let Some(empty) = envelope.paths.iter().find(|p| p.is_empty()) {
            return Err(Error::MalformedEnvelope(format!("envelope lists an empty path set {empty}")));
        }
        for path in envelope.concrete_paths() {
            trace(&envelope.graph, &path, cx.max_hops, &mut writes);
        }
    }

    for (at, node) in &mut writes {
        node.normalize(cx.now);
        if let Node::Error(raw) = node {
            *raw = projector::apply(cx.projector.as_deref(), at, std::mem::take(raw));
        }
    }
    Ok(writes)
}

/// Every non-branch node under `branch`, at its full path.
fn collect_leaves(branch: &Branch, at: Path, writes: &mut Vec<Write>) {
    for (segment, node) in branch.iter() {
        let mut here = at.clone();
        here.push(crate::Key::from_segment(segment));
        match node {
            Node::Branch(child) => collect_leaves(child, here, writes),
            leaf => writes.push((here, leaf.clone())),
        }
    }
}

/// Follow one requested path through the fragment, recording what it
/// crosses. A path the fragment does not answer is recorded as Void unless
/// it was reached through a fragment reference. A reference cycle inside
/// the fragment stops the trace; the resolver reports it later.
fn trace(graph: &Branch, path: &Path, max_hops: usize, writes: &mut Vec<Write>) {
    let mut current = path.clone();
    let mut visited: HashSet<Path> = HashSet::from([path.clone()]);
    let mut hops = 0;

    'walk: loop {
        let mut branch = graph;
        for (i, key) in current.iter().enumerate() {
            let depth = i + 1;
            match branch.get(&key.segment()) {
                None => {
                    // A reference into territory the fragment does not cover
                    // stays missing so the next round can ask for it.
                    if hops == 0 {
                        writes.push((current.clone(), Node::Void));
                    }
                    return;
                }
                Some(Node::Branch(child)) => branch = child,
                Some(node @ Node::Ref { target, .. }) => {
                    writes.push((current.prefix(depth), node.clone()));
                    if depth == current.len() {
                        return;
                    }
                    let next = target.join(&current.keys()[depth..]);
                    hops += 1;
                    if hops > max_hops || !visited.insert(next.clone()) {
                        return;
                    }
                    current = next;
                    continue 'walk;
                }
                Some(leaf) => {
                    writes.push((current.prefix(depth), leaf.clone()));
                    return;
                }
            }
        }
        // The path ends on a branch: take the whole subtree.
        collect_leaves(branch, current, writes);
        return;
    }
}

// ============================================================================
// Applying
// ============================================================================

fn apply(store: &mut GraphStore, writes: Vec<Write>, cx: &MergeContext) -> Vec<Path> {
    let mut touched = Vec::with_capacity(writes.len());
    for (at, node) in writes {
        let location = canonical_location(store, &at, cx.now, cx.max_hops);
        if let Some(existing) = store.get_mut(&location) {
            if !existing.is_expired(cx.now) && existing.same_terminal(&node) {
                existing.set_expires(node.expires());
                continue;
            }
        }
        store.set(&location, node);
        touched.push(location);
    }
    touched
}
