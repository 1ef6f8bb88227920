//! In-memory data source.
//!
//! This is the reference implementation of `DataSource`. It answers from its
//! own `GraphStore`, protected by a RwLock, and shares nothing with the
//! models that call it.
//!
//! ## Hooks
//!
//! - `on_get` observes every outbound `get` before it is answered.
//! - `on_set` may rewrite the incoming envelope before it is applied; a
//!   hook that drops paths makes the caller see them as unanswered.
//!
//! Use this source for:
//! - Testing batching, merging, and set round trips without a transport
//! - Serving a fixed document to an embedded model

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::DataSource;
use crate::config::DEFAULT_MAX_REFERENCE_HOPS;
use crate::export::envelope_for;
use crate::model::node::now_millis;
use crate::model::{Envelope, PathSet};
use crate::store::{merge, GraphStore, MergeContext};
use crate::Result;

type GetHook = Box<dyn Fn(&[PathSet]) + Send + Sync>;
type SetHook = Box<dyn Fn(Envelope) -> Envelope + Send + Sync>;

// ============================================================================
// MemorySource
// ============================================================================

/// A data source backed by an in-memory graph.
pub struct MemorySource {
    store: RwLock<GraphStore>,
    get_calls: AtomicUsize,
    set_calls: AtomicUsize,
    /// Every `get` request, in arrival order.
    requests: Mutex<Vec<Vec<PathSet>>>,
    on_get: Option<GetHook>,
    on_set: Option<SetHook>,
}

impl MemorySource {
    pub fn new(store: GraphStore) -> Self {
        Self {
            store: RwLock::new(store),
            get_calls: AtomicUsize::new(0),
            set_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            on_get: None,
            on_set: None,
        }
    }

    /// A source serving `seed` (node-descriptor JSON).
    pub fn from_seed(seed: &Value) -> Result<Self> {
        Ok(Self::new(GraphStore::from_seed(seed)?))
    }

    pub fn on_get(mut self, hook: impl Fn(&[PathSet]) + Send + Sync + 'static) -> Self {
        self.on_get = Some(Box::new(hook));
        self
    }

    pub fn on_set(mut self, hook: impl Fn(Envelope) -> Envelope + Send + Sync + 'static) -> Self {
        self.on_set = Some(Box::new(hook));
        self
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// The path sets of every `get` received so far.
    pub fn requests(&self) -> Vec<Vec<PathSet>> {
        self.requests.lock().clone()
    }

    /// A copy of the source's current graph in seed format.
    pub fn snapshot(&self) -> Value {
        self.store.read().to_json()
    }
}

impl std::fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySource")
            .field("get_calls", &self.get_calls())
            .field("set_calls", &self.set_calls())
            .field("on_get", &self.on_get.is_some())
            .field("on_set", &self.on_set.is_some())
            .finish()
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn get(&self, paths: Vec<PathSet>) -> Result<Envelope> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.on_get {
            hook(&paths);
        }
        self.requests.lock().push(paths.clone());

        let store = self.store.read();
        Ok(envelope_for(&store, &paths, now_millis(), DEFAULT_MAX_REFERENCE_HOPS))
    }

    async fn set(&self, envelope: Envelope) -> Result<Envelope> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        let envelope = match &self.on_set {
            Some(hook) => hook(envelope),
            None => envelope,
        };

        let mut store = self.store.write();
        let cx = MergeContext::default();
        merge(&mut store, &envelope, &cx)?;
        Ok(envelope_for(&store, &envelope.paths, cx.now, cx.max_hops))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Branch, Node};
    use crate::path;
    use serde_json::json;
    use std::sync::Arc;

    fn source() -> MemorySource {
        MemorySource::from_seed(&json!({
            "genreList": { "0": { "0": { "$type": "ref", "value": ["videos", 1234] } } },
            "videos": { "1234": { "summary": "hello" } },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_answers_through_references() {
        let source = source();
        let env = source.get(vec![PathSet::parse("genreList[0][0].summary").unwrap()]).await.unwrap();
        assert_eq!(
            env.graph.get_path(path!["videos", 1234, "summary"].keys()),
            Some(&Node::atom("hello"))
        );
        assert_eq!(source.get_calls(), 1);
        assert_eq!(source.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_set_writes_through_source_references() {
        let source = source();
        let mut graph = Branch::new();
        graph.set_path(path!["genreList", 0, 0, "summary"].keys(), Node::atom("new"));
        let env = Envelope::new(graph, vec![PathSet::parse("genreList[0][0].summary").unwrap()]);

        let out = source.set(env).await.unwrap();
        assert_eq!(
            out.graph.get_path(path!["videos", 1234, "summary"].keys()),
            Some(&Node::atom("new"))
        );
        assert_eq!(source.snapshot()["videos"]["1234"]["summary"], json!("new"));
    }

    #[tokio::test]
    async fn test_hooks_run() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let source = source()
            .on_get(move |paths| {
                counter.fetch_add(paths.len(), Ordering::SeqCst);
            })
            .on_set(|mut env| {
                env.paths.clear();
                env
            });
        source
            .get(vec![PathSet::parse("a").unwrap(), PathSet::parse("b").unwrap()])
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        let out = source.set(Envelope::default()).await.unwrap();
        assert!(out.paths.is_empty());
        assert_eq!(source.set_calls(), 1);
    }
}
