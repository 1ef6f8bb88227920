//! # jsongraph-cache — Virtual JSON Graph Cache
//!
//! Query one logical JSON document by path. Missing or expired fragments
//! are fetched from a pluggable [`DataSource`], merged into a local graph
//! cache, and resolved (following references) before being handed back.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `DataSource` is the contract between the cache and whatever backs it
//! 2. **Closed node type**: every cache location is an Atom, Ref, Error, Branch, or Void
//! 3. **Path syntax owns nothing**: text → `PathSet` is a pure function
//! 4. **Paths, not pointers**: references are stored as target paths, so cycles are a visited-set check
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jsongraph_cache::{MemorySource, Model, Mutation};
//! use serde_json::json;
//!
//! # async fn example() -> jsongraph_cache::Result<()> {
//! let source = MemorySource::from_seed(&json!({
//!     "genreList": { "0": { "0": { "$type": "ref", "value": ["videos", 1234] } } },
//!     "videos": { "1234": { "summary": "House of Cards" } },
//! }))?;
//! let model = Model::builder().source(source).build()?;
//!
//! // Requests made before the first await share one source call.
//! let a = model.get(["genreList[0][0].summary"])?;
//! let b = model.get(["videos[1234].summary"])?;
//! let (a, b) = tokio::join!(a.finish(), b.finish());
//! println!("{}", a?.to_json());
//! println!("{:?}", b?.to_path_values());
//!
//! let written = model.set([Mutation::new("genreList[0][0].summary", "Narcos")?])?;
//! for snapshot in written.progressively().await? {
//!     println!("{}", snapshot.to_json());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | `model` / `syntax` | Paths, path sets, nodes, envelopes; path-set text parser |
//! | `store` | Graph store, resolver, merge engine |
//! | `execution` | Request coalescer and round loop |
//! | `optimizer` | Outbound set envelopes |
//! | `source` | Data source contract, in-memory and failing sources |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod syntax;
pub mod store;
pub mod source;
pub mod optimizer;
pub mod projector;
pub mod execution;
pub mod export;
pub mod config;

use std::sync::Arc;

use serde_json::Value;

use crate::execution::ModelInner;
use crate::execution::coalescer::Coalescer;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Key, Path, PathValue, PathSet, Selector, IntoPathSet,
    Node, Boxed, Branch, Terminal, Envelope, Timestamp,
};

// ============================================================================
// Re-exports: Store, Sources, Execution
// ============================================================================

pub use store::{GraphStore, StoreHandle};
pub use source::{DataSource, Detached, FailingSource, MemorySource, SourceFailure};
pub use optimizer::Mutation;
pub use projector::ErrorProjector;
pub use execution::{Resolution, Response};
pub use config::ModelConfig;

// ============================================================================
// Top-level Model handle
// ============================================================================

/// The primary entry point. A `Model` owns a graph cache and, optionally,
/// the data source that fills it.
///
/// Cloning a model is cheap and shares everything. Two models built
/// separately never share a cache unless given the same [`StoreHandle`].
pub struct Model<S: DataSource = Detached> {
    inner: Arc<ModelInner<S>>,
}

impl<S: DataSource> Clone for Model<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl Model<Detached> {
    pub fn builder() -> ModelBuilder<Detached> {
        ModelBuilder::new()
    }

    /// A model without a source, answering only from `seed`.
    pub fn from_cache(seed: Value) -> Result<Self> {
        ModelBuilder::new().cache(seed).build()
    }
}

impl<S: DataSource> Model<S> {
    /// A model with an empty cache in front of `source`.
    pub fn with_source(source: S) -> Self {
        Self::from_parts(GraphStore::new().handle(), Some(source), None, ModelConfig::default())
    }

    fn from_parts(
        store: StoreHandle,
        source: Option<S>,
        projector: Option<Arc<dyn ErrorProjector>>,
        config: ModelConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ModelInner { store, source, coalescer: Coalescer::new(), projector, config }),
        }
    }

    /// Start resolving `paths`.
    ///
    /// The cache is consulted immediately and missing paths are queued.
    /// Nothing is sent until one of the resolutions queued in the same tick
    /// is awaited; then all of them go out as one request.
    pub fn get<I, P>(&self, paths: I) -> Result<Resolution<S>>
    where
        I: IntoIterator<Item = P>,
        P: IntoPathSet,
    {
        let sets = paths.into_iter().map(IntoPathSet::into_path_set).collect::<Result<Vec<_>>>()?;
        let paths = self.expand(&sets)?;
        tracing::trace!(sets = sets.len(), paths = paths.len(), "get");
        Ok(Resolution::get(Arc::clone(&self.inner), paths))
    }

    /// Fill the cache for `paths` without producing values.
    ///
    /// Path sets are fetched as one batch, shared with any other request
    /// made in the same tick. Per-path errors are cached like any other
    /// answer; only request-level failures are returned.
    pub async fn preload<I, P>(&self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: IntoPathSet,
    {
        let response = self.get(paths)?.finish().await?;
        tracing::debug!(
            paths = response.entries().len(),
            missing = response.missing().len(),
            "preloaded paths"
        );
        Ok(())
    }

    /// Start writing `mutations`.
    ///
    /// Values are written to the cache optimistically right away; awaiting
    /// the resolution sends them to the source and merges its answer.
    pub fn set<I>(&self, mutations: I) -> Result<Resolution<S>>
    where
        I: IntoIterator<Item = Mutation>,
    {
        let mutations: Vec<Mutation> = mutations.into_iter().collect();
        let count = mutations.iter().fold(0usize, |n, m| n.saturating_add(m.path.count()));
        self.check_expansion(count)?;
        let prepared = {
            let mut store = self.inner.store.write();
            let prepared = optimizer::prepare(
                &store,
                &mutations,
                model::node::now_millis(),
                self.inner.config.max_reference_hops,
            )?;
            optimizer::apply_optimistic(&mut store, &prepared);
            prepared
        };
        Ok(Resolution::set(Arc::clone(&self.inner), prepared))
    }

    /// The value at a single path, fetching it if needed.
    ///
    /// An error at the path fails with `PathErrors`; an absent value is `None`.
    pub async fn get_value(&self, path: impl IntoPathSet) -> Result<Option<Value>> {
        let set = path.into_path_set()?;
        let single = single_path(&set)?;
        let response = self.get([set])?.finish().await?.into_result()?;
        Ok(response.value(&single).cloned())
    }

    /// Write one value and return what the source settled on.
    pub async fn set_value(&self, path: impl IntoPathSet, value: impl Into<Value>) -> Result<Option<Value>> {
        let set = path.into_path_set()?;
        let single = single_path(&set)?;
        let response = self.set([Mutation { path: set, value: value.into() }])?.finish().await?.into_result()?;
        Ok(response.value(&single).cloned())
    }

    /// Drop the cached nodes at `paths` (through references), so the next
    /// read fetches them again. Returns how many nodes were removed.
    pub fn invalidate<I, P>(&self, paths: I) -> Result<usize>
    where
        I: IntoIterator<Item = P>,
        P: IntoPathSet,
    {
        let sets = paths.into_iter().map(IntoPathSet::into_path_set).collect::<Result<Vec<_>>>()?;
        let paths = self.expand(&sets)?;
        let now = model::node::now_millis();
        let mut store = self.inner.store.write();
        let mut removed = 0;
        for path in paths {
            let location = store::canonical_location(&store, &path, now, self.inner.config.max_reference_hops);
            if store.delete(&location).is_some() {
                removed += 1;
            }
        }
        tracing::debug!(removed, "invalidated paths");
        Ok(removed)
    }

    /// A model over the same cache with no source attached.
    pub fn without_source(&self) -> Model<Detached> {
        Model::from_parts(
            Arc::clone(&self.inner.store),
            None,
            self.inner.projector.clone(),
            self.inner.config.clone(),
        )
    }

    /// The whole cache in seed format.
    pub fn cache_snapshot(&self) -> Value {
        self.inner.store.read().to_json()
    }

    /// The `{jsonGraph, paths}` envelope the cache holds for `paths`.
    pub fn envelope_for<I, P>(&self, paths: I) -> Result<Envelope>
    where
        I: IntoIterator<Item = P>,
        P: IntoPathSet,
    {
        let sets = paths.into_iter().map(IntoPathSet::into_path_set).collect::<Result<Vec<_>>>()?;
        self.check_expansion(sets.iter().fold(0usize, |n, s| n.saturating_add(s.count())))?;
        let store = self.inner.store.read();
        Ok(export::envelope_for(
            &store,
            &sets,
            model::node::now_millis(),
            self.inner.config.max_reference_hops,
        ))
    }

    /// Access the cache handle (for advanced use).
    pub fn store(&self) -> StoreHandle {
        Arc::clone(&self.inner.store)
    }

    pub fn source(&self) -> Option<&S> {
        self.inner.source.as_ref()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.inner.config
    }

    /// Expand `sets`, refusing requests that name too many concrete paths.
    fn expand(&self, sets: &[PathSet]) -> Result<Vec<Path>> {
        self.check_expansion(sets.iter().fold(0usize, |n, s| n.saturating_add(s.count())))?;
        Ok(model::expand_all(sets))
    }

    fn check_expansion(&self, count: usize) -> Result<()> {
        let limit = self.inner.config.max_expanded_paths;
        if count > limit {
            return Err(Error::InvalidPathSet {
                position: None,
                message: format!("request expands to {count} paths, more than the limit of {limit}"),
            });
        }
        Ok(())
    }
}

fn single_path(set: &PathSet) -> Result<Path> {
    set.as_path().ok_or_else(|| Error::InvalidPathSet {
        position: None,
        message: format!("{set} names more than one path"),
    })
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`Model`].
pub struct ModelBuilder<S: DataSource = Detached> {
    source: Option<S>,
    store: Option<StoreHandle>,
    seed: Option<Value>,
    projector: Option<Arc<dyn ErrorProjector>>,
    config: ModelConfig,
}

impl ModelBuilder<Detached> {
    pub fn new() -> Self {
        Self { source: None, store: None, seed: None, projector: None, config: ModelConfig::default() }
    }
}

impl Default for ModelBuilder<Detached> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DataSource> ModelBuilder<S> {
    pub fn source<T: DataSource>(self, source: T) -> ModelBuilder<T> {
        ModelBuilder {
            source: Some(source),
            store: self.store,
            seed: self.seed,
            projector: self.projector,
            config: self.config,
        }
    }

    /// Seed the cache from node-descriptor JSON.
    pub fn cache(mut self, seed: Value) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Use an existing cache. Models built over the same handle share it.
    pub fn store(mut self, store: StoreHandle) -> Self {
        self.store = Some(store);
        self
    }

    pub fn error_projector(mut self, projector: impl ErrorProjector + 'static) -> Self {
        self.projector = Some(Arc::new(projector));
        self
    }

    pub fn config(mut self, config: ModelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Model<S>> {
        let store = self.store.unwrap_or_else(|| GraphStore::new().handle());
        if let Some(seed) = &self.seed {
            let fragment = Envelope::new(Branch::from_json(seed)?, Vec::new());
            let cx = store::MergeContext { max_hops: self.config.max_reference_hops, ..Default::default() };
            store::merge(&mut store.write(), &fragment, &cx)?;
        }
        Ok(Model::from_parts(store, self.source, self.projector, self.config))
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Invalid path set{}: {message}", at_position(.position))]
    InvalidPathSet { position: Option<usize>, message: String },

    #[error("Circular reference while resolving {path}")]
    CircularReference { path: Path },

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Data source failure: {0}")]
    Source(#[from] SourceFailure),

    #[error("Gave up after {rounds} request rounds")]
    TooManyRequestRounds { rounds: usize },

    #[error("Error projector failed: {0}")]
    Projector(String),

    #[error("{} path(s) resolved to errors", .0.len())]
    PathErrors(Vec<PathValue>),

    #[error("The task serving this request went away")]
    RequestDropped,
}

fn at_position(position: &Option<usize>) -> String {
    position.map(|p| format!(" at position {p}")).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, Error>;
