//! Request execution.
//!
//! `Model::get` and `Model::set` do their synchronous work up front
//! (expansion, resolution against the cache, optimistic writes) and hand
//! back a [`Resolution`]. Awaiting it drives the round loop:
//!
//! ```text
//! resolve ─► missing? ─► coalesce + flush ─► source.get ─► merge ─► resolve ...
//!                                               (spawned task)
//! ```
//!
//! Source calls run on spawned tasks, so a caller that drops its resolution
//! does not cancel a fetch other waiters depend on.

pub mod coalescer;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::ModelConfig;
use crate::model::node::now_millis;
use crate::model::{Branch, Envelope, Node, Path, PathSet, Terminal};
use crate::optimizer::{prepare, PreparedSet};
use crate::projector::ErrorProjector;
use crate::source::{DataSource, Detached, SourceFailure};
use crate::store::{merge, resolve, MergeContext, Resolved, StoreHandle};
use crate::{Error, Result};

use coalescer::{Coalescer, Ticket};

// ============================================================================
// Model internals
// ============================================================================

/// Shared state behind a `Model` and every resolution it hands out.
pub(crate) struct ModelInner<S> {
    pub store: StoreHandle,
    pub source: Option<S>,
    pub coalescer: Coalescer,
    pub projector: Option<Arc<dyn ErrorProjector>>,
    pub config: ModelConfig,
}

impl<S: DataSource> ModelInner<S> {
    pub fn merge_context(&self) -> MergeContext {
        MergeContext {
            now: now_millis(),
            projector: self.projector.clone(),
            max_hops: self.config.max_reference_hops,
        }
    }

    /// Resolve `paths` against the cache, evicting expired nodes on the way.
    pub fn resolve_now(&self, paths: &[Path]) -> Resolved {
        let now = now_millis();
        let resolved = resolve(&self.store.read(), paths, now, self.config.max_reference_hops);

        if !resolved.expired.is_empty() {
            let mut store = self.store.write();
            let mut evicted = 0;
            for at in &resolved.expired {
                if store.get(at).is_some_and(|n| n.is_expired(now)) {
                    store.delete(at);
                    evicted += 1;
                }
            }
            tracing::debug!(evicted, "evicted expired nodes");
        }
        resolved
    }

    /// Merge a source response into the cache.
    fn store_round(&self, envelope: &Envelope) -> Result<()> {
        let cx = self.merge_context();
        let touched = merge(&mut self.store.write(), envelope, &cx)?;
        tracing::debug!(touched = touched.len(), "stored source response");
        Ok(())
    }

    /// Record a failed source call as an Error node at every path it covered.
    fn fail_paths(&self, paths: &[Path], err: &Error) -> Result<()> {
        let failure = SourceFailure::from_error(err);
        tracing::warn!(error = %failure, paths = paths.len(), "data source call failed");

        let mut graph = Branch::new();
        for path in paths {
            graph.set_path(path.keys(), Node::error(failure.to_value()));
        }
        let envelope = Envelope::new(graph, paths.iter().map(PathSet::from).collect());
        self.store_round(&envelope)
    }

    async fn fetch(&self, paths: &[Path]) -> Result<()> {
        let Some(source) = &self.source else {
            return Ok(());
        };
        let sets = crate::model::collapse(paths);
        tracing::debug!(paths = paths.len(), sets = sets.len(), "dispatching get");
        match source.get(sets).await {
            Ok(envelope) => self.store_round(&envelope),
            Err(e @ Error::MalformedEnvelope(_)) => Err(e),
            Err(e) => self.fail_paths(paths, &e),
        }
    }

    async fn push(&self, envelope: Envelope, requested: &[Path]) -> Result<()> {
        let Some(source) = &self.source else {
            return Ok(());
        };
        tracing::debug!(paths = envelope.paths.len(), "dispatching set");
        match source.set(envelope).await {
            Ok(response) => self.store_round(&response),
            Err(e @ Error::MalformedEnvelope(_)) => Err(e),
            Err(e) => self.fail_paths(requested, &e),
        }
    }
}

/// Dispatch whatever is pending on a task of its own.
fn flush<S: DataSource>(inner: &Arc<ModelInner<S>>) {
    let Some(batch) = inner.coalescer.take_pending() else {
        return;
    };
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let result = inner.fetch(&batch.paths).await;
        inner.coalescer.complete(batch.id, result);
    });
}

/// Send a set envelope on a task of its own and wait for it to be merged.
async fn send_set<S: DataSource>(inner: &Arc<ModelInner<S>>, envelope: Envelope, requested: Vec<Path>) -> Result<()> {
    let inner = Arc::clone(inner);
    tokio::spawn(async move { inner.push(envelope, &requested).await })
        .await
        .map_err(|_| Error::RequestDropped)?
}

async fn get_round<S: DataSource>(inner: &Arc<ModelInner<S>>, ticket: Ticket) -> Result<()> {
    flush(inner);
    ticket.wait().await
}

// ============================================================================
// Resolution
// ============================================================================

pub(crate) enum Kind {
    Get,
    Set(PreparedSet),
}

/// A started `get` or `set`. Await [`finish`](Self::finish) for the final
/// result, or [`progressively`](Self::progressively) for every snapshot.
///
/// Dropping a resolution abandons it. Source calls already started still
/// complete and are merged into the cache.
pub struct Resolution<S: DataSource = Detached> {
    inner: Arc<ModelInner<S>>,
    kind: Kind,
    paths: Vec<Path>,
    initial: Resolved,
    ticket: Option<Ticket>,
}

impl<S: DataSource> Resolution<S> {
    pub(crate) fn get(inner: Arc<ModelInner<S>>, paths: Vec<Path>) -> Self {
        let initial = inner.resolve_now(&paths);
        let ticket = match &inner.source {
            Some(_) if !initial.missing.is_empty() => Some(inner.coalescer.request(&initial.missing)),
            _ => None,
        };
        Self { inner, kind: Kind::Get, paths, initial, ticket }
    }

    pub(crate) fn set(inner: Arc<ModelInner<S>>, prepared: PreparedSet) -> Self {
        let paths = prepared.requested.clone();
        let initial = inner.resolve_now(&paths);
        Self { inner, kind: Kind::Set(prepared), paths, initial, ticket: None }
    }

    /// The concrete paths this resolution answers, in request order.
    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    /// What the cache could answer when the request was made, if that is
    /// worth emitting ahead of the final result: a get holding at least one
    /// value while still missing others, or any set that will reach a source.
    pub fn preliminary(&self) -> Option<Response> {
        self.inner.source.as_ref()?;
        match self.kind {
            Kind::Get => {
                let snapshot = Response::preliminary(&self.paths, &self.initial, &self.inner.config);
                let has_value = snapshot.entries.iter().any(|(_, t)| !t.is_void());
                (has_value && !self.initial.missing.is_empty()).then_some(snapshot)
            }
            Kind::Set(_) => Some(Response::build(&self.paths, &self.initial, &self.inner.config)),
        }
    }

    /// Every snapshot in emission order: an optional preliminary one, then
    /// exactly one final one.
    pub async fn progressively(self) -> Result<Vec<Response>> {
        let mut snapshots: Vec<Response> = self.preliminary().into_iter().collect();
        snapshots.push(self.finish().await?);
        Ok(snapshots)
    }

    /// Drive the request to completion.
    pub async fn finish(self) -> Result<Response> {
        let Resolution { inner, kind, paths, initial, ticket } = self;
        let config = &inner.config;
        let mut state = initial;
        let mut rounds = 0usize;
        let mut last_frontier: Option<Vec<(Path, Path)>> = None;

        if inner.source.is_some() {
            match &kind {
                Kind::Set(prepared) => {
                    rounds += 1;
                    send_set(&inner, prepared.envelope.clone(), prepared.requested.clone()).await?;
                    state = inner.resolve_now(&paths);
                }
                Kind::Get => {
                    if let Some(ticket) = ticket {
                        rounds += 1;
                        last_frontier = Some(std::mem::take(&mut state.frontier));
                        get_round(&inner, ticket).await?;
                        state = inner.resolve_now(&paths);
                    }
                }
            }

            while !state.missing.is_empty() {
                if last_frontier.as_ref() == Some(&state.frontier) {
                    tracing::debug!(missing = state.missing.len(), rounds, "source made no progress");
                    break;
                }
                if rounds >= config.max_request_rounds {
                    tracing::warn!(rounds, missing = state.missing.len(), "request round limit reached");
                    return Err(Error::TooManyRequestRounds { rounds });
                }
                rounds += 1;
                last_frontier = Some(std::mem::take(&mut state.frontier));

                let mut missing = std::mem::take(&mut state.missing);
                if let Kind::Set(prepared) = &kind {
                    let retry = prepared.mutations_for(&missing);
                    if !retry.is_empty() {
                        let resend = prepare(&inner.store.read(), &retry, now_millis(), config.max_reference_hops)?;
                        missing.retain(|p| !resend.requested.contains(p));
                        tracing::debug!(paths = resend.requested.len(), rounds, "re-sending set paths");
                        send_set(&inner, resend.envelope, resend.requested).await?;
                    }
                }
                if !missing.is_empty() {
                    tracing::debug!(paths = missing.len(), rounds, "requesting missing paths");
                    let ticket = inner.coalescer.request(&missing);
                    get_round(&inner, ticket).await?;
                }
                state = inner.resolve_now(&paths);
            }
        }

        tracing::debug!(paths = paths.len(), rounds, "resolution finished");
        Ok(Response::build(&paths, &state, config))
    }
}

// ============================================================================
// Response
// ============================================================================

/// One snapshot of a resolution.
#[derive(Debug, Clone)]
pub struct Response {
    entries: Vec<(Path, Terminal)>,
    failures: Vec<(Path, Error)>,
    missing: Vec<Path>,
    boxed: bool,
    errors_as_values: bool,
}

impl Response {
    fn build(paths: &[Path], resolved: &Resolved, config: &ModelConfig) -> Self {
        Self::assemble(paths, resolved.resolved.iter(), resolved, config)
    }

    /// Cache hits plus stale values still held for missing paths.
    fn preliminary(paths: &[Path], resolved: &Resolved, config: &ModelConfig) -> Self {
        Self::assemble(paths, resolved.resolved.iter().chain(resolved.stale.iter()), resolved, config)
    }

    fn assemble<'a>(
        paths: &[Path],
        found: impl Iterator<Item = &'a (Path, Terminal)>,
        resolved: &Resolved,
        config: &ModelConfig,
    ) -> Self {
        let found: HashMap<&Path, &Terminal> = found.map(|(p, t)| (p, t)).collect();
        let mut seen = std::collections::HashSet::new();
        let entries = paths
            .iter()
            .filter(|p| seen.insert(*p))
            .filter_map(|p| found.get(p).map(|t| (p.clone(), (*t).clone())))
            .collect();
        Self {
            entries,
            failures: resolved.failed.clone(),
            missing: resolved.missing.clone(),
            boxed: config.box_values,
            errors_as_values: config.treat_errors_as_values,
        }
    }

    /// Resolved terminals in request order.
    pub fn entries(&self) -> &[(Path, Terminal)] {
        &self.entries
    }

    /// Paths whose walk failed (reference cycles), with the cause. They
    /// also appear in `entries` as Error terminals.
    pub fn failures(&self) -> &[(Path, Error)] {
        &self.failures
    }

    /// Paths still unanswered when the resolution stopped.
    pub fn missing(&self) -> &[Path] {
        &self.missing
    }

    pub fn boxed(&self) -> bool {
        self.boxed
    }

    pub fn get(&self, path: &Path) -> Option<&Terminal> {
        self.entries.iter().find(|(p, _)| p == path).map(|(_, t)| t)
    }

    /// The atom value at `path`, if there is one.
    pub fn value(&self, path: &Path) -> Option<&Value> {
        self.get(path).and_then(Terminal::value)
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|(_, t)| t.is_error())
    }

    /// Fail with `PathErrors` when any path errored, unless the model treats
    /// errors as values.
    pub fn into_result(self) -> Result<Self> {
        if self.has_errors() && !self.errors_as_values {
            return Err(Error::PathErrors(self.errors()));
        }
        Ok(self)
    }
}
