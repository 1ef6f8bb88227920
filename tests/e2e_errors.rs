//! End-to-end tests for failure handling: source errors, error projection,
//! reference cycles, round limits, and malformed responses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use jsongraph_cache::model::expand_all;
use jsongraph_cache::{
    path, Boxed, Branch, DataSource, Envelope, Error, FailingSource, MemorySource, Model, ModelConfig, Node, Path,
    PathSet, PathValue, Result,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

// ============================================================================
// Test sources
// ============================================================================

/// Answers every path with a reference to a location it has never served,
/// so the client always has one more hop to fetch.
#[derive(Default)]
struct Receding {
    calls: AtomicUsize,
}

#[async_trait]
impl DataSource for Receding {
    async fn get(&self, paths: Vec<PathSet>) -> Result<Envelope> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as i64;
        let mut graph = Branch::new();
        for path in expand_all(&paths) {
            graph.set_path(path.keys(), Node::reference(path!["hop", n]));
        }
        Ok(Envelope::new(graph, paths))
    }

    async fn set(&self, envelope: Envelope) -> Result<Envelope> {
        Ok(envelope)
    }
}

/// Serves only references on the first call, then everything.
struct Staged {
    calls: AtomicUsize,
    full: MemorySource,
}

#[async_trait]
impl DataSource for Staged {
    async fn get(&self, paths: Vec<PathSet>) -> Result<Envelope> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return self.full.get(paths).await;
        }
        let mut graph = Branch::new();
        graph.set_path(path!["genreList", 0, 0].keys(), Node::reference(path!["videos", 1234]));
        Ok(Envelope::new(graph, paths))
    }

    async fn set(&self, envelope: Envelope) -> Result<Envelope> {
        self.full.set(envelope).await
    }
}

/// Returns a fixed response, counting calls.
struct Canned {
    calls: AtomicUsize,
    response: fn() -> Result<Envelope>,
}

impl Canned {
    fn new(response: fn() -> Result<Envelope>) -> Self {
        Self { calls: AtomicUsize::new(0), response }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for Canned {
    async fn get(&self, _paths: Vec<PathSet>) -> Result<Envelope> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.response)()
    }

    async fn set(&self, _envelope: Envelope) -> Result<Envelope> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.response)()
    }
}

fn tag_errors(_: &Path, error: Boxed) -> Result<Boxed> {
    Ok(error.with_meta("$foo", json!("bar")))
}

// ============================================================================
// 1. Source failures
// ============================================================================

#[tokio::test]
async fn test_source_failure_becomes_projected_path_error() {
    let source = Arc::new(FailingSource::new(503, "Timeout"));
    let model = Model::builder()
        .source(Arc::clone(&source))
        .error_projector(tag_errors)
        .build()
        .unwrap();

    let response = model.get(["videos[1234].summary"]).unwrap().finish().await.unwrap();
    assert!(response.has_errors());
    assert_eq!(
        response.errors(),
        vec![PathValue::new(
            path!["videos", 1234, "summary"],
            json!({ "$foo": "bar", "value": { "message": "Timeout", "status": 503 } }),
        )]
    );
    assert!(matches!(response.into_result(), Err(Error::PathErrors(_))));

    // The error is cached like any other value.
    let again = model.get(["videos[1234].summary"]).unwrap().finish().await.unwrap();
    assert!(again.has_errors());
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_failing_projector_keeps_the_raw_error() {
    let source = Arc::new(FailingSource::new(503, "Timeout"));
    let model = Model::builder()
        .source(Arc::clone(&source))
        .error_projector(|_: &Path, _: Boxed| -> Result<Boxed> { Err(Error::Projector("no".into())) })
        .build()
        .unwrap();

    let response = model.get(["videos[1234].summary"]).unwrap().finish().await.unwrap();
    assert_eq!(
        response.errors(),
        vec![PathValue::new(
            path!["videos", 1234, "summary"],
            json!({ "message": "Timeout", "status": 503 }),
        )]
    );
}

#[tokio::test]
async fn test_errors_as_values_do_not_fail_the_result() {
    let model = Model::builder()
        .source(FailingSource::new(500, "boom"))
        .config(ModelConfig::default().with_errors_as_values(true))
        .build()
        .unwrap();

    let response = model.get(["a"]).unwrap().finish().await.unwrap().into_result().unwrap();
    assert_eq!(response.errors().len(), 1);
    assert_eq!(model.get_value("a").await.unwrap(), None);
}

#[tokio::test]
async fn test_get_value_surfaces_path_errors() {
    let model = Model::builder().source(FailingSource::new(503, "Timeout")).build().unwrap();
    assert!(matches!(model.get_value("a.b").await, Err(Error::PathErrors(errors)) if errors.len() == 1));
}

// ============================================================================
// 2. References and rounds
// ============================================================================

#[tokio::test]
async fn test_served_reference_cycle_fails_without_looping() {
    let source = Arc::new(
        MemorySource::from_seed(&json!({
            "a": { "$type": "ref", "value": ["b"] },
            "b": { "$type": "ref", "value": ["a"] },
        }))
        .unwrap(),
    );
    let model = Model::builder().source(Arc::clone(&source)).build().unwrap();

    let response = model.get(["a.x"]).unwrap().finish().await.unwrap();
    assert!(matches!(response.failures(), [(_, Error::CircularReference { .. })]));
    assert!(response.missing().is_empty());
    assert_eq!(source.get_calls(), 1);
}

#[tokio::test]
async fn test_references_served_alone_are_followed_next_round() {
    let source = Arc::new(Staged {
        calls: AtomicUsize::new(0),
        full: MemorySource::from_seed(&json!({
            "genreList": { "0": { "0": { "$type": "ref", "value": ["videos", 1234] } } },
            "videos": { "1234": { "summary": "House of Cards" } },
        }))
        .unwrap(),
    });
    let model = Model::builder().source(Arc::clone(&source)).build().unwrap();

    let value = model.get_value("genreList[0][0].summary").await.unwrap();
    assert_eq!(value, Some(json!("House of Cards")));
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_round_limit_stops_a_receding_source() {
    let source = Arc::new(Receding::default());
    let model = Model::builder()
        .source(Arc::clone(&source))
        .config(ModelConfig::default().with_max_request_rounds(3))
        .build()
        .unwrap();

    let result = model.get(["start"]).unwrap().finish().await;
    assert!(matches!(result, Err(Error::TooManyRequestRounds { rounds: 3 })));
    assert_eq!(source.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_source_without_progress_ends_the_loop() {
    let source = Arc::new(Canned::new(|| Ok(Envelope::default())));
    let model = Model::builder().source(Arc::clone(&source)).build().unwrap();

    let response = model.get(["videos[1234].summary"]).unwrap().finish().await.unwrap();
    assert_eq!(source.calls(), 1);
    assert_eq!(response.missing(), &[path!["videos", 1234, "summary"]]);
    assert!(response.entries().is_empty());
}

// ============================================================================
// 3. Malformed responses
// ============================================================================

#[tokio::test]
async fn test_malformed_source_error_aborts_the_request() {
    let source = Arc::new(Canned::new(|| Err(Error::MalformedEnvelope("truncated".into()))));
    let model = Model::builder().source(Arc::clone(&source)).build().unwrap();

    let result = model.get(["a"]).unwrap().finish().await;
    assert!(matches!(result, Err(Error::MalformedEnvelope(_))));
    assert_eq!(model.cache_snapshot(), json!({}));
}

#[tokio::test]
async fn test_envelope_with_empty_path_is_rejected_whole() {
    let source = Arc::new(Canned::new(|| {
        let graph = Branch::from_json(&json!({ "a": 1 }))?;
        Ok(Envelope::new(graph, vec![PathSet::new(vec![])?]))
    }));
    let model = Model::builder().source(Arc::clone(&source)).build().unwrap();

    let result = model.get(["a"]).unwrap().finish().await;
    assert!(matches!(result, Err(Error::MalformedEnvelope(_))));
    assert_eq!(model.cache_snapshot(), json!({}));
}

#[tokio::test]
async fn test_envelope_json_must_be_well_formed() {
    let bad: Value = json!({ "jsonGraph": { "a": { "$type": "ref" } }, "paths": [["a"]] });
    assert!(matches!(Envelope::from_json(bad), Err(Error::MalformedEnvelope(_))));

    let good = Envelope::from_json(json!({ "jsonGraph": { "a": 1 }, "paths": [["a"]] })).unwrap();
    assert_eq!(good.concrete_paths(), vec![path!["a"]]);
}

#[tokio::test]
async fn test_invalid_path_set_never_reaches_the_source() {
    let source = Arc::new(Canned::new(|| Ok(Envelope::default())));
    let model = Model::builder().source(Arc::clone(&source)).build().unwrap();

    let err = model.get(["videos[0..]"]).err();
    assert!(matches!(err, Some(Error::InvalidPathSet { .. })));
    assert_eq!(source.calls(), 0);
}
