//! # Data Source Gateway
//!
//! The contract between the cache and whatever backs it. A source answers
//! `get` with an envelope covering the requested path sets and answers
//! `set` with the authoritative envelope for the paths it wrote. It owns no
//! part of the model's cache and is invoked once per outbound request.
//!
//! Failures come back as [`Error::Source`] and are turned into per-path
//! Error nodes by the caller. Any other error a source returns is treated
//! the same way, except `MalformedEnvelope`, which aborts the resolution.

pub mod memory;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Envelope, PathSet};
use crate::{Error, Result};

pub use memory::MemorySource;

// ============================================================================
// DataSource trait
// ============================================================================

#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// Fetch the fragment answering `paths`.
    async fn get(&self, paths: Vec<PathSet>) -> Result<Envelope>;

    /// Apply `envelope` and return what the source now holds for its paths.
    async fn set(&self, envelope: Envelope) -> Result<Envelope>;
}

#[async_trait]
impl<T: DataSource> DataSource for Arc<T> {
    async fn get(&self, paths: Vec<PathSet>) -> Result<Envelope> {
        (**self).get(paths).await
    }

    async fn set(&self, envelope: Envelope) -> Result<Envelope> {
        (**self).set(envelope).await
    }
}

// ============================================================================
// SourceFailure
// ============================================================================

/// A failed data source call, in the shape reported per path:
/// `{ "message": "Timeout", "status": 503 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (status {status})")]
pub struct SourceFailure {
    pub message: String,
    pub status: u16,
}

impl SourceFailure {
    pub fn new(message: impl Into<String>, status: u16) -> Self {
        Self { message: message.into(), status }
    }

    /// Wrap an arbitrary error that escaped a source.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Source(failure) => failure.clone(),
            other => Self::new(other.to_string(), 500),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "message": self.message, "status": self.status })
    }
}

// ============================================================================
// Detached
// ============================================================================

/// The source type of a model built without one. A detached model never
/// calls it; missing paths simply stay missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

#[async_trait]
impl DataSource for Detached {
    async fn get(&self, _paths: Vec<PathSet>) -> Result<Envelope> {
        Err(SourceFailure::new("model has no data source", 500).into())
    }

    async fn set(&self, _envelope: Envelope) -> Result<Envelope> {
        Err(SourceFailure::new("model has no data source", 500).into())
    }
}

// ============================================================================
// FailingSource
// ============================================================================

/// A source whose every call fails with the same message and status.
#[derive(Debug)]
pub struct FailingSource {
    failure: SourceFailure,
    calls: AtomicUsize,
}

impl FailingSource {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self { failure: SourceFailure::new(message, status), calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for FailingSource {
    async fn get(&self, _paths: Vec<PathSet>) -> Result<Envelope> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.failure.clone().into())
    }

    async fn set(&self, _envelope: Envelope) -> Result<Envelope> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.failure.clone().into())
    }
}
