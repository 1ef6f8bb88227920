//! Model configuration.

use std::env;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_REQUEST_ROUNDS: usize = 8;
pub const DEFAULT_MAX_REFERENCE_HOPS: usize = 64;
pub const DEFAULT_MAX_EXPANDED_PATHS: usize = 100_000;

/// Tunables for a [`Model`](crate::Model).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Data source round trips one resolution may take before failing with
    /// `TooManyRequestRounds`.
    pub max_request_rounds: usize,
    /// Reference hops allowed in one walk; more is reported as a cycle.
    pub max_reference_hops: usize,
    /// Concrete paths one call may name once its path sets are expanded.
    /// Larger requests fail with `InvalidPathSet` before anything is expanded.
    pub max_expanded_paths: usize,
    /// Report terminals as `{"$type": ..., "value": ...}` in projections.
    pub box_values: bool,
    /// Do not turn per-path errors into a failed result.
    pub treat_errors_as_values: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_request_rounds: DEFAULT_MAX_REQUEST_ROUNDS,
            max_reference_hops: DEFAULT_MAX_REFERENCE_HOPS,
            max_expanded_paths: DEFAULT_MAX_EXPANDED_PATHS,
            box_values: false,
            treat_errors_as_values: false,
        }
    }
}

impl ModelConfig {
    /// Defaults overlaid with `JSONGRAPH_MAX_REQUEST_ROUNDS` and
    /// `JSONGRAPH_MAX_REFERENCE_HOPS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(rounds) = env_usize("JSONGRAPH_MAX_REQUEST_ROUNDS") {
            config.max_request_rounds = rounds;
        }
        if let Some(hops) = env_usize("JSONGRAPH_MAX_REFERENCE_HOPS") {
            config.max_reference_hops = hops;
        }
        config
    }

    pub fn with_max_request_rounds(mut self, rounds: usize) -> Self {
        self.max_request_rounds = rounds;
        self
    }

    pub fn with_max_expanded_paths(mut self, paths: usize) -> Self {
        self.max_expanded_paths = paths;
        self
    }

    pub fn with_boxed_values(mut self, boxed: bool) -> Self {
        self.box_values = boxed;
        self
    }

    pub fn with_errors_as_values(mut self, as_values: bool) -> Self {
        self.treat_errors_as_values = as_values;
        self
    }
}

fn env_usize(name: &str) -> Option<usize> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}
