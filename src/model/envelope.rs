//! Envelope — the `{jsonGraph, paths}` pair exchanged with a data source.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{expand_all, Branch, Path, PathSet};
use crate::{Error, Result};

/// A graph fragment plus the path sets it answers.
///
/// An envelope without paths is a bare fragment: merging it applies every
/// node it contains.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "jsonGraph", alias = "graph", default)]
    pub graph: Branch,
    #[serde(default)]
    pub paths: Vec<PathSet>,
}

impl Envelope {
    pub fn new(graph: Branch, paths: Vec<PathSet>) -> Self {
        Self { graph, paths }
    }

    /// Decode an envelope received as raw JSON. Any structural problem,
    /// including a malformed path set, is a `MalformedEnvelope`.
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::MalformedEnvelope(e.to_string()))
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "jsonGraph": self.graph.to_json(),
            "paths": self.paths.iter().map(PathSet::to_json).collect::<Vec<_>>(),
        })
    }

    /// Every concrete path named by `paths`, in expansion order.
    pub fn concrete_paths(&self) -> Vec<Path> {
        expand_all(&self.paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;
    use crate::path;
    use serde_json::json;

    #[test]
    fn test_envelope_from_wire_json() {
        let env = Envelope::from_json(json!({
            "jsonGraph": { "videos": { "1234": { "summary": 5 } } },
            "paths": [["videos", 1234, "summary"]],
        }))
        .unwrap();
        assert_eq!(env.concrete_paths(), vec![path!["videos", 1234, "summary"]]);
        assert_eq!(
            env.graph.get_path(path!["videos", 1234, "summary"].keys()),
            Some(&Node::atom(5))
        );
        assert_eq!(env.to_json()["jsonGraph"], json!({ "videos": { "1234": { "summary": 5 } } }));
    }

    #[test]
    fn test_graph_alias_and_missing_paths() {
        let env = Envelope::from_json(json!({ "graph": { "a": 1 } })).unwrap();
        assert!(env.paths.is_empty());
        assert_eq!(env.graph.get("a"), Some(&Node::atom(1)));
    }

    #[test]
    fn test_malformed_envelopes() {
        for bad in [
            json!({ "jsonGraph": 5 }),
            json!({ "jsonGraph": {}, "paths": [["a", { "from": "x", "to": 1 }]] }),
            json!({ "jsonGraph": { "r": { "$type": "ref", "value": [] } } }),
        ] {
            assert!(matches!(Envelope::from_json(bad), Err(Error::MalformedEnvelope(_))));
        }
    }
}
