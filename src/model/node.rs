//! Graph nodes — the closed set of things a cache location can hold.
//!
//! The JSON descriptor form (used for seeds and wire envelopes) tags nodes
//! with `$type`:
//!
//! ```text
//! { "$type": "atom",  "value": 5, "$expires": -60000 }
//! { "$type": "ref",   "value": ["videos", 1234] }
//! { "$type": "error", "value": { "message": "Timeout", "status": 503 } }
//! { "$type": "atom" }                      ← confirmed absent (Void)
//! { "summary": ... }                       ← branch
//! "hello"                                  ← bare atom
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Key, Path};
use crate::{Error, Result};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub(crate) fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// Normalise a raw `$expires` into an absolute deadline.
///
/// `1` never expires, negative values are relative to `now`, anything else
/// is an absolute epoch-millisecond deadline.
pub fn normalize_expires(raw: Option<Timestamp>, now: Timestamp) -> Option<Timestamp> {
    match raw? {
        1 => None,
        r if r < 0 => Some(now.saturating_sub(r)),
        r => Some(r),
    }
}

fn expired(expires: Option<Timestamp>, now: Timestamp) -> bool {
    expires.is_some_and(|at| at <= now)
}

// ============================================================================
// Boxed
// ============================================================================

/// A value as stored in an Atom or Error node, with its metadata.
///
/// `meta` carries any extra `$`-prefixed descriptor fields (for example a
/// field added by an error projector).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Boxed {
    pub value: Value,
    pub expires: Option<Timestamp>,
    pub meta: Map<String, Value>,
}

impl Boxed {
    pub fn new(value: Value) -> Self {
        Self { value, expires: None, meta: Map::new() }
    }

    pub fn with_expires(mut self, expires: Timestamp) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    fn same_content(&self, other: &Boxed) -> bool {
        self.value == other.value && self.meta == other.meta
    }

    fn boxed_json(&self, tag: &str) -> Value {
        let mut obj = Map::new();
        obj.insert("$type".into(), Value::from(tag));
        for (k, v) in &self.meta {
            obj.insert(k.clone(), v.clone());
        }
        if let Some(at) = self.expires {
            obj.insert("$expires".into(), Value::from(at));
        }
        obj.insert("value".into(), self.value.clone());
        Value::Object(obj)
    }
}

// ============================================================================
// Node
// ============================================================================

/// A cache location.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Atom(Boxed),
    Ref { target: Path, expires: Option<Timestamp> },
    Error(Boxed),
    Branch(Branch),
    /// Confirmed absent: the source was asked and has nothing here.
    Void,
}

impl Node {
    pub fn atom(value: impl Into<Value>) -> Self {
        Node::Atom(Boxed::new(value.into()))
    }

    pub fn reference(target: Path) -> Self {
        Node::Ref { target, expires: None }
    }

    pub fn error(value: impl Into<Value>) -> Self {
        Node::Error(Boxed::new(value.into()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Atom(_) => "atom",
            Node::Ref { .. } => "ref",
            Node::Error(_) => "error",
            Node::Branch(_) => "branch",
            Node::Void => "void",
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Node::Branch(_))
    }

    pub fn expires(&self) -> Option<Timestamp> {
        match self {
            Node::Atom(b) | Node::Error(b) => b.expires,
            Node::Ref { expires, .. } => *expires,
            Node::Branch(_) | Node::Void => None,
        }
    }

    pub(crate) fn set_expires(&mut self, at: Option<Timestamp>) {
        match self {
            Node::Atom(b) | Node::Error(b) => b.expires = at,
            Node::Ref { expires, .. } => *expires = at,
            Node::Branch(_) | Node::Void => {}
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        expired(self.expires(), now)
    }

    /// Equal Atom/Error content: merging one over the other changes nothing
    /// but its deadline.
    pub(crate) fn same_terminal(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Atom(a), Node::Atom(b)) | (Node::Error(a), Node::Error(b)) => a.same_content(b),
            _ => false,
        }
    }

    /// Rewrite raw `$expires` values (recursively) into absolute deadlines.
    pub(crate) fn normalize(&mut self, now: Timestamp) {
        match self {
            Node::Branch(b) => b.children.values_mut().for_each(|c| c.normalize(now)),
            other => {
                let at = normalize_expires(other.expires(), now);
                other.set_expires(at);
            }
        }
    }

    // ========================================================================
    // Descriptor codec
    // ========================================================================

    /// Decode a JSON node descriptor. Structural problems are reported as
    /// `MalformedEnvelope`.
    pub fn from_json(value: &Value) -> Result<Self> {
        decode(value, &mut Vec::new())
    }

    /// Decode a value being written by a `set`: tagged descriptors keep their
    /// type, anything else (including plain objects) becomes an Atom.
    pub fn from_mutation(value: Value) -> Result<Self> {
        match &value {
            Value::Object(obj) if tag_of(obj).is_some() => Node::from_json(&value),
            _ => Ok(Node::atom(value)),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Node::Atom(b) if b.expires.is_none() && b.meta.is_empty() && !needs_box(&b.value) => {
                b.value.clone()
            }
            Node::Atom(b) => b.boxed_json("atom"),
            Node::Error(b) => b.boxed_json("error"),
            Node::Ref { target, expires } => {
                let mut obj = Map::new();
                obj.insert("$type".into(), Value::from("ref"));
                if let Some(at) = expires {
                    obj.insert("$expires".into(), Value::from(*at));
                }
                obj.insert("value".into(), target.to_json());
                Value::Object(obj)
            }
            Node::Void => serde_json::json!({ "$type": "atom" }),
            Node::Branch(b) => b.to_json(),
        }
    }
}

fn needs_box(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

fn tag_of(obj: &Map<String, Value>) -> Option<&Value> {
    obj.get("$type").or_else(|| obj.get("kind"))
}

fn malformed(at: &[String], message: impl std::fmt::Display) -> Error {
    Error::MalformedEnvelope(format!("at /{}: {message}", at.join("/")))
}

fn decode(value: &Value, at: &mut Vec<String>) -> Result<Node> {
    let Value::Object(obj) = value else {
        return Ok(Node::atom(value.clone()));
    };

    let Some(tag) = tag_of(obj) else {
        let mut branch = Branch::new();
        for (k, v) in obj {
            at.push(k.clone());
            let child = decode(v, at)?;
            at.pop();
            branch.insert(k.clone(), child);
        }
        return Ok(Node::Branch(branch));
    };

    let expires = match obj.get("$expires").or_else(|| obj.get("expires")) {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_i64().ok_or_else(|| malformed(at, format!("$expires must be an integer, got {v}")))?),
    };
    let meta: Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| k.starts_with('$') && !matches!(k.as_str(), "$type" | "$expires"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    match tag.as_str() {
        Some("atom") => match obj.get("value") {
            Some(v) => Ok(Node::Atom(Boxed { value: v.clone(), expires, meta })),
            None => Ok(Node::Void),
        },
        Some("error") => Ok(Node::Error(Boxed {
            value: obj.get("value").cloned().unwrap_or(Value::Null),
            expires,
            meta,
        })),
        Some("ref") => {
            let raw = obj
                .get("value")
                .or_else(|| obj.get("target"))
                .ok_or_else(|| malformed(at, "reference without a target"))?;
            let target: Path = serde_json::from_value(raw.clone())
                .map_err(|e| malformed(at, format!("reference target {raw} is not a path: {e}")))?;
            if target.is_empty() {
                return Err(malformed(at, "reference target is empty"));
            }
            Ok(Node::Ref { target, expires })
        }
        _ => Err(malformed(at, format!("unknown node type {tag}"))),
    }
}

// ============================================================================
// Branch
// ============================================================================

/// An interior node: children addressed by key segment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Branch {
    children: hashbrown::HashMap<String, Node>,
}

impl Branch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn get(&self, segment: &str) -> Option<&Node> {
        self.children.get(segment)
    }

    pub fn get_mut(&mut self, segment: &str) -> Option<&mut Node> {
        self.children.get_mut(segment)
    }

    pub fn insert(&mut self, segment: impl Into<String>, node: Node) -> Option<Node> {
        self.children.insert(segment.into(), node)
    }

    pub fn remove(&mut self, segment: &str) -> Option<Node> {
        self.children.remove(segment)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.children.iter()
    }

    /// The node at `keys`, without following references.
    pub fn get_path(&self, keys: &[Key]) -> Option<&Node> {
        let (last, parents) = keys.split_last()?;
        let mut branch = self;
        for key in parents {
            match branch.get(&key.segment())? {
                Node::Branch(b) => branch = b,
                _ => return None,
            }
        }
        branch.get(&last.segment())
    }

    pub fn get_path_mut(&mut self, keys: &[Key]) -> Option<&mut Node> {
        let (last, parents) = keys.split_last()?;
        let mut branch = self;
        for key in parents {
            match branch.get_mut(&key.segment())? {
                Node::Branch(b) => branch = b,
                _ => return None,
            }
        }
        branch.get_mut(&last.segment())
    }

    /// Write `node` at `keys`, creating branches on demand. A non-branch
    /// node in the way is replaced by a branch.
    pub fn set_path(&mut self, keys: &[Key], node: Node) -> Option<Node> {
        let (last, parents) = keys.split_last()?;
        let mut branch = self;
        for key in parents {
            let slot = branch
                .children
                .entry(key.segment().into_owned())
                .or_insert_with(|| Node::Branch(Branch::new()));
            if !slot.is_branch() {
                *slot = Node::Branch(Branch::new());
            }
            let Node::Branch(next) = slot else { unreachable!("slot was just made a branch") };
            branch = next;
        }
        branch.insert(last.segment().into_owned(), node)
    }

    pub fn remove_path(&mut self, keys: &[Key]) -> Option<Node> {
        let (last, parents) = keys.split_last()?;
        let mut branch = self;
        for key in parents {
            match branch.get_mut(&key.segment())? {
                Node::Branch(b) => branch = b,
                _ => return None,
            }
        }
        branch.remove(&last.segment())
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        match Node::from_json(value)? {
            Node::Branch(b) => Ok(b),
            other => Err(Error::MalformedEnvelope(format!(
                "graph root must be an object, got {}",
                other.kind()
            ))),
        }
    }

    pub fn to_json(&self) -> Value {
        // serde_json::Map keeps keys sorted, so output is deterministic.
        Value::Object(self.children.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
    }
}

impl TryFrom<Value> for Branch {
    type Error = Error;
    fn try_from(value: Value) -> Result<Self> {
        Branch::from_json(&value)
    }
}

impl From<Branch> for Value {
    fn from(branch: Branch) -> Self {
        branch.to_json()
    }
}

// ============================================================================
// Terminal
// ============================================================================

/// What a resolved path ends on after reference following.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Atom(Boxed),
    Error(Boxed),
    Void,
}

impl Terminal {
    pub fn is_error(&self) -> bool {
        matches!(self, Terminal::Error(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Terminal::Void)
    }

    /// The atom's value, if this is an atom.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Terminal::Atom(b) => Some(&b.value),
            _ => None,
        }
    }

    /// JSON rendering. Boxed form keeps `$type` and metadata; unboxed atoms
    /// are bare values and unboxed errors keep only their metadata.
    pub fn to_json(&self, boxed: bool) -> Value {
        match (self, boxed) {
            (Terminal::Atom(b), true) => b.boxed_json("atom"),
            (Terminal::Atom(b), false) => b.value.clone(),
            (Terminal::Error(b), true) => b.boxed_json("error"),
            (Terminal::Error(b), false) if b.meta.is_empty() => b.value.clone(),
            (Terminal::Error(b), false) => {
                let mut obj = b.meta.clone();
                obj.insert("value".into(), b.value.clone());
                Value::Object(obj)
            }
            (Terminal::Void, true) => serde_json::json!({ "$type": "atom" }),
            (Terminal::Void, false) => Value::Null,
        }
    }

    pub(crate) fn into_node(self) -> Node {
        match self {
            Terminal::Atom(b) => Node::Atom(b),
            Terminal::Error(b) => Node::Error(b),
            Terminal::Void => Node::Void,
        }
    }
}
