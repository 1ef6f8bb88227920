//! Path sets — compact descriptors that expand to many concrete paths.
//!
//! A path set is a sequence of [`Selector`]s. Expansion is the cartesian
//! product of the selectors in row-major order (the rightmost selector varies
//! fastest), which fixes both output order and progressive-emission order.
//!
//! ```text
//! genreList[0][0..1].summary
//!   → genreList[0][0].summary
//!   → genreList[0][1].summary
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use super::{Key, Path};
use crate::{Error, Result};

// ============================================================================
// Selector
// ============================================================================

/// One position of a path set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// A single key.
    Key(Key),
    /// Inclusive integer range. `from > to` selects nothing.
    Range { from: i64, to: i64 },
    /// An ordered collection of keys and ranges. Never empty, never nested.
    Set(Vec<Selector>),
}

impl Selector {
    pub fn range(from: i64, to: i64) -> Self {
        Selector::Range { from, to }
    }

    /// `{from, length}` form. A zero length selects nothing.
    pub fn range_len(from: i64, length: i64) -> Result<Self> {
        if length < 0 {
            return Err(invalid(format!("range length must not be negative, got {length}")));
        }
        Ok(Selector::Range { from, to: from.saturating_add(length).saturating_sub(1) })
    }

    /// Number of keys this selector produces.
    pub fn len(&self) -> usize {
        match self {
            Selector::Key(_) => 1,
            Selector::Range { from, to } if from > to => 0,
            Selector::Range { from, to } => usize::try_from(to.abs_diff(*from))
                .map_or(usize::MAX, |d| d.saturating_add(1)),
            Selector::Set(members) => members.iter().map(Selector::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `i`th key produced by this selector. `i` must be `< len()`.
    fn key_at(&self, mut i: usize) -> Key {
        match self {
            Selector::Key(k) => k.clone(),
            Selector::Range { from, .. } => Key::Int(from.saturating_add(i as i64)),
            Selector::Set(members) => {
                for member in members {
                    let n = member.len();
                    if i < n {
                        return member.key_at(i);
                    }
                    i -= n;
                }
                unreachable!("key_at index out of bounds for selector set")
            }
        }
    }

    fn validate(&self, nested: bool) -> Result<()> {
        match self {
            Selector::Set(members) if nested => {
                Err(invalid(format!("key sets may not be nested: {members:?}")))
            }
            Selector::Set(members) if members.is_empty() => Err(invalid("empty key set".into())),
            Selector::Set(members) => members.iter().try_for_each(|m| m.validate(true)),
            _ => Ok(()),
        }
    }

    fn from_json(value: &Value, nested: bool) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Selector::Key(Key::Str(s.clone()))),
            Value::Number(n) => n
                .as_i64()
                .map(|i| Selector::Key(Key::Int(i)))
                .ok_or_else(|| invalid(format!("key {n} is not an integer"))),
            Value::Bool(b) => Ok(Selector::Key(Key::Str(b.to_string()))),
            Value::Null => Ok(Selector::Key(Key::Str("null".into()))),
            Value::Array(items) if nested => {
                Err(invalid(format!("key sets may not be nested: {}", Value::Array(items.clone()))))
            }
            Value::Array(items) => {
                let members = items
                    .iter()
                    .map(|item| Selector::from_json(item, true))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Selector::Set(members))
            }
            Value::Object(obj) => {
                let bound = |name: &str| -> Result<Option<i64>> {
                    match obj.get(name) {
                        None => Ok(None),
                        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
                            invalid(format!("range bound '{name}' must be an integer, got {v}"))
                        }),
                    }
                };
                let from = bound("from")?.unwrap_or(0);
                match (bound("to")?, bound("length")?) {
                    (Some(to), _) => Ok(Selector::Range { from, to }),
                    (None, Some(length)) => Selector::range_len(from, length),
                    (None, None) => Err(invalid(format!(
                        "range needs 'to' or 'length': {}",
                        Value::Object(obj.clone())
                    ))),
                }
            }
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Selector::Key(Key::Int(i)) => Value::from(*i),
            Selector::Key(Key::Str(s)) => Value::from(s.as_str()),
            Selector::Range { from, to } => serde_json::json!({ "from": from, "to": to }),
            Selector::Set(members) => Value::Array(members.iter().map(Selector::to_json).collect()),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Key(Key::Int(i)) => write!(f, "{i}"),
            Selector::Key(Key::Str(s)) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            Selector::Range { from, to } => write!(f, "{from}..{to}"),
            Selector::Set(members) => {
                for (i, m) in members.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{m}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<Key> for Selector { fn from(k: Key) -> Self { Selector::Key(k) } }
impl From<i64> for Selector { fn from(v: i64) -> Self { Selector::Key(Key::Int(v)) } }
impl From<&str> for Selector { fn from(v: &str) -> Self { Selector::Key(Key::from(v)) } }
impl From<String> for Selector { fn from(v: String) -> Self { Selector::Key(Key::Str(v)) } }

// ============================================================================
// PathSet
// ============================================================================

/// A validated sequence of selectors.
///
/// On the wire a path set is a JSON array whose items are keys, arrays of
/// keys/ranges, or range objects (`{"from": 0, "to": 2}` or
/// `{"from": 0, "length": 3}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct PathSet(Vec<Selector>);

impl PathSet {
    /// Build a path set, rejecting empty or nested key sets.
    pub fn new(selectors: Vec<Selector>) -> Result<Self> {
        selectors.iter().try_for_each(|s| s.validate(false))?;
        Ok(Self(selectors))
    }

    /// Parse path syntax: `lolomo[0..2]['summary', 'art']`.
    pub fn parse(text: &str) -> Result<Self> {
        crate::syntax::parse(text)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(invalid(format!("path set must be an array, got {value}")));
        };
        let selectors = items
            .iter()
            .map(|item| Selector::from_json(item, false))
            .collect::<Result<Vec<_>>>()?;
        Self::new(selectors)
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.0.iter().map(Selector::to_json).collect())
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of concrete paths this set expands to.
    pub fn count(&self) -> usize {
        self.0.iter().map(Selector::len).fold(1usize, usize::saturating_mul)
    }

    /// The single path this set names, if every selector is a plain key.
    pub fn as_path(&self) -> Option<Path> {
        self.0
            .iter()
            .map(|s| match s {
                Selector::Key(k) => Some(k.clone()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(Path::from)
    }

    /// Lazily enumerate the concrete paths, rightmost selector fastest.
    pub fn expand(&self) -> Expansion<'_> {
        Expansion::new(&self.0)
    }
}

impl From<Path> for PathSet {
    fn from(path: Path) -> Self {
        Self(path.iter().cloned().map(Selector::Key).collect())
    }
}

impl From<&Path> for PathSet {
    fn from(path: &Path) -> Self {
        Self(path.iter().cloned().map(Selector::Key).collect())
    }
}

impl TryFrom<Value> for PathSet {
    type Error = Error;
    fn try_from(value: Value) -> Result<Self> {
        PathSet::from_json(&value)
    }
}

impl From<PathSet> for Value {
    fn from(set: PathSet) -> Self {
        set.to_json()
    }
}

impl fmt::Display for PathSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, sel) in self.0.iter().enumerate() {
            match sel {
                Selector::Key(k) if k.is_identifier() => {
                    if i > 0 { write!(f, ".")?; }
                    write!(f, "{k}")?;
                }
                other => write!(f, "[{other}]")?,
            }
        }
        Ok(())
    }
}

/// Anything a query can name: path syntax, a concrete path, or a path set.
pub trait IntoPathSet {
    fn into_path_set(self) -> Result<PathSet>;
}

impl IntoPathSet for PathSet {
    fn into_path_set(self) -> Result<PathSet> { Ok(self) }
}

impl IntoPathSet for &PathSet {
    fn into_path_set(self) -> Result<PathSet> { Ok(self.clone()) }
}

impl IntoPathSet for Path {
    fn into_path_set(self) -> Result<PathSet> { Ok(PathSet::from(self)) }
}

impl IntoPathSet for &Path {
    fn into_path_set(self) -> Result<PathSet> { Ok(PathSet::from(self)) }
}

impl IntoPathSet for &str {
    fn into_path_set(self) -> Result<PathSet> { PathSet::parse(self) }
}

impl IntoPathSet for String {
    fn into_path_set(self) -> Result<PathSet> { PathSet::parse(&self) }
}

impl IntoPathSet for Value {
    fn into_path_set(self) -> Result<PathSet> { PathSet::from_json(&self) }
}

/// Expand every path set, preserving set order then expansion order.
pub fn expand_all(sets: &[PathSet]) -> Vec<Path> {
    sets.iter().flat_map(PathSet::expand).collect()
}

fn invalid(message: String) -> Error {
    Error::InvalidPathSet { position: None, message }
}

// ============================================================================
// Expansion
// ============================================================================

/// Lazy, restartable (via `Clone`) enumeration of a path set.
#[derive(Debug, Clone)]
pub struct Expansion<'a> {
    selectors: &'a [Selector],
    lens: SmallVec<[usize; 6]>,
    cursor: Option<SmallVec<[usize; 6]>>,
}

impl<'a> Expansion<'a> {
    fn new(selectors: &'a [Selector]) -> Self {
        let lens: SmallVec<[usize; 6]> = selectors.iter().map(Selector::len).collect();
        let cursor = if lens.iter().any(|&n| n == 0) {
            None
        } else {
            Some(SmallVec::from_elem(0, selectors.len()))
        };
        Self { selectors, lens, cursor }
    }
}

impl Iterator for Expansion<'_> {
    type Item = Path;

    fn next(&mut self) -> Option<Path> {
        let cursor = self.cursor.as_mut()?;
        let path: Path = self
            .selectors
            .iter()
            .zip(cursor.iter())
            .map(|(sel, &i)| sel.key_at(i))
            .collect();

        // Odometer step, rightmost position first.
        let mut pos = cursor.len();
        loop {
            if pos == 0 {
                self.cursor = None;
                break;
            }
            pos -= 1;
            cursor[pos] += 1;
            if cursor[pos] < self.lens[pos] {
                break;
            }
            cursor[pos] = 0;
        }
        Some(path)
    }
}

// ============================================================================
// Collapse
// ============================================================================

/// Fold concrete paths back into compact path sets.
///
/// Paths are grouped by length; within a group, sibling keys whose remaining
/// tails collapse identically are merged into one selector (consecutive
/// integers become ranges). Expanding the result yields exactly the input
/// paths, deduplicated, possibly reordered.
pub fn collapse(paths: &[Path]) -> Vec<PathSet> {
    let mut by_len: Vec<(usize, Trie)> = Vec::new();
    for path in paths {
        let idx = match by_len.iter().position(|(len, _)| *len == path.len()) {
            Some(idx) => idx,
            None => {
                by_len.push((path.len(), Trie::default()));
                by_len.len() - 1
            }
        };
        by_len[idx].1.insert(path.keys());
    }

    by_len
        .into_iter()
        .flat_map(|(_, trie)| trie.collapse())
        .map(PathSet)
        .collect()
}

#[derive(Default)]
struct Trie {
    children: Vec<(Key, Trie)>,
}

impl Trie {
    fn insert(&mut self, keys: &[Key]) {
        let Some((head, rest)) = keys.split_first() else { return };
        match self.children.iter_mut().find(|(k, _)| k == head) {
            Some((_, child)) => child.insert(rest),
            None => {
                let mut child = Trie::default();
                child.insert(rest);
                self.children.push((head.clone(), child));
            }
        }
    }

    fn collapse(&self) -> Vec<Vec<Selector>> {
        if self.children.is_empty() {
            return vec![Vec::new()];
        }

        let mut groups: Vec<(Vec<Key>, Vec<Vec<Selector>>)> = Vec::new();
        for (key, child) in &self.children {
            let tails = child.collapse();
            match groups.iter_mut().find(|(_, t)| *t == tails) {
                Some((keys, _)) => keys.push(key.clone()),
                None => groups.push((vec![key.clone()], tails)),
            }
        }

        let mut out = Vec::new();
        for (keys, tails) in groups {
            let head = selector_for(keys);
            for tail in tails {
                let mut sels = Vec::with_capacity(tail.len() + 1);
                sels.push(head.clone());
                sels.extend(tail);
                out.push(sels);
            }
        }
        out
    }
}

fn selector_for(keys: Vec<Key>) -> Selector {
    if let [only] = keys.as_slice() {
        return Selector::Key(only.clone());
    }

    let mut ints: Vec<i64> = keys.iter().filter_map(Key::as_int).collect();
    ints.sort_unstable();
    ints.dedup();

    let mut members: Vec<Selector> = keys
        .into_iter()
        .filter(|k| !k.is_int())
        .map(Selector::Key)
        .collect();

    let mut run: Option<(i64, i64)> = None;
    for i in ints {
        run = match run {
            Some((from, to)) if to.checked_add(1) == Some(i) => Some((from, i)),
            Some((from, to)) => {
                members.push(run_selector(from, to));
                Some((i, i))
            }
            None => Some((i, i)),
        };
    }
    if let Some((from, to)) = run {
        members.push(run_selector(from, to));
    }

    if members.len() == 1 {
        members.swap_remove(0)
    } else {
        Selector::Set(members)
    }
}

fn run_selector(from: i64, to: i64) -> Selector {
    if from == to { Selector::Key(Key::Int(from)) } else { Selector::Range { from, to } }
}
