//! Keys — the segments of a path.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A single path segment: either an integer index or a string name.
///
/// The graph store addresses children by their textual segment, so
/// `Key::Int(1234)` and `Key::Str("1234")` name the same child. Equality and
/// hashing follow the segment text, which keeps paths built from JSON object
/// keys interchangeable with paths built from integer indexers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl Key {
    /// The textual segment used to address a branch child.
    pub fn segment(&self) -> Cow<'_, str> {
        match self {
            Key::Int(i) => Cow::Owned(i.to_string()),
            Key::Str(s) => Cow::Borrowed(s),
        }
    }

    /// Rebuild a key from a stored segment. Canonical integers come back as
    /// `Key::Int` so that output paths read the way they were requested.
    pub fn from_segment(segment: &str) -> Self {
        match segment.parse::<i64>() {
            Ok(i) if i.to_string() == segment => Key::Int(i),
            _ => Key::Str(segment.to_owned()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(i) => Some(*i),
            Key::Str(_) => None,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Key::Int(_))
    }

    /// True when the key can be written after a `.` in path syntax.
    pub(crate) fn is_identifier(&self) -> bool {
        match self {
            Key::Int(_) => false,
            Key::Str(s) => {
                let mut chars = s.chars();
                matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '$')
                    && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
            }
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Int(a), Key::Int(b)) => a == b,
            (Key::Str(a), Key::Str(b)) => a == b,
            _ => self.segment() == other.segment(),
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segment().hash(state);
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<i64> for Key { fn from(v: i64) -> Self { Key::Int(v) } }
impl From<i32> for Key { fn from(v: i32) -> Self { Key::Int(v as i64) } }
impl From<u32> for Key { fn from(v: u32) -> Self { Key::Int(v as i64) } }
impl From<usize> for Key { fn from(v: usize) -> Self { Key::Int(v as i64) } }
impl From<String> for Key { fn from(v: String) -> Self { Key::Str(v) } }
impl From<&str> for Key { fn from(v: &str) -> Self { Key::Str(v.to_owned()) } }

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{i}"),
            Key::Str(s) => write!(f, "{s}"),
        }
    }
}
