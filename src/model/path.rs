//! Path — a concrete, ordered sequence of keys.

use std::fmt;
use std::ops::Index;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use super::Key;

/// One location in the graph: `["videos", 1234, "summary"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(SmallVec<[Key; 6]>);

impl Path {
    /// The empty path (the graph root).
    pub fn root() -> Self {
        Self(SmallVec::new())
    }

    pub fn from_keys<I>(keys: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Key>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    /// Parse a concrete path such as `videos[1234].summary`.
    ///
    /// Fails with `InvalidPathSet` if the text names more than one path.
    pub fn parse(text: &str) -> crate::Result<Self> {
        let set = crate::syntax::parse(text)?;
        set.as_path().ok_or_else(|| crate::Error::InvalidPathSet {
            position: None,
            message: format!("'{text}' expands to more than one path"),
        })
    }

    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Key> {
        self.0.iter()
    }

    pub fn push(&mut self, key: impl Into<Key>) {
        self.0.push(key.into());
    }

    /// The first `len` keys of this path.
    pub fn prefix(&self, len: usize) -> Path {
        Path(self.0[..len.min(self.0.len())].iter().cloned().collect())
    }

    /// This path followed by `rest`.
    pub fn join(&self, rest: &[Key]) -> Path {
        let mut out = self.clone();
        out.0.extend(rest.iter().cloned());
        out
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    pub fn to_json(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|k| match k {
                    Key::Int(i) => Value::from(*i),
                    Key::Str(s) => Value::from(s.as_str()),
                })
                .collect(),
        )
    }
}

impl Index<usize> for Path {
    type Output = Key;
    fn index(&self, i: usize) -> &Key {
        &self.0[i]
    }
}

impl<K: Into<Key>> FromIterator<K> for Path {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self::from_keys(iter)
    }
}

impl From<Vec<Key>> for Path {
    fn from(keys: Vec<Key>) -> Self {
        Self(SmallVec::from_vec(keys))
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a Key;
    type IntoIter = std::slice::Iter<'a, Key>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Renders in path syntax: `genreList[0][1].summary`.
impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.0.iter().enumerate() {
            match key {
                Key::Str(s) if key.is_identifier() => {
                    if i > 0 { write!(f, ".")?; }
                    write!(f, "{s}")?;
                }
                Key::Str(s) => write!(f, "[\"{}\"]", s.replace('"', "\\\""))?,
                Key::Int(n) => write!(f, "[{n}]")?,
            }
        }
        Ok(())
    }
}

/// Build a [`Path`] from literal keys: `path!["videos", 1234, "summary"]`.
#[macro_export]
macro_rules! path {
    ($($key:expr),* $(,)?) => {
        $crate::Path::from_keys([$($crate::Key::from($key)),*])
    };
}

// ============================================================================
// PathValue
// ============================================================================

/// A concrete path paired with the JSON value observed (or to be written)
/// there. This is the flat output shape and the shape of per-path errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathValue {
    pub path: Path,
    pub value: Value,
}

impl PathValue {
    pub fn new(path: Path, value: Value) -> Self {
        Self { path, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_path_syntax() {
        let p = crate::path!["genreList", 0, 1, "summary"];
        assert_eq!(p.to_string(), "genreList[0][1].summary");

        let quoted = crate::path!["a", "two words"];
        assert_eq!(quoted.to_string(), "a[\"two words\"]");
    }

    #[test]
    fn test_join_and_prefix() {
        let target = crate::path!["videos", 1234];
        let full = target.join(&[Key::from("summary")]);
        assert_eq!(full, crate::path!["videos", 1234, "summary"]);
        assert_eq!(full.prefix(2), target);
        assert!(full.starts_with(&target));
        assert!(!target.starts_with(&full));
    }

    #[test]
    fn test_serde_round_trip_keeps_key_kinds() {
        let p = crate::path!["videos", 1234, "summary"];
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json, serde_json::json!(["videos", 1234, "summary"]));
        let back: Path = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
        assert!(back[1].is_int());
    }
}
