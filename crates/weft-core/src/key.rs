#![forbid(unsafe_code)]

//! Fibre identity: keys and key paths.
//!
//! A [`Key`] names a child relative to its parent; a [`KeyPath`] is the
//! ordered sequence of keys from the root and is globally unique per fibre.
//! Paths are shared slices (`Rc<[Key]>`) so that cloning one into errors,
//! events, and snapshots is cheap.

use std::fmt;
use std::rc::Rc;

use serde::ser::{Serialize, SerializeSeq, Serializer};

/// A child's identity relative to its parent: a name or an index.
///
/// Index keys are what positional child lists (for example a sequence node's
/// children) use; name keys are for everything addressed explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Positional key.
    Index(u64),
    /// Named key.
    Name(Rc<str>),
}

impl From<u64> for Key {
    fn from(index: u64) -> Self {
        Self::Index(index)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self::Index(index as u64)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Name(Rc::from(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Name(Rc::from(name))
    }
}

impl From<Rc<str>> for Key {
    fn from(name: Rc<str>) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Index(index) => serializer.serialize_u64(*index),
            Self::Name(name) => serializer.serialize_str(name),
        }
    }
}

/// The ordered key sequence from the root down to one fibre.
///
/// The root path is empty. `KeyPath` is immutable; [`KeyPath::child`] builds
/// a new path with one more segment.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPath(Rc<[Key]>);

impl KeyPath {
    /// The root path (no segments).
    #[must_use]
    pub fn root() -> Self {
        Self(Rc::from(Vec::new()))
    }

    /// The path of a child of `self` under `key`.
    #[must_use]
    pub fn child(&self, key: Key) -> Self {
        let mut keys = Vec::with_capacity(self.0.len() + 1);
        keys.extend_from_slice(&self.0);
        keys.push(key);
        Self(Rc::from(keys))
    }

    /// The segments, root first.
    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    /// The final segment, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Key> {
        self.0.last()
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<Key>> FromIterator<K> for KeyPath {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for key in self.0.iter() {
            write!(f, "/{key}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPath({self})")
    }
}

impl Serialize for KeyPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for key in self.0.iter() {
            seq.serialize_element(key)?;
        }
        seq.end()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_extends_path() {
        let root = KeyPath::root();
        let a = root.child("a".into());
        let a0 = a.child(0u64.into());

        assert!(root.is_root());
        assert_eq!(a.len(), 1);
        assert_eq!(a0.len(), 2);
        assert_eq!(a0.keys(), &[Key::from("a"), Key::from(0u64)]);
        assert_eq!(a0.last(), Some(&Key::from(0u64)));
    }

    #[test]
    fn display_is_slash_separated() {
        assert_eq!(KeyPath::root().to_string(), "/");
        let path: KeyPath = ["a", "b"].into_iter().collect();
        assert_eq!(path.to_string(), "/a/b");
        assert_eq!(path.child(3u64.into()).to_string(), "/a/b/3");
    }

    #[test]
    fn equal_paths_compare_equal() {
        let a: KeyPath = ["x", "y"].into_iter().collect();
        let b = KeyPath::root().child("x".into()).child("y".into());
        assert_eq!(a, b);
        assert_ne!(a, b.child("z".into()));
    }

    #[test]
    fn sibling_order_follows_key_order() {
        let base = KeyPath::root().child("p".into());
        let first = base.child(Key::Index(0));
        let second = base.child(Key::Index(1));
        assert!(first < second);
    }

    #[test]
    fn serializes_as_mixed_sequence() {
        let path = KeyPath::root().child("a".into()).child(2u64.into());
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, r#"["a",2]"#);
    }
}
