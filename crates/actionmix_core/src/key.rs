//! Structural keys.
//!
//! Keys partition every piece of policy state. Two dispatches interact only
//! when they share the key a policy uses, so equality and hashing are
//! structural, never by identity.

use std::fmt;
use std::sync::Arc;

/// A structurally compared, hashable dispatch key.
///
/// # Example
///
/// ```
/// use actionmix_core::Key;
///
/// let a = Key::from(("like", 42));
/// let b = Key::composite(["like".into(), 42.into()]);
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "(like, 42)");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// A textual key.
    Name(Arc<str>),
    /// An integer key.
    Id(i64),
    /// An ordered tuple of keys.
    Composite(Arc<[Key]>),
}

impl Key {
    /// Creates a textual key.
    pub fn name(name: impl Into<Arc<str>>) -> Self {
        Key::Name(name.into())
    }

    /// Creates a composite key from its parts.
    pub fn composite(parts: impl IntoIterator<Item = Key>) -> Self {
        Key::Composite(parts.into_iter().collect())
    }

    /// Returns a composite key scoping `self` under `namespace`.
    ///
    /// Used to derive private sub-keys (e.g. an engine's in-flight flag)
    /// that can never collide with keys chosen by callers for other policies.
    pub fn scoped(&self, namespace: &str) -> Self {
        Key::composite([Key::name(namespace), self.clone()])
    }

    /// Returns the parts of a composite key, or `None`.
    pub fn parts(&self) -> Option<&[Key]> {
        match self {
            Key::Composite(parts) => Some(parts),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => f.write_str(name),
            Key::Id(id) => write!(f, "{id}"),
            Key::Composite(parts) => {
                f.write_str("(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{part}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Name(value.into())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Name(value.into())
    }
}

impl From<&Key> for Key {
    fn from(value: &Key) -> Self {
        value.clone()
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Id(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Id(i64::from(value))
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Key::Id(i64::from(value))
    }
}

impl From<Vec<Key>> for Key {
    fn from(parts: Vec<Key>) -> Self {
        Key::Composite(parts.into())
    }
}

impl<A: Into<Key>, B: Into<Key>> From<(A, B)> for Key {
    fn from((a, b): (A, B)) -> Self {
        Key::composite([a.into(), b.into()])
    }
}

impl<A: Into<Key>, B: Into<Key>, C: Into<Key>> From<(A, B, C)> for Key {
    fn from((a, b, c): (A, B, C)) -> Self {
        Key::composite([a.into(), b.into(), c.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn structural_equality() {
        let a = Key::from(("user", 7));
        let b = Key::from(("user".to_string(), 7i64));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn different_shapes_differ() {
        assert_ne!(Key::from("7"), Key::from(7));
        assert_ne!(Key::from(("a", "b")), Key::from(("a", "b", "c")));
    }

    #[test]
    fn scoped_keys_do_not_collide() {
        let key = Key::from("save");
        assert_ne!(key.scoped("optimistic-sync"), key);
        assert_eq!(key.scoped("x").parts().map(<[Key]>::len), Some(2));
    }

    #[test]
    fn display() {
        let key = Key::from(("a", ("b", 3)));
        assert_eq!(key.to_string(), "(a, (b, 3))");
        assert_eq!(format!("{key:?}"), "Key((a, (b, 3)))");
    }
}
