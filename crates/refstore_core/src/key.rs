//! Model identifier.

use refstore_codec::Value;
use std::fmt;

/// Unique identifier for a model within its type.
///
/// Keys are opaque scalars, either integers (the autoincrement default)
/// or strings (ids imported from external data). A key is:
/// - Unique per `(type, key)` pair within a collection
/// - Immutable once assigned to a model
///
/// No coercion happens between representations: `Key::Integer(1)` and
/// `Key::Text("1")` are different keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Integer key.
    Integer(i64),
    /// String key.
    Text(String),
}

impl Key {
    /// Creates a key from a raw stored value, if the value is a key
    /// scalar.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(n) => Some(Key::Integer(*n)),
            Value::Text(s) => Some(Key::Text(s.clone())),
            _ => None,
        }
    }

    /// Returns the raw storage form of this key.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Key::Integer(n) => Value::Integer(*n),
            Key::Text(s) => Value::Text(s.clone()),
        }
    }

    /// Parses a key from a patch path segment.
    ///
    /// Digit-only segments (with optional leading minus) are read as
    /// integer keys, everything else as text.
    #[must_use]
    pub fn from_path_segment(segment: &str) -> Self {
        match segment.parse::<i64>() {
            Ok(n) => Key::Integer(n),
            Err(_) => Key::Text(segment.to_string()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Integer(n) => write!(f, "{n}"),
            Key::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Integer(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Integer(i64::from(n))
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Integer(i64::from(n))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        key.to_value()
    }
}
