use serde::{
    Deserialize,
    Serialize,
};

use crate::core::{
    id::Id,
    uri::Uri,
};

/// Hash maps keyed with a fast, non-cryptographic hasher, used for the
/// broker's indexes.
pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

/// Hash sets sharing the hasher of [`HashMap`].
pub type HashSet<V> = std::collections::HashSet<V, ahash::RandomState>;

/// Insertion-ordered maps, used where iteration order must be deterministic,
/// such as subscriber sets.
pub type IndexMap<K, V> = indexmap::IndexMap<K, V, ahash::RandomState>;

/// An integer type for WAMP messages.
pub type Integer = u64;

/// A dictionary of key-value pairs.
pub type Dictionary = HashMap<String, Value>;

/// A sequence of values.
pub type List = Vec<Value>;

/// A value for WAMP messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(Integer),
    String(String),
    Bool(bool),
    Dictionary(Dictionary),
    List(List),
}

impl Value {
    /// The integer stored in the value, if any.
    pub fn as_integer(&self) -> Option<Integer> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// The string stored in the value, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// The boolean stored in the value, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// The dictionary stored in the value, if any.
    pub fn as_dictionary(&self) -> Option<&Dictionary> {
        match self {
            Self::Dictionary(value) => Some(value),
            _ => None,
        }
    }

    /// The list stored in the value, if any.
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Integer> for Value {
    fn from(value: Integer) -> Self {
        Self::Integer(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Dictionary> for Value {
    fn from(value: Dictionary) -> Self {
        Self::Dictionary(value)
    }
}

impl From<List> for Value {
    fn from(value: List) -> Self {
        Self::List(value)
    }
}

impl From<Id> for Value {
    fn from(value: Id) -> Self {
        Self::Integer(value.into())
    }
}

impl From<Uri> for Value {
    fn from(value: Uri) -> Self {
        Self::String(value.into())
    }
}
