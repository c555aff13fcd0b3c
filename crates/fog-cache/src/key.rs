//! Canonical cache keys.
//!
//! Any serializable argument value maps to a deterministic string, so that structurally equal
//! arguments always land on the same cache entry regardless of member order or explicitly
//! absent members.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

/// Returns the canonical key for `args`.
///
/// The encoding goes through [`serde_json::Value`]:
///
/// - `null` at the top level (e.g. a `None` argument) encodes as the empty string, the key of
///   "no active query".
/// - Objects drop `null` members, are sorted by member name, and each member value is encoded
///   recursively.
/// - Arrays are index-keyed containers: `null` elements are dropped but the remaining elements
///   keep their original index.
/// - Containers are written as a JSON array of `[name, child_key]` pairs, scalars as plain JSON.
///
/// Values that cannot be represented as JSON fall back to the empty key.
pub fn to_key<T: Serialize + ?Sized>(args: &T) -> String {
    match serde_json::to_value(args) {
        Ok(value) => encode(&value),
        Err(error) => {
            let dynerr: &dyn std::error::Error = &error;
            tracing::error!(error = dynerr, "Unable to encode cache args");
            String::new()
        }
    }
}

fn encode(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Object(members) => {
            let mut members: Vec<_> = members
                .iter()
                .filter(|(_, value)| !value.is_null())
                .collect();
            members.sort_by(|a, b| a.0.cmp(b.0));
            encode_container(members.into_iter().map(|(name, value)| (name.clone(), value)))
        }
        Value::Array(items) => encode_container(
            items
                .iter()
                .enumerate()
                .filter(|(_, value)| !value.is_null())
                .map(|(index, value)| (index.to_string(), value)),
        ),
        scalar => scalar.to_string(),
    }
}

fn encode_container<'a>(members: impl Iterator<Item = (String, &'a Value)>) -> String {
    let pairs = members
        .map(|(name, value)| Value::Array(vec![Value::String(name), Value::String(encode(value))]))
        .collect();
    Value::Array(pairs).to_string()
}

/// A canonical key identifying one cache entry.
///
/// Cloning is cheap, the underlying string is shared.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Creates the key for the given arguments, see [`to_key`].
    pub fn from_args<T: Serialize + ?Sized>(args: &T) -> Self {
        Self(to_key(args).into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the key of "no active query".
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key.into())
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
