//! Coordination values and entity payloads.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A self-describing value exchanged between plugins.
///
/// Shared map keys and values, shared heap members and plugin state
/// variables crossing the RPC boundary are all `SharedValue`s. Local callers
/// may use any serde type instead.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SharedValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<SharedValue>),
}

impl SharedValue {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for SharedValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SharedValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for SharedValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for SharedValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<u8>> for SharedValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl std::fmt::Display for SharedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Text(s) => write!(f, "{:?}", s),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

// =============================================================================
// MERGE POLICY
// =============================================================================

/// Combines two versions of the same entity payload.
///
/// `self` is the stored version, `newer` the one being added. The result
/// replaces the stored payload.
pub trait Merge {
    #[must_use]
    fn merge(self, newer: Self) -> Self;
}

/// Anything the store can hold as an entity payload.
pub trait Payload: Merge + Serialize + DeserializeOwned {}

impl<T: Merge + Serialize + DeserializeOwned> Payload for T {}

/// The default entity payload: named properties.
///
/// Merging keeps every stored property and overwrites it with the newer
/// value unless that value is `Null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties(pub BTreeMap<String, SharedValue>);

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SharedValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<SharedValue>,
    ) -> Option<SharedValue> {
        self.0.insert(name.into(), value.into())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SharedValue> {
        self.0.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SharedValue)> {
        self.0.iter()
    }
}

impl Merge for Properties {
    fn merge(mut self, newer: Self) -> Self {
        for (name, value) in newer.0 {
            if !value.is_null() {
                self.0.insert(name, value);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overwrites_with_non_null() {
        let stored = Properties::new().with("port", 80i64).with("banner", "nginx");
        let newer = Properties::new()
            .with("port", 8080i64)
            .with("banner", SharedValue::Null)
            .with("tls", true);

        let merged = stored.merge(newer);
        assert_eq!(merged.get("port"), Some(&SharedValue::Int(8080)));
        assert_eq!(merged.get("banner"), Some(&SharedValue::from("nginx")));
        assert_eq!(merged.get("tls"), Some(&SharedValue::Bool(true)));
    }

    #[test]
    fn merge_with_empty_is_identity() {
        let stored = Properties::new().with("a", 1i64);
        assert_eq!(stored.clone().merge(Properties::new()), stored);
    }

    #[test]
    fn display_lists() {
        let v = SharedValue::List(vec![SharedValue::Int(1), SharedValue::from("x")]);
        assert_eq!(v.to_string(), "[1, \"x\"]");
    }
}
