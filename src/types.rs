//! Core types shared across the pipeline.
//!
//! The pipeline routes on [`TypeKey`] alone; payload contents are opaque
//! ([`PipelineValue`]) and [`Query`] parameters are passed through to
//! backends unmodified.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dispatch key naming a kind of data (e.g. "WordDoc", "PDF").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(Arc<str>);

impl TypeKey {
    pub fn new(name: impl AsRef<str>) -> Self {
        TypeKey(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TypeKey {
    fn from(name: &str) -> Self {
        TypeKey::new(name)
    }
}

impl From<String> for TypeKey {
    fn from(name: String) -> Self {
        TypeKey(Arc::from(name.as_str()))
    }
}

impl From<&TypeKey> for TypeKey {
    fn from(key: &TypeKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered `(from, to)` pair identifying one conversion capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypePair {
    pub from: TypeKey,
    pub to: TypeKey,
}

impl TypePair {
    pub fn new(from: impl Into<TypeKey>, to: impl Into<TypeKey>) -> Self {
        TypePair {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl fmt::Display for TypePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Opaque payload moved through the pipeline.
///
/// Backfill propagation clones the `Arc`, never the payload itself.
pub type PipelineValue = Arc<dyn Any + Send + Sync>;

/// Wrap a concrete payload for the pipeline.
pub fn value<T: Any + Send + Sync>(payload: T) -> PipelineValue {
    Arc::new(payload)
}

/// Borrow the concrete payload back out of a [`PipelineValue`].
pub fn downcast_value<T: Any + Send + Sync>(value: &PipelineValue) -> Option<&T> {
    value.downcast_ref::<T>()
}

/// Identifying parameters for one `get`/`put` operation.
///
/// Keys are unique and loggable. The pipeline never interprets the values;
/// each backend invocation receives its own clone, so per-backend query
/// validation may fill defaults without leaking into sibling invocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    params: BTreeMap<String, Value>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.params.iter()
    }

    /// Stable identity string for store keying.
    ///
    /// Equal queries produce equal fingerprints regardless of insertion
    /// order (the underlying map is sorted by key).
    pub fn fingerprint(&self) -> String {
        let mut parts = Vec::with_capacity(self.params.len());
        for (key, value) in &self.params {
            parts.push(format!("{}={}", key, value));
        }
        parts.join("&")
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.fingerprint().replace('&', ", "))
    }
}
