//! Per-call context shared by every handler of one pipeline operation.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

/// Well-known context key: expiration hint in seconds. Sinks that implement
/// expiry may honor it; the pipeline core never interprets it.
pub const EXPIRES: &str = "expires";

/// Mutable key/value scratch created fresh for each `get`/`put` call and
/// handed to every handler invoked during it.
#[derive(Debug, Default)]
pub struct PipelineContext {
    values: RwLock<HashMap<String, Value>>,
}

impl PipelineContext {
    pub fn new() -> Self {
        PipelineContext::default()
    }

    /// Context carrying an [`EXPIRES`] hint.
    pub fn with_expiry(seconds: u64) -> Self {
        let ctx = PipelineContext::new();
        ctx.set(EXPIRES, seconds);
        ctx
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.write().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.write().remove(key)
    }

    /// The [`EXPIRES`] hint, when present and numeric.
    pub fn expires_secs(&self) -> Option<u64> {
        self.get(EXPIRES).and_then(|value| value.as_u64())
    }
}
