//! Capability registration tables.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::error::PipelineError;

/// Maps a capability key (a type, or a type pair for transformers) to the
/// handler registered for it.
///
/// At most one handler per key: a duplicate registration fails with
/// [`PipelineError::DuplicateCapability`] rather than silently shadowing the
/// earlier one.
pub struct CapabilityRegistry<K, H> {
    entity: String,
    handlers: HashMap<K, H>,
}

impl<K, H> CapabilityRegistry<K, H>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    pub fn new(entity: impl Into<String>) -> Self {
        CapabilityRegistry {
            entity: entity.into(),
            handlers: HashMap::new(),
        }
    }

    /// Name of the backend/transformer owning this registry.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn register(&mut self, key: K, handler: H) -> Result<(), PipelineError> {
        if self.handlers.contains_key(&key) {
            return Err(PipelineError::duplicate(&self.entity, key.to_string()));
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    pub fn supports(&self, key: &K) -> bool {
        self.handlers.contains_key(key)
    }

    /// The registered handler, or `Unsupported` naming the owning entity.
    pub fn resolve(&self, key: &K) -> Result<&H, PipelineError> {
        self.handlers.get(key).ok_or_else(|| {
            PipelineError::unsupported(&self.entity, key.to_string())
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.handlers.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &H)> {
        self.handlers.iter()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
