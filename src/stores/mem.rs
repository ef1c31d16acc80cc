//! Thread-safe in-memory store, typically the first tier of a pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::backend::Backend;
use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::types::{PipelineValue, Query, TypeKey};

struct StoredEntry {
    value: PipelineValue,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-memory store for a declared set of types, keyed by type and query
/// fingerprint. Entries may carry a TTL; the per-call `EXPIRES` context
/// hint overrides the store default. Expired entries read as misses.
pub struct MemoryStore {
    name: String,
    types: Vec<TypeKey>,
    default_ttl: Option<Duration>,
    entries: RwLock<HashMap<(TypeKey, String), StoredEntry>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>, types: impl IntoIterator<Item = impl Into<TypeKey>>) -> Self {
        let mut types: Vec<TypeKey> = types.into_iter().map(Into::into).collect();
        types.sort();
        types.dedup();
        MemoryStore {
            name: name.into(),
            types,
            default_ttl: None,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn ttl_for(&self, ctx: &PipelineContext) -> Option<Duration> {
        ctx.expires_secs()
            .map(Duration::from_secs)
            .or(self.default_ttl)
    }
}

#[async_trait]
impl Backend for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn provides(&self) -> Vec<TypeKey> {
        self.types.clone()
    }

    fn accepts(&self) -> Vec<TypeKey> {
        self.types.clone()
    }

    async fn get(
        &self,
        data_type: &TypeKey,
        query: Query,
        _ctx: Arc<PipelineContext>,
    ) -> Result<PipelineValue, PipelineError> {
        if !self.can_get(data_type) {
            return Err(PipelineError::unsupported(&self.name, data_type.clone()));
        }
        let key = (data_type.clone(), query.fingerprint());
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(&key) {
                Some(entry) if !entry.expired(now) => return Ok(entry.value.clone()),
                Some(_) => {}
                None => return Err(PipelineError::not_found(data_type.clone())),
            }
        }
        // Re-check under the write lock: a put may have replaced the entry
        // after the read lock was released, and a fresh write must survive.
        let mut entries = self.entries.write();
        if entries.get(&key).is_some_and(|entry| entry.expired(now)) {
            debug!(store = %self.name, data_type = %data_type, "dropping expired entry");
            entries.remove(&key);
        }
        Err(PipelineError::not_found(data_type.clone()))
    }

    async fn put(
        &self,
        data_type: &TypeKey,
        value: PipelineValue,
        query: Query,
        ctx: Arc<PipelineContext>,
    ) -> Result<(), PipelineError> {
        if !self.can_put(data_type) {
            return Err(PipelineError::unsupported(&self.name, data_type.clone()));
        }
        let expires_at = self.ttl_for(&ctx).map(|ttl| Instant::now() + ttl);
        let key = (data_type.clone(), query.fingerprint());
        self.entries
            .write()
            .insert(key, StoredEntry { value, expires_at });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{downcast_value, value};

    fn ctx() -> Arc<PipelineContext> {
        Arc::new(PipelineContext::new())
    }

    #[tokio::test]
    async fn test_roundtrip_keyed_by_query() {
        let store = MemoryStore::new("mem", ["WordDoc"]);
        let key = TypeKey::from("WordDoc");
        let q1 = Query::new().with("filename", "a");
        let q2 = Query::new().with("filename", "b");

        store
            .put(&key, value("doc-a".to_string()), q1.clone(), ctx())
            .await
            .unwrap();

        let hit = store.get(&key, q1, ctx()).await.unwrap();
        assert_eq!(downcast_value::<String>(&hit).unwrap(), "doc-a");
        assert!(store.get(&key, q2, ctx()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_undeclared_type_is_unsupported() {
        let store = MemoryStore::new("mem", ["WordDoc"]);
        let err = store
            .get(&TypeKey::from("PDF"), Query::new(), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_context_expiry_overrides_default() {
        let store = MemoryStore::new("mem", ["WordDoc"]).with_ttl(Duration::from_secs(3600));
        let key = TypeKey::from("WordDoc");
        let query = Query::new().with("filename", "a");

        // Zero-second expiry from the context makes the entry dead on write.
        let expiring = Arc::new(PipelineContext::with_expiry(0));
        store
            .put(&key, value(()), query.clone(), expiring)
            .await
            .unwrap();
        assert!(store
            .get(&key, query.clone(), ctx())
            .await
            .unwrap_err()
            .is_not_found());

        // Expired entry was dropped on read.
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_fresh_write_survives_expired_read() {
        let store = MemoryStore::new("mem", ["WordDoc"]);
        let key = TypeKey::from("WordDoc");
        let query = Query::new().with("filename", "a");

        // An expired entry reads as a miss and is cleaned up, but only
        // while still expired: a replacement written before the cleanup
        // takes effect must not be deleted.
        let expiring = Arc::new(PipelineContext::with_expiry(0));
        store
            .put(&key, value("stale".to_string()), query.clone(), expiring)
            .await
            .unwrap();
        assert!(store
            .get(&key, query.clone(), ctx())
            .await
            .unwrap_err()
            .is_not_found());

        store
            .put(&key, value("fresh".to_string()), query.clone(), ctx())
            .await
            .unwrap();
        let hit = store.get(&key, query, ctx()).await.unwrap();
        assert_eq!(downcast_value::<String>(&hit).unwrap(), "fresh");
        assert_eq!(store.len(), 1);
    }
}
