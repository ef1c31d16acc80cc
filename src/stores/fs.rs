//! Filesystem store for JSON payloads.
//!
//! Layout: `<root>/<type>/<sha256(query fingerprint)>.json`, one envelope
//! per entry recording when it was stored and when it expires. Payloads
//! must be `serde_json::Value`; anything else fails the put.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::types::{downcast_value, value, PipelineValue, Query, TypeKey};

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    stored_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at_ms: Option<u64>,
    payload: Value,
}

impl Envelope {
    fn expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|deadline| deadline <= now_ms)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Durable store tier for `serde_json::Value` payloads.
pub struct FsStore {
    name: String,
    root: PathBuf,
    types: Vec<TypeKey>,
    default_ttl: Option<Duration>,
}

impl FsStore {
    pub fn new(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        types: impl IntoIterator<Item = impl Into<TypeKey>>,
    ) -> Self {
        let mut types: Vec<TypeKey> = types.into_iter().map(Into::into).collect();
        types.sort();
        types.dedup();
        FsStore {
            name: name.into(),
            root: root.into(),
            types,
            default_ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, data_type: &TypeKey, query: &Query) -> PathBuf {
        let digest = Sha256::digest(query.fingerprint().as_bytes());
        self.root
            .join(data_type.as_str())
            .join(format!("{}.json", hex::encode(digest)))
    }

    fn read_envelope(&self, path: &Path) -> anyhow::Result<Envelope> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading store entry {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("decoding store entry {}", path.display()))
    }

    fn write_envelope(&self, path: &Path, envelope: &Envelope) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating store directory {}", parent.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(envelope)?;
        std::fs::write(path, bytes)
            .with_context(|| format!("writing store entry {}", path.display()))
    }
}

#[async_trait]
impl Backend for FsStore {
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
        let path = self.entry_path(data_type, &query);
        if !path.exists() {
            return Err(PipelineError::not_found(data_type.clone()));
        }
        let envelope = self
            .read_envelope(&path)
            .map_err(|err| PipelineError::get_failed(&self.name, data_type.clone(), err))?;
        if envelope.expired(now_ms()) {
            debug!(store = %self.name, data_type = %data_type, path = %path.display(), "removing expired entry");
            if let Err(err) = std::fs::remove_file(&path) {
                warn!(store = %self.name, path = %path.display(), error = %err, "failed to remove expired entry");
            }
            return Err(PipelineError::not_found(data_type.clone()));
        }
        Ok(value(envelope.payload))
    }

    async fn put(
        &self,
        data_type: &TypeKey,
        payload: PipelineValue,
        query: Query,
        ctx: Arc<PipelineContext>,
    ) -> Result<(), PipelineError> {
        if !self.can_put(data_type) {
            return Err(PipelineError::unsupported(&self.name, data_type.clone()));
        }
        let payload = downcast_value::<Value>(&payload).cloned().ok_or_else(|| {
            PipelineError::put_failed(
                &self.name,
                data_type.clone(),
                anyhow::anyhow!("filesystem store only accepts serde_json::Value payloads"),
            )
        })?;
        let ttl = ctx
            .expires_secs()
            .map(Duration::from_secs)
            .or(self.default_ttl);
        let now = now_ms();
        let envelope = Envelope {
            stored_at_ms: now,
            expires_at_ms: ttl.map(|d| now + d.as_millis() as u64),
            payload,
        };
        let path = self.entry_path(data_type, &query);
        self.write_envelope(&path, &envelope)
            .map_err(|err| PipelineError::put_failed(&self.name, data_type.clone(), err))
    }

}

impl std::fmt::Debug for FsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsStore")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("types", &self.types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Arc<PipelineContext> {
        Arc::new(PipelineContext::new())
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new("disk", dir.path(), ["WordDoc"]);
        let key = TypeKey::from("WordDoc");
        let query = Query::new().with("filename", "find_me");

        store
            .put(&key, value(json!({"body": "hello"})), query.clone(), ctx())
            .await
            .unwrap();

        let hit = store.get(&key, query, ctx()).await.unwrap();
        let payload = downcast_value::<Value>(&hit).unwrap();
        assert_eq!(payload["body"], "hello");
    }

    #[tokio::test]
    async fn test_missing_entry_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new("disk", dir.path(), ["WordDoc"]);
        let err = store
            .get(&TypeKey::from("WordDoc"), Query::new(), ctx())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_non_json_payload_fails_put() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new("disk", dir.path(), ["WordDoc"]);
        let err = store
            .put(
                &TypeKey::from("WordDoc"),
                value("a plain string".to_string()),
                Query::new(),
                ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Put { .. }));
    }

    #[tokio::test]
    async fn test_expired_entry_removed_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new("disk", dir.path(), ["WordDoc"]);
        let key = TypeKey::from("WordDoc");
        let query = Query::new().with("filename", "short_lived");

        let expiring = Arc::new(PipelineContext::with_expiry(0));
        store
            .put(&key, value(json!(1)), query.clone(), expiring)
            .await
            .unwrap();

        let path = store.entry_path(&key, &query);
        assert!(path.exists());
        assert!(store
            .get(&key, query, ctx())
            .await
            .unwrap_err()
            .is_not_found());
        assert!(!path.exists());
    }
}
