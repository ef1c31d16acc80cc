//! The ready-made stores exercised as real pipeline tiers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use strata::{
    downcast_value, value, Backend, CompositeBackend, FsStore, HandlerError, MemoryStore,
    Pipeline, PipelineContext, Query, RegistryBackend,
};

fn counting_json_source(name: &str, payload: Value, hits: Arc<Mutex<usize>>) -> RegistryBackend {
    RegistryBackend::builder(name)
        .get("Report", move |_query, _ctx| {
            let hits = hits.clone();
            let payload = payload.clone();
            async move {
                *hits.lock() += 1;
                Ok(value(payload))
            }
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn memory_store_entry_expires_after_ttl() {
    let store = MemoryStore::new("mem", ["Report"]).with_ttl(Duration::from_millis(10));
    let key = strata::TypeKey::from("Report");
    let query = Query::new().with("id", 7);
    let ctx = Arc::new(PipelineContext::new());

    store
        .put(&key, value(json!({"id": 7})), query.clone(), ctx.clone())
        .await
        .unwrap();
    assert!(store.get(&key, query.clone(), ctx.clone()).await.is_ok());

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(store
        .get(&key, query, ctx)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn fs_store_survives_as_a_cache_tier() {
    let dir = tempfile::tempdir().unwrap();
    let hits = Arc::new(Mutex::new(0));
    let query = Query::new().with("id", 1);

    // First pipeline: the API supplies the report and the disk tier is
    // backfilled.
    let pipeline = Pipeline::builder()
        .backend(FsStore::new("disk", dir.path(), ["Report"]))
        .backend(counting_json_source("api", json!({"total": 9}), hits.clone()))
        .build()
        .unwrap();
    pipeline.get("Report", query.clone()).await.unwrap();
    assert_eq!(*hits.lock(), 1);

    // Second pipeline over the same directory: served from disk, the API
    // is never consulted.
    let pipeline = Pipeline::builder()
        .backend(FsStore::new("disk", dir.path(), ["Report"]))
        .backend(counting_json_source("api", json!({"total": 9}), hits.clone()))
        .build()
        .unwrap();
    let (result, report) = pipeline
        .get_full("Report", query, Arc::new(PipelineContext::new()))
        .await
        .unwrap();
    assert_eq!(report.source.as_deref(), Some("disk"));
    assert_eq!(*hits.lock(), 1);
    let payload = downcast_value::<Value>(&result).unwrap();
    assert_eq!(payload["total"], 9);
}

#[tokio::test]
async fn expiry_hint_flows_through_the_pipeline_context() {
    let store = MemoryStore::new("mem", ["Report"]);
    let hits = Arc::new(Mutex::new(0));
    let pipeline = Pipeline::builder()
        .backend(store)
        .backend(counting_json_source("api", json!(1), hits.clone()))
        .build()
        .unwrap();

    // Zero-second expiry: the backfilled entry is dead on arrival, so the
    // API is hit every time.
    let ctx = Arc::new(PipelineContext::with_expiry(0));
    let query = Query::new().with("id", 2);
    pipeline
        .get_full("Report", query.clone(), ctx.clone())
        .await
        .unwrap();
    pipeline.get_full("Report", query, ctx).await.unwrap();
    assert_eq!(*hits.lock(), 2);
}

#[tokio::test]
async fn composite_tier_behaves_as_one_backend() {
    let miss: Arc<dyn Backend> = Arc::new(
        RegistryBackend::builder("empty")
            .get("Report", |_query, _ctx| async move {
                Err::<strata::PipelineValue, _>(HandlerError::NotFound)
            })
            .build()
            .unwrap(),
    );
    let hit: Arc<dyn Backend> = Arc::new(
        RegistryBackend::builder("full")
            .get("Report", |_query, _ctx| async move {
                Ok(value(json!({"from": "full"})))
            })
            .build()
            .unwrap(),
    );
    let composite = CompositeBackend::new("grouped", vec![miss, hit]);

    let pipeline = Pipeline::builder()
        .backend(MemoryStore::new("mem", ["Report"]))
        .backend(composite)
        .build()
        .unwrap();

    let (result, report) = pipeline
        .get_full(
            "Report",
            Query::new().with("id", 3),
            Arc::new(PipelineContext::new()),
        )
        .await
        .unwrap();
    assert_eq!(report.source.as_deref(), Some("grouped"));
    assert_eq!(report.backfilled, vec!["mem"]);
    let payload = downcast_value::<Value>(&result).unwrap();
    assert_eq!(payload["from"], "full");
}
