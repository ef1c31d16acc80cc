//! Typed data-access orchestration.
//!
//! A [`Pipeline`] arranges backends (caches, databases, APIs) in priority
//! order. A `get` walks the tiers until one supplies the requested type,
//! then backfills the cheaper tiers that were passed over so later lookups
//! land earlier. When no tier can supply the type directly, registered
//! [`Transformer`]s are searched for the cheapest conversion chain from a
//! type the tiers can supply.
//!
//! ```ignore
//! use std::time::Duration;
//! use strata::{MemoryStore, Pipeline, Query, RegistryBackend, value};
//!
//! let pipeline = Pipeline::builder()
//!     .backend(MemoryStore::new("cache", ["WordDoc"]).with_ttl(Duration::from_secs(300)))
//!     .backend(
//!         RegistryBackend::builder("api")
//!             .get("WordDoc", |query, _ctx| async move {
//!                 Ok(value(fetch_doc(&query).await?))
//!             })
//!             .build()?,
//!     )
//!     .build()?;
//!
//! // The first call hits the API and backfills the cache; the second is
//! // served from the cache.
//! let doc = pipeline.get("WordDoc", Query::new().with("filename", "report")).await?;
//! ```

pub mod backend;
pub mod composite;
pub mod context;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod pipeline;
pub mod query;
pub mod registry;
pub mod stores;
pub mod transform;
pub mod types;

pub use backend::{Backend, RegistryBackend, RegistryBackendBuilder};
pub use composite::CompositeBackend;
pub use context::{PipelineContext, EXPIRES};
pub use error::{HandlerError, PipelineError};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{GetReport, Pipeline, PipelineBuilder, PutReport};
pub use query::{Kind, QueryValidationError, QueryValidator};
pub use stores::{FsStore, MemoryStore};
pub use transform::{Conversion, RegistryTransformer, RegistryTransformerBuilder, Transformer};
pub use types::{downcast_value, value, PipelineValue, Query, TypeKey, TypePair};
