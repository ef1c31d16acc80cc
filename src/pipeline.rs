//! The traversal and propagation core.
//!
//! A pipeline owns an ordered list of backends (order encodes priority:
//! cheap tiers first) and a set of transformers. `get` walks the backends in
//! order, stops at the first hit, and backfills the tiers that were passed
//! over so the next lookup lands earlier. When no backend supplies the
//! requested type directly, the transformer graph is consulted for the
//! cheapest conversion chain from a type the backends can supply.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::graph::{Chain, TypeGraph};
use crate::metrics::PipelineMetrics;
use crate::transform::Transformer;
use crate::types::{PipelineValue, Query, TypeKey};

/// How a `get` was satisfied and what the backfill walk did.
#[derive(Debug, Default)]
pub struct GetReport {
    /// Name of the backend that supplied the value. `None` when the value
    /// was produced by a transformer chain.
    pub source: Option<String>,
    pub source_index: Option<usize>,
    pub via_transform: bool,
    /// Backends that received a backfill put, in the order attempted.
    pub backfilled: Vec<String>,
    /// Backfill attempts that failed. Never fails the `get` itself.
    pub backfill_failures: Vec<(String, PipelineError)>,
}

impl GetReport {
    pub fn backfill_clean(&self) -> bool {
        self.backfill_failures.is_empty()
    }
}

/// Per-backend outcomes of a `put` fan-out.
#[derive(Debug, Default)]
pub struct PutReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, PipelineError)>,
}

impl PutReport {
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Pipeline {
    backends: Vec<Arc<dyn Backend>>,
    transformers: Vec<Arc<dyn Transformer>>,
    graph: TypeGraph,
    backend_timeout: Option<Duration>,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder {
            backends: Vec::new(),
            transformers: Vec::new(),
            backend_timeout: None,
        }
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Retrieve a value of `data_type`, backfilling earlier tiers on a hit.
    pub async fn get(
        &self,
        data_type: impl Into<TypeKey>,
        query: Query,
    ) -> Result<PipelineValue, PipelineError> {
        let ctx = Arc::new(PipelineContext::new());
        self.get_full(data_type, query, ctx).await.map(|(value, _)| value)
    }

    /// Retrieve a value and downcast its payload.
    pub async fn get_as<T: std::any::Any + Send + Sync>(
        &self,
        data_type: impl Into<TypeKey>,
        query: Query,
    ) -> Result<Arc<T>, PipelineError> {
        let data_type = data_type.into();
        let value = self.get(data_type.clone(), query).await?;
        value.downcast::<T>().map_err(|_| {
            PipelineError::get_failed(
                "pipeline",
                data_type,
                anyhow::anyhow!("payload is not the requested Rust type"),
            )
        })
    }

    /// Full form: explicit context plus a traversal report.
    pub async fn get_full(
        &self,
        data_type: impl Into<TypeKey>,
        query: Query,
        ctx: Arc<PipelineContext>,
    ) -> Result<(PipelineValue, GetReport), PipelineError> {
        let data_type = data_type.into();
        self.metrics.record_get();
        let mut visited = HashSet::new();
        let result = self.get_inner(data_type, query, ctx, &mut visited).await;
        match &result {
            Ok(_) => self.metrics.record_hit(),
            Err(err) if err.is_not_found() => self.metrics.record_miss(),
            Err(_) => self.metrics.record_error(),
        }
        result
    }

    fn get_inner<'a>(
        &'a self,
        data_type: TypeKey,
        query: Query,
        ctx: Arc<PipelineContext>,
        visited: &'a mut HashSet<TypeKey>,
    ) -> BoxFuture<'a, Result<(PipelineValue, GetReport), PipelineError>> {
        Box::pin(async move {
            visited.insert(data_type.clone());

            let mut hit: Option<(PipelineValue, usize)> = None;
            for (index, backend) in self.backends.iter().enumerate() {
                if !backend.can_get(&data_type) {
                    debug!(backend = backend.name(), data_type = %data_type, "skip: type not provided");
                    continue;
                }
                match self
                    .bounded_get(backend.as_ref(), &data_type, query.clone(), ctx.clone())
                    .await
                {
                    Ok(value) => {
                        debug!(backend = backend.name(), data_type = %data_type, "hit");
                        hit = Some((value, index));
                        break;
                    }
                    Err(err) if err.is_not_found() => {
                        debug!(backend = backend.name(), data_type = %data_type, "miss");
                    }
                    Err(err) => return Err(err),
                }
            }

            if let Some((value, source_index)) = hit {
                let mut report = GetReport {
                    source: Some(self.backends[source_index].name().to_string()),
                    source_index: Some(source_index),
                    via_transform: false,
                    ..GetReport::default()
                };
                self.backfill(&data_type, &value, &query, &ctx, 0..source_index, &mut report)
                    .await;
                return Ok((value, report));
            }

            self.resolve_via_transform(data_type, query, ctx, visited).await
        })
    }

    /// Try conversion chains, cheapest first, retrieving the chain's source
    /// type through the full recursive algorithm.
    async fn resolve_via_transform(
        &self,
        data_type: TypeKey,
        query: Query,
        ctx: Arc<PipelineContext>,
        visited: &mut HashSet<TypeKey>,
    ) -> Result<(PipelineValue, GetReport), PipelineError> {
        for chain in self.graph.chains_to(&data_type) {
            if visited.contains(&chain.source) {
                continue;
            }
            if !self.backends.iter().any(|b| b.can_get(&chain.source)) {
                continue;
            }
            debug!(
                data_type = %data_type,
                source = %chain.source,
                cost = chain.cost,
                "attempting conversion chain"
            );
            let source_value = match self
                .get_inner(chain.source.clone(), query.clone(), ctx.clone(), &mut *visited)
                .await
            {
                Ok((value, _)) => value,
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            };

            let value = self.apply_chain(&chain, source_value, &ctx).await?;

            // None of the tiers supplied the final type natively, so every
            // backend accepting it is offered the converted value.
            let mut report = GetReport {
                via_transform: true,
                ..GetReport::default()
            };
            self.backfill(&data_type, &value, &query, &ctx, 0..self.backends.len(), &mut report)
                .await;
            return Ok((value, report));
        }
        Err(PipelineError::not_found(data_type))
    }

    async fn apply_chain(
        &self,
        chain: &Chain,
        mut value: PipelineValue,
        ctx: &Arc<PipelineContext>,
    ) -> Result<PipelineValue, PipelineError> {
        for step in &chain.steps {
            let transformer = &self.transformers[step.transformer];
            debug!(transformer = transformer.name(), conversion = %step.pair, "applying conversion");
            value = transformer
                .transform(&step.pair, value, ctx.clone())
                .await?;
            self.metrics.record_transform();
        }
        Ok(value)
    }

    async fn bounded_get(
        &self,
        backend: &dyn Backend,
        data_type: &TypeKey,
        query: Query,
        ctx: Arc<PipelineContext>,
    ) -> Result<PipelineValue, PipelineError> {
        match self.backend_timeout {
            None => backend.get(data_type, query, ctx).await,
            Some(limit) => {
                match tokio::time::timeout(limit, backend.get(data_type, query, ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        // Timeout counts as a miss so traversal moves on.
                        warn!(
                            backend = backend.name(),
                            data_type = %data_type,
                            timeout_ms = limit.as_millis() as u64,
                            "backend get timed out"
                        );
                        self.metrics.record_timeout();
                        Err(PipelineError::not_found(data_type.clone()))
                    }
                }
            }
        }
    }

    async fn bounded_get_many(
        &self,
        backend: &dyn Backend,
        data_type: &TypeKey,
        query: Query,
        ctx: Arc<PipelineContext>,
    ) -> Result<Vec<PipelineValue>, PipelineError> {
        match self.backend_timeout {
            None => backend.get_many(data_type, query, ctx).await,
            Some(limit) => {
                match tokio::time::timeout(limit, backend.get_many(data_type, query, ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            backend = backend.name(),
                            data_type = %data_type,
                            timeout_ms = limit.as_millis() as u64,
                            "backend batch get timed out"
                        );
                        self.metrics.record_timeout();
                        Err(PipelineError::not_found(data_type.clone()))
                    }
                }
            }
        }
    }

    async fn backfill(
        &self,
        data_type: &TypeKey,
        value: &PipelineValue,
        query: &Query,
        ctx: &Arc<PipelineContext>,
        indices: std::ops::Range<usize>,
        report: &mut GetReport,
    ) {
        for index in indices {
            let backend = &self.backends[index];
            if report.source_index == Some(index) || !backend.can_put(data_type) {
                continue;
            }
            match backend
                .put(data_type, value.clone(), query.clone(), ctx.clone())
                .await
            {
                Ok(()) => {
                    debug!(backend = backend.name(), data_type = %data_type, "backfilled");
                    self.metrics.record_backfill();
                    report.backfilled.push(backend.name().to_string());
                }
                Err(err) => {
                    warn!(
                        backend = backend.name(),
                        data_type = %data_type,
                        error = %err,
                        "backfill put failed"
                    );
                    self.metrics.record_backfill_failure();
                    report.backfill_failures.push((backend.name().to_string(), err));
                }
            }
        }
    }

    /// Store a value in every backend accepting the type. Zero accepting
    /// backends is a silent no-op.
    pub async fn put(
        &self,
        data_type: impl Into<TypeKey>,
        value: PipelineValue,
        query: Query,
    ) -> PutReport {
        let ctx = Arc::new(PipelineContext::new());
        self.put_full(data_type, value, query, ctx).await
    }

    pub async fn put_full(
        &self,
        data_type: impl Into<TypeKey>,
        value: PipelineValue,
        query: Query,
        ctx: Arc<PipelineContext>,
    ) -> PutReport {
        let data_type = data_type.into();
        let mut report = PutReport::default();
        for backend in &self.backends {
            if !backend.can_put(&data_type) {
                continue;
            }
            self.metrics.record_put();
            match backend
                .put(&data_type, value.clone(), query.clone(), ctx.clone())
                .await
            {
                Ok(()) => report.succeeded.push(backend.name().to_string()),
                Err(err) => {
                    warn!(backend = backend.name(), data_type = %data_type, error = %err, "put failed");
                    self.metrics.record_error();
                    report.failed.push((backend.name().to_string(), err));
                }
            }
        }
        report
    }

    /// Batch mirror of `get`. Backfill uses the batch put form.
    pub async fn get_many(
        &self,
        data_type: impl Into<TypeKey>,
        query: Query,
    ) -> Result<Vec<PipelineValue>, PipelineError> {
        let ctx = Arc::new(PipelineContext::new());
        self.metrics.record_get();
        let mut visited = HashSet::new();
        let result = self
            .get_many_inner(data_type.into(), query, ctx, &mut visited)
            .await;
        match &result {
            Ok(_) => self.metrics.record_hit(),
            Err(err) if err.is_not_found() => self.metrics.record_miss(),
            Err(_) => self.metrics.record_error(),
        }
        result
    }

    fn get_many_inner<'a>(
        &'a self,
        data_type: TypeKey,
        query: Query,
        ctx: Arc<PipelineContext>,
        visited: &'a mut HashSet<TypeKey>,
    ) -> BoxFuture<'a, Result<Vec<PipelineValue>, PipelineError>> {
        Box::pin(async move {
            visited.insert(data_type.clone());

            let mut hit: Option<(Vec<PipelineValue>, usize)> = None;
            for (index, backend) in self.backends.iter().enumerate() {
                if !backend.can_get_many(&data_type) {
                    continue;
                }
                match self
                    .bounded_get_many(backend.as_ref(), &data_type, query.clone(), ctx.clone())
                    .await
                {
                    Ok(values) => {
                        hit = Some((values, index));
                        break;
                    }
                    Err(err) if err.is_not_found() => {
                        debug!(backend = backend.name(), data_type = %data_type, "batch miss");
                    }
                    Err(err) => return Err(err),
                }
            }

            if let Some((values, source_index)) = hit {
                self.backfill_many(&data_type, &values, &query, &ctx, 0..source_index)
                    .await;
                return Ok(values);
            }

            // Element-wise conversion from a batch-capable source type.
            for chain in self.graph.chains_to(&data_type) {
                if visited.contains(&chain.source) {
                    continue;
                }
                if !self.backends.iter().any(|b| b.can_get_many(&chain.source)) {
                    continue;
                }
                let source_values = match self
                    .get_many_inner(chain.source.clone(), query.clone(), ctx.clone(), &mut *visited)
                    .await
                {
                    Ok(values) => values,
                    Err(err) if err.is_not_found() => continue,
                    Err(err) => return Err(err),
                };
                let mut converted = Vec::with_capacity(source_values.len());
                for value in source_values {
                    converted.push(self.apply_chain(&chain, value, &ctx).await?);
                }
                self.backfill_many(&data_type, &converted, &query, &ctx, 0..self.backends.len())
                    .await;
                return Ok(converted);
            }

            Err(PipelineError::not_found(data_type))
        })
    }

    async fn backfill_many(
        &self,
        data_type: &TypeKey,
        values: &[PipelineValue],
        query: &Query,
        ctx: &Arc<PipelineContext>,
        indices: std::ops::Range<usize>,
    ) {
        for index in indices {
            let backend = &self.backends[index];
            if !backend.can_put_many(data_type) {
                continue;
            }
            if let Err(err) = backend
                .put_many(data_type, values.to_vec(), query.clone(), ctx.clone())
                .await
            {
                warn!(
                    backend = backend.name(),
                    data_type = %data_type,
                    error = %err,
                    "batch backfill failed"
                );
                self.metrics.record_backfill_failure();
            } else {
                self.metrics.record_backfill();
            }
        }
    }

    /// Batch mirror of `put`.
    pub async fn put_many(
        &self,
        data_type: impl Into<TypeKey>,
        values: Vec<PipelineValue>,
        query: Query,
    ) -> PutReport {
        let data_type = data_type.into();
        let ctx = Arc::new(PipelineContext::new());
        let mut report = PutReport::default();
        for backend in &self.backends {
            if !backend.can_put_many(&data_type) {
                continue;
            }
            self.metrics.record_put();
            match backend
                .put_many(&data_type, values.clone(), query.clone(), ctx.clone())
                .await
            {
                Ok(()) => report.succeeded.push(backend.name().to_string()),
                Err(err) => {
                    warn!(backend = backend.name(), data_type = %data_type, error = %err, "batch put failed");
                    self.metrics.record_error();
                    report.failed.push((backend.name().to_string(), err));
                }
            }
        }
        report
    }

    /// Apply the cheapest conversion chain from `from` to `to` directly.
    pub async fn transform(
        &self,
        from: impl Into<TypeKey>,
        to: impl Into<TypeKey>,
        value: PipelineValue,
    ) -> Result<PipelineValue, PipelineError> {
        let from = from.into();
        let to = to.into();
        let chain = self
            .graph
            .chain(&from, &to)
            .ok_or(PipelineError::NoTransformPath { from, to })?;
        let ctx = Arc::new(PipelineContext::new());
        self.apply_chain(&chain, value, &ctx).await
    }

    pub fn can_transform(&self, from: impl Into<TypeKey>, to: impl Into<TypeKey>) -> bool {
        self.graph.chain(&from.into(), &to.into()).is_some()
    }
}

pub struct PipelineBuilder {
    backends: Vec<Arc<dyn Backend>>,
    transformers: Vec<Arc<dyn Transformer>>,
    backend_timeout: Option<Duration>,
}

impl PipelineBuilder {
    pub fn backend(mut self, backend: impl Backend + 'static) -> Self {
        self.backends.push(Arc::new(backend));
        self
    }

    pub fn backend_arc(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn transformer(mut self, transformer: impl Transformer + 'static) -> Self {
        self.transformers.push(Arc::new(transformer));
        self
    }

    pub fn transformer_arc(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    /// Bound every backend `get` by a deadline. A timed-out backend is
    /// treated as a miss.
    pub fn backend_timeout(mut self, limit: Duration) -> Self {
        self.backend_timeout = Some(limit);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        if self.backends.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }
        let graph = TypeGraph::build(&self.transformers);
        Ok(Pipeline {
            backends: self.backends,
            transformers: self.transformers,
            graph,
            backend_timeout: self.backend_timeout,
            metrics: PipelineMetrics::new(),
        })
    }
}
