//! Backend interface and the registry-backed implementation.
//!
//! A backend is one tier of the pipeline: a source (get), a sink (put), or
//! a store (both). External collaborators either implement [`Backend`]
//! directly or assemble a [`RegistryBackend`] from per-type async handler
//! closures.
//!
//! # Example
//!
//! ```ignore
//! use strata::{HandlerError, RegistryBackend, value};
//!
//! let api = RegistryBackend::builder("rest-api")
//!     .get("WordDoc", |query, _ctx| async move {
//!         match query.get("filename") {
//!             Some(name) => Ok(value(format!("doc:{}", name))),
//!             None => Err(HandlerError::NotFound),
//!         }
//!     })
//!     .build()?;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::debug;

use crate::context::PipelineContext;
use crate::error::{HandlerError, PipelineError};
use crate::query::QueryValidator;
use crate::registry::CapabilityRegistry;
use crate::types::{PipelineValue, Query, TypeKey};

/// A unit that can retrieve (source role) and/or store (sink role) data of
/// specific types. A backend with no handler for a type is transparent for
/// that type: the pipeline skips it rather than treating it as an error.
///
/// A tier that serves every type regardless of registration (a blanket
/// cache, a write-through audit sink) either uses the wildcard handlers of
/// [`RegistryBackendBuilder::get_any`] / [`RegistryBackendBuilder::put_any`]
/// or implements this trait directly and overrides `can_get`/`can_put`.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Types this backend can retrieve.
    fn provides(&self) -> Vec<TypeKey>;

    /// Types this backend can store.
    fn accepts(&self) -> Vec<TypeKey>;

    /// Types retrievable in batch form. Batch retrieval is opt-in; there is
    /// no sound way to synthesize it from single gets.
    fn provides_many(&self) -> Vec<TypeKey> {
        Vec::new()
    }

    /// Types storable in batch form. Defaults to [`Backend::accepts`]
    /// because the default `put_many` stores item by item.
    fn accepts_many(&self) -> Vec<TypeKey> {
        self.accepts()
    }

    fn can_get(&self, data_type: &TypeKey) -> bool {
        self.provides().contains(data_type)
    }

    fn can_put(&self, data_type: &TypeKey) -> bool {
        self.accepts().contains(data_type)
    }

    fn can_get_many(&self, data_type: &TypeKey) -> bool {
        self.provides_many().contains(data_type)
    }

    fn can_put_many(&self, data_type: &TypeKey) -> bool {
        self.accepts_many().contains(data_type)
    }

    async fn get(
        &self,
        data_type: &TypeKey,
        query: Query,
        ctx: Arc<PipelineContext>,
    ) -> Result<PipelineValue, PipelineError>;

    async fn put(
        &self,
        data_type: &TypeKey,
        value: PipelineValue,
        query: Query,
        ctx: Arc<PipelineContext>,
    ) -> Result<(), PipelineError>;

    async fn get_many(
        &self,
        data_type: &TypeKey,
        _query: Query,
        _ctx: Arc<PipelineContext>,
    ) -> Result<Vec<PipelineValue>, PipelineError> {
        Err(PipelineError::unsupported(self.name(), data_type.clone()))
    }

    async fn put_many(
        &self,
        data_type: &TypeKey,
        values: Vec<PipelineValue>,
        query: Query,
        ctx: Arc<PipelineContext>,
    ) -> Result<(), PipelineError> {
        for value in values {
            self.put(data_type, value, query.clone(), ctx.clone()).await?;
        }
        Ok(())
    }
}

pub type GetHandler = Box<
    dyn Fn(Query, Arc<PipelineContext>) -> BoxFuture<'static, Result<PipelineValue, HandlerError>>
        + Send
        + Sync,
>;

pub type GetManyHandler = Box<
    dyn Fn(
            Query,
            Arc<PipelineContext>,
        ) -> BoxFuture<'static, Result<Vec<PipelineValue>, HandlerError>>
        + Send
        + Sync,
>;

pub type PutHandler = Box<
    dyn Fn(
            PipelineValue,
            Query,
            Arc<PipelineContext>,
        ) -> BoxFuture<'static, Result<(), HandlerError>>
        + Send
        + Sync,
>;

pub type PutManyHandler = Box<
    dyn Fn(
            Vec<PipelineValue>,
            Query,
            Arc<PipelineContext>,
        ) -> BoxFuture<'static, Result<(), HandlerError>>
        + Send
        + Sync,
>;

struct Entry<H> {
    validator: Option<QueryValidator>,
    handler: H,
}

impl<H> Entry<H> {
    fn validate(
        &self,
        backend: &str,
        data_type: &TypeKey,
        query: &mut Query,
    ) -> Result<(), PipelineError> {
        if let Some(validator) = &self.validator {
            validator
                .validate(query)
                .map_err(|source| PipelineError::InvalidQuery {
                    backend: backend.to_string(),
                    data_type: data_type.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// A [`Backend`] assembled from per-type handler closures.
///
/// Besides per-type handlers, one wildcard get and one wildcard put handler
/// may be registered; they answer for every type without a dedicated
/// handler. Wildcard coverage does not appear in `provides`/`accepts`
/// (there is nothing to enumerate), only in `can_get`/`can_put`.
pub struct RegistryBackend {
    name: String,
    gets: CapabilityRegistry<TypeKey, Entry<GetHandler>>,
    get_manys: CapabilityRegistry<TypeKey, Entry<GetManyHandler>>,
    puts: CapabilityRegistry<TypeKey, Entry<PutHandler>>,
    put_manys: CapabilityRegistry<TypeKey, Entry<PutManyHandler>>,
    any_get: Option<Entry<GetHandler>>,
    any_put: Option<Entry<PutHandler>>,
}

impl RegistryBackend {
    pub fn builder(name: impl Into<String>) -> RegistryBackendBuilder {
        RegistryBackendBuilder {
            name: name.into(),
            gets: Vec::new(),
            get_manys: Vec::new(),
            puts: Vec::new(),
            put_manys: Vec::new(),
            any_gets: Vec::new(),
            any_puts: Vec::new(),
        }
    }

    fn map_get_err(&self, data_type: &TypeKey, err: HandlerError) -> PipelineError {
        match err {
            HandlerError::NotFound => PipelineError::not_found(data_type.clone()),
            HandlerError::Failed(source) => {
                PipelineError::get_failed(&self.name, data_type.clone(), source)
            }
        }
    }

    fn map_put_err(&self, data_type: &TypeKey, err: HandlerError) -> PipelineError {
        match err {
            // A sink has nothing to look up; treat a "miss" as a fault.
            HandlerError::NotFound => PipelineError::put_failed(
                &self.name,
                data_type.clone(),
                anyhow::anyhow!("put handler reported not-found"),
            ),
            HandlerError::Failed(source) => {
                PipelineError::put_failed(&self.name, data_type.clone(), source)
            }
        }
    }
}

#[async_trait]
impl Backend for RegistryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn provides(&self) -> Vec<TypeKey> {
        self.gets.keys().cloned().collect()
    }

    fn accepts(&self) -> Vec<TypeKey> {
        self.puts.keys().cloned().collect()
    }

    fn provides_many(&self) -> Vec<TypeKey> {
        self.get_manys.keys().cloned().collect()
    }

    fn accepts_many(&self) -> Vec<TypeKey> {
        if self.put_manys.is_empty() {
            self.accepts()
        } else {
            self.put_manys.keys().cloned().collect()
        }
    }

    fn can_get(&self, data_type: &TypeKey) -> bool {
        self.gets.supports(data_type) || self.any_get.is_some()
    }

    fn can_put(&self, data_type: &TypeKey) -> bool {
        self.puts.supports(data_type) || self.any_put.is_some()
    }

    fn can_get_many(&self, data_type: &TypeKey) -> bool {
        self.get_manys.supports(data_type)
    }

    fn can_put_many(&self, data_type: &TypeKey) -> bool {
        self.put_manys.supports(data_type) || self.can_put(data_type)
    }

    async fn get(
        &self,
        data_type: &TypeKey,
        mut query: Query,
        ctx: Arc<PipelineContext>,
    ) -> Result<PipelineValue, PipelineError> {
        let entry = match self.gets.resolve(data_type) {
            Ok(entry) => entry,
            Err(err) => self.any_get.as_ref().ok_or(err)?,
        };
        entry.validate(&self.name, data_type, &mut query)?;
        debug!(backend = %self.name, data_type = %data_type, query = %query, "invoking get handler");
        (entry.handler)(query, ctx)
            .await
            .map_err(|err| self.map_get_err(data_type, err))
    }

    async fn put(
        &self,
        data_type: &TypeKey,
        value: PipelineValue,
        mut query: Query,
        ctx: Arc<PipelineContext>,
    ) -> Result<(), PipelineError> {
        let entry = match self.puts.resolve(data_type) {
            Ok(entry) => entry,
            Err(err) => self.any_put.as_ref().ok_or(err)?,
        };
        entry.validate(&self.name, data_type, &mut query)?;
        debug!(backend = %self.name, data_type = %data_type, query = %query, "invoking put handler");
        (entry.handler)(value, query, ctx)
            .await
            .map_err(|err| self.map_put_err(data_type, err))
    }

    async fn get_many(
        &self,
        data_type: &TypeKey,
        mut query: Query,
        ctx: Arc<PipelineContext>,
    ) -> Result<Vec<PipelineValue>, PipelineError> {
        let entry = self.get_manys.resolve(data_type)?;
        entry.validate(&self.name, data_type, &mut query)?;
        (entry.handler)(query, ctx)
            .await
            .map_err(|err| self.map_get_err(data_type, err))
    }

    async fn put_many(
        &self,
        data_type: &TypeKey,
        values: Vec<PipelineValue>,
        mut query: Query,
        ctx: Arc<PipelineContext>,
    ) -> Result<(), PipelineError> {
        // Fall back to item-by-item puts when no batch handler is registered.
        let entry = match self.put_manys.resolve(data_type) {
            Ok(entry) => entry,
            Err(_) if self.can_put(data_type) => {
                for value in values {
                    self.put(data_type, value, query.clone(), ctx.clone()).await?;
                }
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        entry.validate(&self.name, data_type, &mut query)?;
        (entry.handler)(values, query, ctx)
            .await
            .map_err(|err| self.map_put_err(data_type, err))
    }
}

/// Builder collecting registrations; duplicates fail once, loudly, at
/// [`RegistryBackendBuilder::build`].
pub struct RegistryBackendBuilder {
    name: String,
    gets: Vec<(TypeKey, Entry<GetHandler>)>,
    get_manys: Vec<(TypeKey, Entry<GetManyHandler>)>,
    puts: Vec<(TypeKey, Entry<PutHandler>)>,
    put_manys: Vec<(TypeKey, Entry<PutManyHandler>)>,
    any_gets: Vec<Entry<GetHandler>>,
    any_puts: Vec<Entry<PutHandler>>,
}

impl RegistryBackendBuilder {
    pub fn get<F, Fut>(self, data_type: impl Into<TypeKey>, handler: F) -> Self
    where
        F: Fn(Query, Arc<PipelineContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PipelineValue, HandlerError>> + Send + 'static,
    {
        self.get_entry(data_type, None, handler)
    }

    /// Register a get handler whose query is validated (and defaulted) on
    /// the backend's own clone before invocation.
    pub fn get_validated<F, Fut>(
        self,
        data_type: impl Into<TypeKey>,
        validator: QueryValidator,
        handler: F,
    ) -> Self
    where
        F: Fn(Query, Arc<PipelineContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PipelineValue, HandlerError>> + Send + 'static,
    {
        self.get_entry(data_type, Some(validator), handler)
    }

    fn get_entry<F, Fut>(
        mut self,
        data_type: impl Into<TypeKey>,
        validator: Option<QueryValidator>,
        handler: F,
    ) -> Self
    where
        F: Fn(Query, Arc<PipelineContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PipelineValue, HandlerError>> + Send + 'static,
    {
        let handler: GetHandler = Box::new(move |query, ctx| Box::pin(handler(query, ctx)));
        self.gets.push((data_type.into(), Entry { validator, handler }));
        self
    }

    pub fn get_many<F, Fut>(mut self, data_type: impl Into<TypeKey>, handler: F) -> Self
    where
        F: Fn(Query, Arc<PipelineContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<PipelineValue>, HandlerError>> + Send + 'static,
    {
        let handler: GetManyHandler = Box::new(move |query, ctx| Box::pin(handler(query, ctx)));
        self.get_manys.push((
            data_type.into(),
            Entry {
                validator: None,
                handler,
            },
        ));
        self
    }

    pub fn put<F, Fut>(self, data_type: impl Into<TypeKey>, handler: F) -> Self
    where
        F: Fn(PipelineValue, Query, Arc<PipelineContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.put_entry(data_type, None, handler)
    }

    pub fn put_validated<F, Fut>(
        self,
        data_type: impl Into<TypeKey>,
        validator: QueryValidator,
        handler: F,
    ) -> Self
    where
        F: Fn(PipelineValue, Query, Arc<PipelineContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.put_entry(data_type, Some(validator), handler)
    }

    fn put_entry<F, Fut>(
        mut self,
        data_type: impl Into<TypeKey>,
        validator: Option<QueryValidator>,
        handler: F,
    ) -> Self
    where
        F: Fn(PipelineValue, Query, Arc<PipelineContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler: PutHandler =
            Box::new(move |value, query, ctx| Box::pin(handler(value, query, ctx)));
        self.puts.push((data_type.into(), Entry { validator, handler }));
        self
    }

    /// Register a get handler answering for every type without a dedicated
    /// handler. At most one wildcard get per backend.
    pub fn get_any<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Query, Arc<PipelineContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PipelineValue, HandlerError>> + Send + 'static,
    {
        let handler: GetHandler = Box::new(move |query, ctx| Box::pin(handler(query, ctx)));
        self.any_gets.push(Entry {
            validator: None,
            handler,
        });
        self
    }

    /// Register a put handler accepting every type without a dedicated
    /// handler. At most one wildcard put per backend.
    pub fn put_any<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(PipelineValue, Query, Arc<PipelineContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler: PutHandler =
            Box::new(move |value, query, ctx| Box::pin(handler(value, query, ctx)));
        self.any_puts.push(Entry {
            validator: None,
            handler,
        });
        self
    }

    pub fn put_many<F, Fut>(mut self, data_type: impl Into<TypeKey>, handler: F) -> Self
    where
        F: Fn(Vec<PipelineValue>, Query, Arc<PipelineContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler: PutManyHandler =
            Box::new(move |values, query, ctx| Box::pin(handler(values, query, ctx)));
        self.put_manys.push((
            data_type.into(),
            Entry {
                validator: None,
                handler,
            },
        ));
        self
    }

    pub fn build(self) -> Result<RegistryBackend, PipelineError> {
        let mut gets = CapabilityRegistry::new(self.name.clone());
        for (key, entry) in self.gets {
            gets.register(key, entry)?;
        }
        let mut get_manys = CapabilityRegistry::new(self.name.clone());
        for (key, entry) in self.get_manys {
            get_manys.register(key, entry)?;
        }
        let mut puts = CapabilityRegistry::new(self.name.clone());
        for (key, entry) in self.puts {
            puts.register(key, entry)?;
        }
        let mut put_manys = CapabilityRegistry::new(self.name.clone());
        for (key, entry) in self.put_manys {
            put_manys.register(key, entry)?;
        }
        if self.any_gets.len() > 1 {
            return Err(PipelineError::duplicate(&self.name, "* (get)"));
        }
        if self.any_puts.len() > 1 {
            return Err(PipelineError::duplicate(&self.name, "* (put)"));
        }
        let mut any_gets = self.any_gets;
        let mut any_puts = self.any_puts;
        Ok(RegistryBackend {
            name: self.name,
            gets,
            get_manys,
            puts,
            put_manys,
            any_get: any_gets.pop(),
            any_put: any_puts.pop(),
        })
    }
}
