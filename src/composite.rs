//! A backend that groups several child backends behind one name.
//!
//! Useful for treating an ordered group of tiers as a single pipeline slot.
//! `get` tries the children in order and `put` fans out to every accepting
//! child. Unlike the pipeline itself, a child put failure here is a real
//! error: the composite is an ordinary backend, so the pipeline's
//! best-effort rules apply one level up.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::Backend;
use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::types::{PipelineValue, Query, TypeKey};

pub struct CompositeBackend {
    name: String,
    children: Vec<Arc<dyn Backend>>,
}

impl CompositeBackend {
    pub fn new(name: impl Into<String>, children: Vec<Arc<dyn Backend>>) -> Self {
        CompositeBackend {
            name: name.into(),
            children,
        }
    }

    fn union(&self, per_child: impl Fn(&dyn Backend) -> Vec<TypeKey>) -> Vec<TypeKey> {
        let mut keys = BTreeSet::new();
        for child in &self.children {
            keys.extend(per_child(child.as_ref()));
        }
        keys.into_iter().collect()
    }
}

#[async_trait]
impl Backend for CompositeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn provides(&self) -> Vec<TypeKey> {
        self.union(|child| child.provides())
    }

    fn accepts(&self) -> Vec<TypeKey> {
        self.union(|child| child.accepts())
    }

    fn provides_many(&self) -> Vec<TypeKey> {
        self.union(|child| child.provides_many())
    }

    fn can_get(&self, data_type: &TypeKey) -> bool {
        self.children.iter().any(|c| c.can_get(data_type))
    }

    fn can_put(&self, data_type: &TypeKey) -> bool {
        self.children.iter().any(|c| c.can_put(data_type))
    }

    fn can_get_many(&self, data_type: &TypeKey) -> bool {
        self.children.iter().any(|c| c.can_get_many(data_type))
    }

    fn can_put_many(&self, data_type: &TypeKey) -> bool {
        self.children.iter().any(|c| c.can_put_many(data_type))
    }

    async fn get(
        &self,
        data_type: &TypeKey,
        query: Query,
        ctx: Arc<PipelineContext>,
    ) -> Result<PipelineValue, PipelineError> {
        for child in &self.children {
            if !child.can_get(data_type) {
                continue;
            }
            match child.get(data_type, query.clone(), ctx.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_not_found() => {
                    debug!(composite = %self.name, child = child.name(), data_type = %data_type, "child miss");
                }
                Err(err) => return Err(err),
            }
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
        let mut first_failure = None;
        for child in &self.children {
            if !child.can_put(data_type) {
                continue;
            }
            if let Err(err) = child
                .put(data_type, value.clone(), query.clone(), ctx.clone())
                .await
            {
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn get_many(
        &self,
        data_type: &TypeKey,
        query: Query,
        ctx: Arc<PipelineContext>,
    ) -> Result<Vec<PipelineValue>, PipelineError> {
        for child in &self.children {
            if !child.can_get_many(data_type) {
                continue;
            }
            match child.get_many(data_type, query.clone(), ctx.clone()).await {
                Ok(values) => return Ok(values),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Err(PipelineError::not_found(data_type.clone()))
    }

    async fn put_many(
        &self,
        data_type: &TypeKey,
        values: Vec<PipelineValue>,
        query: Query,
        ctx: Arc<PipelineContext>,
    ) -> Result<(), PipelineError> {
        let mut first_failure = None;
        for child in &self.children {
            if !child.can_put_many(data_type) {
                continue;
            }
            if let Err(err) = child
                .put_many(data_type, values.clone(), query.clone(), ctx.clone())
                .await
            {
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
