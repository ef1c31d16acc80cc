//! Transformers convert a value of one data type into another.
//!
//! One transformer may cover several conversions. Each conversion carries a
//! cost (default 1) that the pipeline's type graph uses to pick the cheapest
//! chain when no backend provides the requested type directly.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::debug;

use crate::context::PipelineContext;
use crate::error::{HandlerError, PipelineError};
use crate::registry::CapabilityRegistry;
use crate::types::{PipelineValue, TypePair};

/// A single supported conversion and its relative cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    pub pair: TypePair,
    pub cost: u32,
}

impl Conversion {
    pub fn new(pair: TypePair) -> Self {
        Conversion { pair, cost: 1 }
    }

    pub fn with_cost(pair: TypePair, cost: u32) -> Self {
        Conversion { pair, cost }
    }
}

#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    /// Conversions this transformer supports.
    fn conversions(&self) -> Vec<Conversion>;

    fn can_transform(&self, pair: &TypePair) -> bool {
        self.conversions().iter().any(|c| &c.pair == pair)
    }

    async fn transform(
        &self,
        pair: &TypePair,
        value: PipelineValue,
        ctx: Arc<PipelineContext>,
    ) -> Result<PipelineValue, PipelineError>;
}

pub type TransformHandler = Box<
    dyn Fn(PipelineValue, Arc<PipelineContext>) -> BoxFuture<'static, Result<PipelineValue, HandlerError>>
        + Send
        + Sync,
>;

struct Entry {
    cost: u32,
    handler: TransformHandler,
}

/// A [`Transformer`] assembled from per-pair handler closures.
pub struct RegistryTransformer {
    name: String,
    conversions: CapabilityRegistry<TypePair, Entry>,
}

impl RegistryTransformer {
    pub fn builder(name: impl Into<String>) -> RegistryTransformerBuilder {
        RegistryTransformerBuilder {
            name: name.into(),
            conversions: Vec::new(),
        }
    }
}

#[async_trait]
impl Transformer for RegistryTransformer {
    fn name(&self) -> &str {
        &self.name
    }

    fn conversions(&self) -> Vec<Conversion> {
        let mut out: Vec<Conversion> = self
            .conversions
            .iter()
            .map(|(pair, entry)| Conversion::with_cost(pair.clone(), entry.cost))
            .collect();
        out.sort_by(|a, b| a.pair.to_string().cmp(&b.pair.to_string()));
        out
    }

    fn can_transform(&self, pair: &TypePair) -> bool {
        self.conversions.supports(pair)
    }

    async fn transform(
        &self,
        pair: &TypePair,
        value: PipelineValue,
        ctx: Arc<PipelineContext>,
    ) -> Result<PipelineValue, PipelineError> {
        let entry = self.conversions.resolve(pair)?;
        debug!(transformer = %self.name, conversion = %pair, "invoking transform handler");
        (entry.handler)(value, ctx).await.map_err(|err| {
            let source = match err {
                // Transformers have nothing to look up; a miss is a fault.
                HandlerError::NotFound => anyhow::anyhow!("transform handler reported not-found"),
                HandlerError::Failed(source) => source,
            };
            PipelineError::transform_failed(
                &self.name,
                pair.from.clone(),
                pair.to.clone(),
                source,
            )
        })
    }
}

pub struct RegistryTransformerBuilder {
    name: String,
    conversions: Vec<(TypePair, Entry)>,
}

impl RegistryTransformerBuilder {
    pub fn convert<F, Fut>(
        self,
        from: impl Into<crate::types::TypeKey>,
        to: impl Into<crate::types::TypeKey>,
        handler: F,
    ) -> Self
    where
        F: Fn(PipelineValue, Arc<PipelineContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PipelineValue, HandlerError>> + Send + 'static,
    {
        self.convert_with_cost(from, to, 1, handler)
    }

    pub fn convert_with_cost<F, Fut>(
        mut self,
        from: impl Into<crate::types::TypeKey>,
        to: impl Into<crate::types::TypeKey>,
        cost: u32,
        handler: F,
    ) -> Self
    where
        F: Fn(PipelineValue, Arc<PipelineContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PipelineValue, HandlerError>> + Send + 'static,
    {
        let handler: TransformHandler = Box::new(move |value, ctx| Box::pin(handler(value, ctx)));
        self.conversions
            .push((TypePair::new(from, to), Entry { cost, handler }));
        self
    }

    pub fn build(self) -> Result<RegistryTransformer, PipelineError> {
        let mut conversions = CapabilityRegistry::new(self.name.clone());
        for (pair, entry) in self.conversions {
            conversions.register(pair, entry)?;
        }
        Ok(RegistryTransformer {
            name: self.name,
            conversions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{downcast_value, value, TypeKey};

    fn ctx() -> Arc<PipelineContext> {
        Arc::new(PipelineContext::new())
    }

    #[tokio::test]
    async fn test_convert_dispatch() {
        let transformer = RegistryTransformer::builder("doc-converter")
            .convert("WordDoc", "PDF", |input, _ctx| async move {
                let text = downcast_value::<String>(&input)
                    .ok_or_else(|| HandlerError::failed(anyhow::anyhow!("expected String")))?;
                Ok(value(format!("pdf({})", text)))
            })
            .build()
            .unwrap();

        let pair = TypePair::new("WordDoc", "PDF");
        assert!(transformer.can_transform(&pair));
        assert!(!transformer.can_transform(&TypePair::new("PDF", "WordDoc")));

        let out = transformer
            .transform(&pair, value("hello".to_string()), ctx())
            .await
            .unwrap();
        assert_eq!(downcast_value::<String>(&out).unwrap(), "pdf(hello)");
    }

    #[tokio::test]
    async fn test_failure_names_conversion() {
        let transformer = RegistryTransformer::builder("doc-converter")
            .convert("WordDoc", "PDF", |_input, _ctx| async move {
                Err::<PipelineValue, _>(HandlerError::failed(anyhow::anyhow!("corrupt input")))
            })
            .build()
            .unwrap();

        let err = transformer
            .transform(&TypePair::new("WordDoc", "PDF"), value(()), ctx())
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("WordDoc"));
        assert!(msg.contains("PDF"));
    }

    #[test]
    fn test_conversions_report_cost() {
        let transformer = RegistryTransformer::builder("doc-converter")
            .convert_with_cost("WordDoc", "PDF", 3, |input, _ctx| async move { Ok(input) })
            .convert("PDF", "Text", |input, _ctx| async move { Ok(input) })
            .build()
            .unwrap();

        let conversions = transformer.conversions();
        assert_eq!(conversions.len(), 2);
        let word_to_pdf = conversions
            .iter()
            .find(|c| c.pair == TypePair::new("WordDoc", "PDF"))
            .unwrap();
        assert_eq!(word_to_pdf.cost, 3);
        let pdf_to_text = conversions
            .iter()
            .find(|c| c.pair == TypePair::new("PDF", "Text"))
            .unwrap();
        assert_eq!(pdf_to_text.cost, 1);
    }

    #[test]
    fn test_duplicate_conversion_fails_at_build() {
        let result = RegistryTransformer::builder("doc-converter")
            .convert("WordDoc", "PDF", |input, _ctx| async move { Ok(input) })
            .convert("WordDoc", "PDF", |input, _ctx| async move { Ok(input) })
            .build();
        assert!(matches!(
            result,
            Err(PipelineError::DuplicateCapability { .. })
        ));
    }
}
