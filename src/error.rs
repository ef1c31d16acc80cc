//! Structured error taxonomy for pipeline operations.
//!
//! The one distinction that drives the traversal algorithm: "this backend
//! does not have the data" ([`PipelineError::NotFound`], recoverable, keep
//! walking) versus "this backend broke" (everything else, aborts the
//! operation so real faults are never mistaken for legitimate absence).

use std::fmt;

use crate::query::QueryValidationError;
use crate::types::TypeKey;

/// Errors surfaced by pipeline operations.
#[derive(Debug)]
pub enum PipelineError {
    /// No backend had the data and no conversion chain could produce it.
    /// During traversal this is the local, recoverable miss signal.
    NotFound { data_type: TypeKey },

    /// A backend or transformer was asked for a type it never registered.
    Unsupported { entity: String, data_type: TypeKey },

    /// A capability was registered twice for the same key. Registration
    /// fails loudly so accidental shadowing surfaces at construction time.
    DuplicateCapability { entity: String, capability: String },

    /// The type graph has no conversion route between the two types.
    NoTransformPath { from: TypeKey, to: TypeKey },

    /// A get handler genuinely failed (distinct from a miss).
    Get {
        backend: String,
        data_type: TypeKey,
        source: anyhow::Error,
    },

    /// A put handler genuinely failed.
    Put {
        backend: String,
        data_type: TypeKey,
        source: anyhow::Error,
    },

    /// A conversion step failed.
    Transform {
        transformer: String,
        from: TypeKey,
        to: TypeKey,
        source: anyhow::Error,
    },

    /// The query failed a backend's declared shape validation.
    InvalidQuery {
        backend: String,
        data_type: TypeKey,
        source: QueryValidationError,
    },

    /// A pipeline must have at least one backend.
    EmptyPipeline,
}

impl PipelineError {
    pub fn not_found(data_type: impl Into<TypeKey>) -> Self {
        PipelineError::NotFound {
            data_type: data_type.into(),
        }
    }

    pub fn unsupported(entity: impl Into<String>, data_type: impl Into<TypeKey>) -> Self {
        PipelineError::Unsupported {
            entity: entity.into(),
            data_type: data_type.into(),
        }
    }

    pub fn duplicate(entity: impl Into<String>, capability: impl Into<String>) -> Self {
        PipelineError::DuplicateCapability {
            entity: entity.into(),
            capability: capability.into(),
        }
    }

    pub fn get_failed(
        backend: impl Into<String>,
        data_type: impl Into<TypeKey>,
        source: anyhow::Error,
    ) -> Self {
        PipelineError::Get {
            backend: backend.into(),
            data_type: data_type.into(),
            source,
        }
    }

    pub fn put_failed(
        backend: impl Into<String>,
        data_type: impl Into<TypeKey>,
        source: anyhow::Error,
    ) -> Self {
        PipelineError::Put {
            backend: backend.into(),
            data_type: data_type.into(),
            source,
        }
    }

    pub fn transform_failed(
        transformer: impl Into<String>,
        from: impl Into<TypeKey>,
        to: impl Into<TypeKey>,
        source: anyhow::Error,
    ) -> Self {
        PipelineError::Transform {
            transformer: transformer.into(),
            from: from.into(),
            to: to.into(),
            source,
        }
    }

    /// The recoverable miss signal; everything else aborts traversal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::NotFound { .. })
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::NotFound { data_type } => {
                write!(f, "no backend or conversion chain produced \"{}\"", data_type)
            }
            PipelineError::Unsupported { entity, data_type } => {
                write!(f, "\"{}\" does not support the type \"{}\"", entity, data_type)
            }
            PipelineError::DuplicateCapability { entity, capability } => {
                write!(
                    f,
                    "\"{}\" already has a handler registered for \"{}\"",
                    entity, capability
                )
            }
            PipelineError::NoTransformPath { from, to } => {
                write!(f, "no conversion path from \"{}\" to \"{}\"", from, to)
            }
            PipelineError::Get {
                backend,
                data_type,
                source,
            } => {
                write!(
                    f,
                    "get of \"{}\" failed in backend \"{}\": {}",
                    data_type, backend, source
                )
            }
            PipelineError::Put {
                backend,
                data_type,
                source,
            } => {
                write!(
                    f,
                    "put of \"{}\" failed in backend \"{}\": {}",
                    data_type, backend, source
                )
            }
            PipelineError::Transform {
                transformer,
                from,
                to,
                source,
            } => {
                write!(
                    f,
                    "conversion \"{}\" -> \"{}\" failed in transformer \"{}\": {}",
                    from, to, transformer, source
                )
            }
            PipelineError::InvalidQuery {
                backend,
                data_type,
                source,
            } => {
                write!(
                    f,
                    "invalid query for \"{}\" in backend \"{}\": {}",
                    data_type, backend, source
                )
            }
            PipelineError::EmptyPipeline => {
                write!(f, "a pipeline requires at least one backend")
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Get { source, .. }
            | PipelineError::Put { source, .. }
            | PipelineError::Transform { source, .. } => Some(source.as_ref()),
            PipelineError::InvalidQuery { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Outcome signal for registered handlers.
///
/// Handlers report a miss with [`HandlerError::NotFound`]; any real fault
/// goes through [`HandlerError::Failed`] and aborts the whole operation.
#[derive(Debug)]
pub enum HandlerError {
    NotFound,
    Failed(anyhow::Error),
}

impl HandlerError {
    pub fn failed(source: impl Into<anyhow::Error>) -> Self {
        HandlerError::Failed(source.into())
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(source: anyhow::Error) -> Self {
        HandlerError::Failed(source)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::NotFound => write!(f, "not found"),
            HandlerError::Failed(source) => write!(f, "handler failed: {}", source),
        }
    }
}

impl std::error::Error for HandlerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(PipelineError::not_found("PDF").is_not_found());
        assert!(!PipelineError::unsupported("cache", "PDF").is_not_found());
        assert!(
            !PipelineError::get_failed("db", "PDF", anyhow::anyhow!("connection reset"))
                .is_not_found()
        );
    }

    #[test]
    fn test_display_names_backend_and_type() {
        let err = PipelineError::get_failed("db", "WordDoc", anyhow::anyhow!("boom"));
        let text = err.to_string();
        assert!(text.contains("db"));
        assert!(text.contains("WordDoc"));
        assert!(text.contains("boom"));
    }
}
