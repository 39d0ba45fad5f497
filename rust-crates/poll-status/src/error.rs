use crate::sources::Backend;
use std::sync::Arc;
use thiserror::Error;

/// Failure surfaced by a status query. Cloneable so every caller coalesced onto one
/// fetch receives the same error.
#[derive(Clone, Debug, Error)]
pub enum QueryError {
    #[error("{backend} source unavailable: {reason:#}")]
    SourceUnavailable {
        backend: Backend,
        reason: Arc<anyhow::Error>,
    },
}

impl QueryError {
    pub fn source_unavailable(backend: Backend, reason: anyhow::Error) -> Self {
        QueryError::SourceUnavailable {
            backend,
            reason: Arc::new(reason),
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            QueryError::SourceUnavailable { backend, .. } => *backend,
        }
    }
}
