//! Error types for memory operations.

use crate::embedding::EmbeddingError;
use crate::store::StoreError;

/// Errors returned by the scorer, ranker, retention engine, and service.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Malformed input to a pure function or service entry point.
    #[error("validation error: {0}")]
    Validation(String),
    /// Candidate embedding does not match the query dimension.
    #[error("vector dimension mismatch (expected={expected}, actual={actual})")]
    VectorDimensionMismatch { expected: usize, actual: usize },
    /// Retention policy values are out of range.
    #[error("invalid retention policy: {0}")]
    InvalidPolicy(String),
    /// Wildcard retention found no tenants in the store.
    #[error("no tenants found for retention")]
    NoTenants,
    /// Message lookup by id failed.
    #[error("message not found: {0}")]
    NotFound(uuid::Uuid),
    /// Store collaborator failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Embedding collaborator failure.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}
