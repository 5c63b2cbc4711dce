//! Embedding providers.
//!
//! The scorer and ranker never look at which provider produced a vector; the
//! only invariant is that every vector has `dimension()` components.

mod hash;
mod openai;

pub use hash::HashEmbeddingProvider;
pub use openai::{OpenAiEmbeddingConfig, OpenAiEmbeddingProvider};

use async_trait::async_trait;

/// Errors returned by embedding providers.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// Backend unreachable, unauthorized, or failing.
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Text the provider refuses to embed.
    #[error("invalid embedding input: {0}")]
    InvalidInput(String),
    /// Backend answered with something unusable.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

/// Text to fixed-dimension vector capability.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Reject vectors whose length differs from the provider dimension.
pub(crate) fn check_dimension(vector: &[f32], expected: usize) -> Result<(), EmbeddingError> {
    if vector.len() != expected {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {expected} dimensions, got {}",
            vector.len()
        )));
    }
    if vector.iter().any(|value| !value.is_finite()) {
        return Err(EmbeddingError::InvalidResponse(
            "vector contains non-finite values".to_string(),
        ));
    }
    Ok(())
}
