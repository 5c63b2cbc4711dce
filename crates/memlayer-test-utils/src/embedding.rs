use async_trait::async_trait;
use memlayer_core::{EmbeddingError, EmbeddingProvider};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Returns preset vectors per text, or a fallback vector.
pub struct StubEmbedding {
    dimension: usize,
    vectors: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
    calls: Mutex<Vec<String>>,
}

impl StubEmbedding {
    /// Every text maps to a unit vector along the first axis.
    pub fn new(dimension: usize) -> Self {
        let mut fallback = vec![0.0; dimension];
        if let Some(first) = fallback.first_mut() {
            *first = 1.0;
        }
        Self {
            dimension,
            vectors: HashMap::new(),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    /// Texts embedded so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedding {
    fn name(&self) -> &str {
        "stub"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.lock().push(text.to_string());
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Always reports the provider as unavailable.
pub struct FailingEmbedding {
    dimension: usize,
}

impl FailingEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedding {
    fn name(&self) -> &str {
        "failing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::ProviderUnavailable(
            "stub provider is down".to_string(),
        ))
    }
}
