//! OpenAI-compatible `/embeddings` HTTP provider.

use super::{EmbeddingError, EmbeddingProvider, check_dimension};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Connection settings for [`OpenAiEmbeddingProvider`].
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingConfig {
    /// API root; `/embeddings` is appended.
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub dimension: usize,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// Remote provider speaking the OpenAI embeddings protocol.
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dimension: usize,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: OpenAiEmbeddingConfig) -> Result<Self, EmbeddingError> {
        if config.dimension == 0 {
            return Err(EmbeddingError::InvalidInput(
                "dimension must be positive".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| EmbeddingError::ProviderUnavailable(err.to_string()))?;
        let base_url = config
            .base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: config
                .model
                .filter(|model| !model.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: config.api_key.unwrap_or_default(),
            dimension: config.dimension,
        })
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "input": text,
            "dimensions": self.dimension,
        })
    }

    fn map_reqwest_error(&self, err: reqwest::Error) -> EmbeddingError {
        if err.is_timeout() {
            EmbeddingError::ProviderUnavailable(format!(
                "request to {} timed out",
                self.endpoint
            ))
        } else {
            EmbeddingError::ProviderUnavailable(format!("{}: {err}", self.endpoint))
        }
    }

    fn extract(&self, body: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut response: EmbeddingResponse = serde_json::from_str(body)
            .map_err(|err| EmbeddingError::InvalidResponse(err.to_string()))?;
        response.data.sort_by_key(|data| data.index);
        let vector = response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding returned".to_string()))?;
        check_dimension(&vector, self.dimension)?;
        Ok(vector)
    }
}

/// Map a non-success HTTP status to an embedding error.
fn map_http_error(status: u16, body: &str) -> EmbeddingError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|response| response.error)
        .and_then(|detail| detail.message)
        .unwrap_or_else(|| body.to_string());
    match status {
        400 | 413 | 422 => EmbeddingError::InvalidInput(message),
        _ => EmbeddingError::ProviderUnavailable(format!("HTTP {status}: {message}")),
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("text is empty".to_string()));
        }
        if self.api_key.is_empty() {
            return Err(EmbeddingError::ProviderUnavailable(
                "api key is not configured".to_string(),
            ));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(text))
            .send()
            .await
            .map_err(|err| self.map_reqwest_error(err))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| self.map_reqwest_error(err))?;
        if !status.is_success() {
            let err = map_http_error(status.as_u16(), &body);
            warn!(
                "embedding request failed (endpoint={}, status={}, error={})",
                self.endpoint, status, err
            );
            return Err(err);
        }
        let vector = self.extract(&body)?;
        debug!(
            "embedded text (model={}, chars={}, dimension={})",
            self.model,
            text.chars().count(),
            vector.len()
        );
        Ok(vector)
    }
}
