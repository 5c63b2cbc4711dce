//! Message model shared by the scorer, ranker, retention engine, and stores.

use crate::error::MemoryError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use uuid::Uuid;

/// Allowed tenant and conversation identifiers.
pub const IDENTIFIER_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$";

/// Validate a tenant or conversation identifier.
pub fn validate_identifier(kind: &str, value: &str) -> Result<(), MemoryError> {
    static IDENTIFIER: LazyLock<Result<Regex, regex::Error>> =
        LazyLock::new(|| Regex::new(IDENTIFIER_PATTERN));
    let regex = IDENTIFIER
        .as_ref()
        .map_err(|err| MemoryError::Validation(format!("identifier pattern: {err}")))?;
    if regex.is_match(value) {
        Ok(())
    } else {
        Err(MemoryError::Validation(format!("invalid {kind}: {value:?}")))
    }
}

/// Author role of a stored message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = MemoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(MemoryError::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// Lifecycle of a message's embedding vector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Pending,
    Completed,
    Failed,
}

impl EmbeddingStatus {
    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Completed => "completed",
            EmbeddingStatus::Failed => "failed",
        }
    }
}

impl FromStr for EmbeddingStatus {
    type Err = MemoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(EmbeddingStatus::Pending),
            "completed" => Ok(EmbeddingStatus::Completed),
            "failed" => Ok(EmbeddingStatus::Failed),
            other => Err(MemoryError::Validation(format!(
                "unknown embedding status: {other}"
            ))),
        }
    }
}

/// Persisted unit of memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Message identifier.
    pub id: Uuid,
    /// Isolation boundary; never changes after creation.
    pub tenant_id: String,
    /// Conversation the message belongs to; never changes after creation.
    pub conversation_id: String,
    /// Author role.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Opaque caller metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Importance in [0, 1].
    pub importance_score: f32,
    /// Embedding vector, absent until computed.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Embedding lifecycle state.
    pub embedding_status: EmbeddingStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Whether the message has been moved to the archive.
    #[serde(default)]
    pub archived: bool,
    /// When the message was archived.
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
}

impl Message {
    /// True when the message can take part in vector ranking.
    pub fn is_searchable(&self) -> bool {
        !self.archived
            && self.embedding_status == EmbeddingStatus::Completed
            && self.embedding.is_some()
    }
}

/// Caller input for ingesting a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub tenant_id: String,
    pub conversation_id: String,
    /// Raw role name; validated during ingestion.
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Explicit importance in [0, 1]; replaces the computed score.
    #[serde(default)]
    pub importance_override: Option<f32>,
    /// Backfilled creation time; defaults to the service clock.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl NewMessage {
    /// Convenience constructor for the common case.
    pub fn new(
        tenant_id: impl Into<String>,
        conversation_id: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            conversation_id: conversation_id.into(),
            role: role.into(),
            content: content.into(),
            metadata: None,
            importance_override: None,
            created_at: None,
        }
    }
}

/// In-place update of derived fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageUpdate {
    pub importance_score: Option<f32>,
    pub embedding: Option<Vec<f32>>,
    pub embedding_status: Option<EmbeddingStatus>,
}

impl MessageUpdate {
    /// Update recording a freshly computed embedding.
    pub fn embedded(vector: Vec<f32>) -> Self {
        Self {
            embedding: Some(vector),
            embedding_status: Some(EmbeddingStatus::Completed),
            ..Self::default()
        }
    }

    /// Update recording a failed embedding attempt.
    pub fn embedding_failed() -> Self {
        Self {
            embedding_status: Some(EmbeddingStatus::Failed),
            ..Self::default()
        }
    }

    /// Apply the update to a message, bumping `updated_at`.
    pub fn apply_to(&self, message: &mut Message, now: DateTime<Utc>) {
        if let Some(score) = self.importance_score {
            message.importance_score = score;
        }
        if let Some(vector) = &self.embedding {
            message.embedding = Some(vector.clone());
        }
        if let Some(status) = self.embedding_status {
            message.embedding_status = status;
        }
        message.updated_at = now;
    }
}

/// Optional search filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    /// Restrict candidates to a single conversation.
    pub conversation_id: Option<String>,
    /// Exclude candidates below this importance before scoring.
    pub importance_min: Option<f32>,
    /// Override the configured candidate scan limit.
    pub candidate_limit: Option<usize>,
}

/// Ranked search hit; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub message_id: Uuid,
    /// Combined weighted score.
    pub score: f32,
    pub similarity: f32,
    pub decay: f32,
    pub importance: f32,
    pub tenant_id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_validate_consistently_across_calls() {
        for _ in 0..3 {
            assert!(validate_identifier("tenant id", "acme.prod-1").is_ok());
            assert!(validate_identifier("tenant id", "-leading").is_err());
            assert!(validate_identifier("tenant id", &"a".repeat(129)).is_err());
        }
        assert!(validate_identifier("conversation id", &"a".repeat(128)).is_ok());
    }
}
