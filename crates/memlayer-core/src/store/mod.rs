//! Message store interface and implementations.

mod file;
mod memory;
mod sqlite;

pub use file::FileMemoryStore;
pub use memory::InMemoryStore;
pub use sqlite::SqliteMemoryStore;

use crate::model::{EmbeddingStatus, Message, MessageUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Errors returned by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// No message with this id.
    #[error("message not found: {0}")]
    NotFound(Uuid),
    /// Purge requested for a message that is still active.
    #[error("message is not archived: {0}")]
    NotArchived(Uuid),
    /// Insert collided with an existing id.
    #[error("message already exists: {0}")]
    Duplicate(Uuid),
    /// Stored data could not be decoded.
    #[error("corrupt store data: {0}")]
    Corrupt(String),
    /// Key cannot be used by this backend.
    #[error("invalid store key: {0}")]
    InvalidKey(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result of an archive request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Archived,
    AlreadyArchived,
}

/// Filter for [`MemoryStore::scan`]. Results are newest first, then id ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageQuery {
    /// Restrict to a tenant; `None` scans every tenant.
    pub tenant_id: Option<String>,
    pub conversation_id: Option<String>,
    pub importance_min: Option<f32>,
    pub embedding_status: Option<EmbeddingStatus>,
    /// Include archived messages.
    pub include_archived: bool,
    pub limit: Option<usize>,
}

impl MessageQuery {
    /// Active messages of one tenant.
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Self::default()
        }
    }

    pub fn with_archived(mut self) -> Self {
        self.include_archived = true;
        self
    }

    pub fn with_conversation(mut self, conversation_id: Option<&str>) -> Self {
        self.conversation_id = conversation_id.map(str::to_string);
        self
    }

    pub fn with_importance_min(mut self, importance_min: Option<f32>) -> Self {
        self.importance_min = importance_min;
        self
    }

    pub fn with_status(mut self, status: EmbeddingStatus) -> Self {
        self.embedding_status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a message passes every filter except the limit.
    pub fn matches(&self, message: &Message) -> bool {
        if !self.include_archived && message.archived {
            return false;
        }
        if self
            .tenant_id
            .as_deref()
            .is_some_and(|tenant| tenant != message.tenant_id)
        {
            return false;
        }
        if self
            .conversation_id
            .as_deref()
            .is_some_and(|conversation| conversation != message.conversation_id)
        {
            return false;
        }
        if self
            .importance_min
            .is_some_and(|min| message.importance_score < min)
        {
            return false;
        }
        if self
            .embedding_status
            .is_some_and(|status| status != message.embedding_status)
        {
            return false;
        }
        true
    }

    /// Filter, order, and truncate an in-memory snapshot.
    pub(crate) fn apply<I>(&self, messages: I) -> Vec<Message>
    where
        I: IntoIterator<Item = Message>,
    {
        let mut selected: Vec<Message> = messages
            .into_iter()
            .filter(|message| self.matches(message))
            .collect();
        selected.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

/// Persistence collaborator for messages.
///
/// Implementations must make each single-message transition atomic.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Store a new message.
    async fn insert(&self, message: Message) -> Result<(), StoreError>;

    /// Fetch a message by id, archived or not.
    async fn get(&self, id: Uuid) -> Result<Option<Message>, StoreError>;

    /// Filtered scan, newest first.
    async fn scan(&self, query: &MessageQuery) -> Result<Vec<Message>, StoreError>;

    /// Distinct tenant ids present in the store, sorted.
    async fn list_distinct_tenants(&self) -> Result<Vec<String>, StoreError>;

    /// Update derived fields in place.
    async fn update(
        &self,
        id: Uuid,
        update: MessageUpdate,
        at: DateTime<Utc>,
    ) -> Result<Message, StoreError>;

    /// Move an active message to the archive.
    async fn archive(&self, id: Uuid, at: DateTime<Utc>) -> Result<ArchiveOutcome, StoreError>;

    /// Hard-delete an archived message. Active messages are rejected.
    async fn purge(&self, id: Uuid) -> Result<(), StoreError>;

    /// Ranking candidates: active messages of one tenant, newest first.
    async fn scan_candidates(
        &self,
        tenant_id: &str,
        conversation_id: Option<&str>,
        importance_min: Option<f32>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let query = MessageQuery::tenant(tenant_id)
            .with_conversation(conversation_id)
            .with_importance_min(importance_min)
            .with_limit(limit);
        self.scan(&query).await
    }

    /// Active messages still waiting for an embedding, across tenants.
    async fn pending_embeddings(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        let query = MessageQuery {
            embedding_status: Some(EmbeddingStatus::Pending),
            limit: Some(limit),
            ..MessageQuery::default()
        };
        self.scan(&query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn message(tenant: &str, conversation: &str, minutes: i64) -> Message {
        let created_at = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .expect("timestamp")
            + Duration::minutes(minutes);
        Message {
            id: Uuid::new_v4(),
            tenant_id: tenant.to_string(),
            conversation_id: conversation.to_string(),
            role: Role::User,
            content: format!("m{minutes}"),
            metadata: serde_json::Value::Null,
            importance_score: 0.5,
            embedding: None,
            embedding_status: EmbeddingStatus::Pending,
            created_at,
            updated_at: created_at,
            archived: false,
            archived_at: None,
        }
    }

    #[test]
    fn query_filters_and_orders_newest_first() {
        let mut archived = message("acme", "c1", 5);
        archived.archived = true;
        let rows = vec![
            message("acme", "c1", 1),
            message("acme", "c2", 3),
            message("beta", "c1", 4),
            message("acme", "c1", 2),
            archived,
        ];

        let picked = MessageQuery::tenant("acme")
            .with_conversation(Some("c1"))
            .apply(rows.clone());
        let contents: Vec<&str> = picked.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m1"]);

        let picked = MessageQuery::tenant("acme")
            .with_archived()
            .with_limit(2)
            .apply(rows);
        let contents: Vec<&str> = picked.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m5", "m3"]);
    }
}
