//! In-process store guarded by a single lock.

use super::{ArchiveOutcome, MemoryStore, MessageQuery, StoreError};
use crate::model::{Message, MessageUpdate};
use crate::policy::{PolicySource, RetentionPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    messages: HashMap<Uuid, Message>,
    policies: BTreeMap<String, RetentionPolicy>,
}

/// Volatile store for tests and single-process use.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace a retention policy record.
    pub fn set_policy(&self, key: impl Into<String>, policy: RetentionPolicy) {
        self.inner.lock().policies.insert(key.into(), policy);
    }

    /// Number of stored messages, archived included.
    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn insert(&self, message: Message) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.messages.contains_key(&message.id) {
            return Err(StoreError::Duplicate(message.id));
        }
        debug!(
            "stored message (id={}, tenant_id={})",
            message.id, message.tenant_id
        );
        inner.messages.insert(message.id, message);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        Ok(self.inner.lock().messages.get(&id).cloned())
    }

    async fn scan(&self, query: &MessageQuery) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock();
        Ok(query.apply(inner.messages.values().cloned()))
    }

    async fn list_distinct_tenants(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock();
        let tenants: BTreeSet<&String> = inner.messages.values().map(|m| &m.tenant_id).collect();
        Ok(tenants.into_iter().cloned().collect())
    }

    async fn update(
        &self,
        id: Uuid,
        update: MessageUpdate,
        at: DateTime<Utc>,
    ) -> Result<Message, StoreError> {
        let mut inner = self.inner.lock();
        let message = inner.messages.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        update.apply_to(message, at);
        Ok(message.clone())
    }

    async fn archive(&self, id: Uuid, at: DateTime<Utc>) -> Result<ArchiveOutcome, StoreError> {
        let mut inner = self.inner.lock();
        let message = inner.messages.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if message.archived {
            return Ok(ArchiveOutcome::AlreadyArchived);
        }
        message.archived = true;
        message.archived_at = Some(at);
        message.updated_at = at;
        Ok(ArchiveOutcome::Archived)
    }

    async fn purge(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        match inner.messages.get(&id) {
            None => Err(StoreError::NotFound(id)),
            Some(message) if !message.archived => Err(StoreError::NotArchived(id)),
            Some(_) => {
                inner.messages.remove(&id);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl PolicySource for InMemoryStore {
    async fn policy_for(&self, tenant_id: &str) -> Result<Option<RetentionPolicy>, StoreError> {
        Ok(self.inner.lock().policies.get(tenant_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EmbeddingStatus, Role};
    use pretty_assertions::assert_eq;

    fn message(tenant: &str) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            tenant_id: tenant.to_string(),
            conversation_id: "c1".to_string(),
            role: Role::Assistant,
            content: "hi".to_string(),
            metadata: serde_json::json!({}),
            importance_score: 0.4,
            embedding: None,
            embedding_status: EmbeddingStatus::Pending,
            created_at: now,
            updated_at: now,
            archived: false,
            archived_at: None,
        }
    }

    #[tokio::test]
    async fn archive_then_purge_lifecycle() {
        let store = InMemoryStore::new();
        let msg = message("acme");
        let id = msg.id;
        store.insert(msg).await.expect("insert");

        let err = store.purge(id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotArchived(_)));

        let at = Utc::now();
        assert_eq!(store.archive(id, at).await.expect("archive"), ArchiveOutcome::Archived);
        assert_eq!(
            store.archive(id, at).await.expect("again"),
            ArchiveOutcome::AlreadyArchived
        );
        assert_eq!(store.get(id).await.expect("get").and_then(|m| m.archived_at), Some(at));

        store.purge(id).await.expect("purge");
        assert!(store.get(id).await.expect("get").is_none());
        assert!(matches!(store.purge(id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn rejects_duplicate_ids_and_lists_tenants() {
        let store = InMemoryStore::new();
        let msg = message("beta");
        store.insert(msg.clone()).await.expect("insert");
        assert!(matches!(
            store.insert(msg).await,
            Err(StoreError::Duplicate(_))
        ));
        store.insert(message("acme")).await.expect("insert");
        store.insert(message("acme")).await.expect("insert");
        assert_eq!(
            store.list_distinct_tenants().await.expect("tenants"),
            vec!["acme".to_string(), "beta".to_string()]
        );
    }

    #[tokio::test]
    async fn update_marks_embedding_completed() {
        let store = InMemoryStore::new();
        let msg = message("acme");
        let id = msg.id;
        store.insert(msg).await.expect("insert");
        let updated = store
            .update(id, MessageUpdate::embedded(vec![0.1, 0.2]), Utc::now())
            .await
            .expect("update");
        assert_eq!(updated.embedding_status, EmbeddingStatus::Completed);
        assert!(store.pending_embeddings(10).await.expect("pending").is_empty());
    }
}
