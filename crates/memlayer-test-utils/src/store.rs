use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memlayer_core::{
    ArchiveOutcome, InMemoryStore, MemoryStore, Message, MessageQuery, MessageUpdate, StoreError,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Wraps an [`InMemoryStore`] and fails mutations for selected tenants.
pub struct FlakyStore {
    inner: Arc<InMemoryStore>,
    failing_tenants: Mutex<HashSet<String>>,
    fail_tenant_listing: Mutex<bool>,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            failing_tenants: Mutex::new(HashSet::new()),
            fail_tenant_listing: Mutex::new(false),
        }
    }

    /// Make update, archive, and purge fail for messages of this tenant.
    pub fn fail_tenant(&self, tenant_id: &str) {
        self.failing_tenants.lock().insert(tenant_id.to_string());
    }

    pub fn fail_tenant_listing(&self) {
        *self.fail_tenant_listing.lock() = true;
    }

    async fn check(&self, id: Uuid) -> Result<(), StoreError> {
        let tenant = self.inner.get(id).await?.map(|message| message.tenant_id);
        match tenant {
            Some(tenant) if self.failing_tenants.lock().contains(&tenant) => Err(
                StoreError::Unavailable(format!("injected failure for tenant {tenant}")),
            ),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl MemoryStore for FlakyStore {
    async fn insert(&self, message: Message) -> Result<(), StoreError> {
        self.inner.insert(message).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        self.inner.get(id).await
    }

    async fn scan(&self, query: &MessageQuery) -> Result<Vec<Message>, StoreError> {
        self.inner.scan(query).await
    }

    async fn list_distinct_tenants(&self) -> Result<Vec<String>, StoreError> {
        if *self.fail_tenant_listing.lock() {
            return Err(StoreError::Unavailable("injected listing failure".to_string()));
        }
        self.inner.list_distinct_tenants().await
    }

    async fn update(
        &self,
        id: Uuid,
        update: MessageUpdate,
        at: DateTime<Utc>,
    ) -> Result<Message, StoreError> {
        self.check(id).await?;
        self.inner.update(id, update, at).await
    }

    async fn archive(&self, id: Uuid, at: DateTime<Utc>) -> Result<ArchiveOutcome, StoreError> {
        self.check(id).await?;
        self.inner.archive(id, at).await
    }

    async fn purge(&self, id: Uuid) -> Result<(), StoreError> {
        self.check(id).await?;
        self.inner.purge(id).await
    }
}
