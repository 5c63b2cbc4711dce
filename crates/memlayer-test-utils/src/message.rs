use chrono::{DateTime, Duration, TimeZone, Utc};
use memlayer_core::{EmbeddingStatus, Message, Role};
use uuid::Uuid;

/// Reference instant used by tests that need a stable "now".
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Builds stored messages relative to a reference time.
#[derive(Clone)]
pub struct MessageBuilder {
    message: Message,
    now: DateTime<Utc>,
}

impl MessageBuilder {
    /// Fresh active user message with a completed 2-d embedding.
    pub fn new(tenant_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            message: Message {
                id: Uuid::new_v4(),
                tenant_id: tenant_id.to_string(),
                conversation_id: "conv-1".to_string(),
                role: Role::User,
                content: "message".to_string(),
                metadata: serde_json::json!({}),
                importance_score: 0.5,
                embedding: Some(vec![1.0, 0.0]),
                embedding_status: EmbeddingStatus::Completed,
                created_at: now,
                updated_at: now,
                archived: false,
                archived_at: None,
            },
            now,
        }
    }

    pub fn conversation(mut self, conversation_id: &str) -> Self {
        self.message.conversation_id = conversation_id.to_string();
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.message.role = role;
        self
    }

    pub fn content(mut self, content: &str) -> Self {
        self.message.content = content.to_string();
        self
    }

    pub fn importance(mut self, importance: f32) -> Self {
        self.message.importance_score = importance;
        self
    }

    pub fn age(mut self, age: Duration) -> Self {
        self.message.created_at = self.now - age;
        self.message.updated_at = self.message.created_at;
        self
    }

    pub fn age_days(self, days: i64) -> Self {
        self.age(Duration::days(days))
    }

    pub fn embedding(mut self, vector: Vec<f32>) -> Self {
        self.message.embedding = Some(vector);
        self.message.embedding_status = EmbeddingStatus::Completed;
        self
    }

    pub fn pending(mut self) -> Self {
        self.message.embedding = None;
        self.message.embedding_status = EmbeddingStatus::Pending;
        self
    }

    /// Archived `days` before the reference time.
    pub fn archived_days_ago(mut self, days: i64) -> Self {
        self.message.archived = true;
        self.message.archived_at = Some(self.now - Duration::days(days));
        self
    }

    pub fn build(self) -> Message {
        self.message
    }
}
