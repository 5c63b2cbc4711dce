//! SQLite message store.

use super::{ArchiveOutcome, MemoryStore, MessageQuery, StoreError};
use crate::model::{EmbeddingStatus, Message, MessageUpdate, Role};
use crate::policy::{PolicySource, RetentionPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params, params_from_iter};
use std::path::Path;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL,
    importance_score REAL NOT NULL,
    embedding BLOB,
    embedding_status TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    archived INTEGER NOT NULL DEFAULT 0,
    archived_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_messages_tenant_created
    ON messages(tenant_id, archived, created_at DESC);
CREATE TABLE IF NOT EXISTS retention_policies (
    tenant_key TEXT PRIMARY KEY,
    max_age_days INTEGER NOT NULL,
    importance_threshold REAL NOT NULL,
    purge_after_days INTEGER NOT NULL
);
";

const COLUMNS: &str = "id, tenant_id, conversation_id, role, content, metadata, importance_score, \
     embedding, embedding_status, created_at, updated_at, archived, archived_at";

/// SQLite-backed store; timestamps are stored as UTC microseconds.
pub struct SqliteMemoryStore {
    conn: Mutex<Connection>,
}

impl SqliteMemoryStore {
    /// Open or create a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self::init(Connection::open(path)?)?;
        info!("initialized sqlite memory store (path={})", path.display());
        Ok(store)
    }

    /// Private database that lives as long as the store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Store or replace a retention policy record.
    pub fn set_policy(&self, key: &str, policy: RetentionPolicy) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO retention_policies
             (tenant_key, max_age_days, importance_threshold, purge_after_days)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                key,
                policy.max_age_days,
                f64::from(policy.importance_threshold),
                policy.purge_after_days
            ],
        )?;
        Ok(())
    }
}

/// Column values as read from SQLite, before decoding.
struct RawMessage {
    id: String,
    tenant_id: String,
    conversation_id: String,
    role: String,
    content: String,
    metadata: String,
    importance_score: f64,
    embedding: Option<Vec<u8>>,
    embedding_status: String,
    created_at: i64,
    updated_at: i64,
    archived: bool,
    archived_at: Option<i64>,
}

impl RawMessage {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            conversation_id: row.get(2)?,
            role: row.get(3)?,
            content: row.get(4)?,
            metadata: row.get(5)?,
            importance_score: row.get(6)?,
            embedding: row.get(7)?,
            embedding_status: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            archived: row.get(11)?,
            archived_at: row.get(12)?,
        })
    }

    fn decode(self) -> Result<Message, StoreError> {
        let corrupt = |err: String| StoreError::Corrupt(format!("message {}: {err}", self.id));
        let id = Uuid::parse_str(&self.id).map_err(|err| corrupt(err.to_string()))?;
        let role: Role = self.role.parse().map_err(|err: crate::MemoryError| corrupt(err.to_string()))?;
        let embedding_status: EmbeddingStatus = self
            .embedding_status
            .parse()
            .map_err(|err: crate::MemoryError| corrupt(err.to_string()))?;
        let archived_at = match self.archived_at {
            Some(micros) => Some(from_micros(micros).ok_or_else(|| corrupt("archived_at".into()))?),
            None => None,
        };
        Ok(Message {
            id,
            role,
            embedding_status,
            metadata: serde_json::from_str(&self.metadata)?,
            importance_score: self.importance_score as f32,
            embedding: self.embedding.as_deref().map(decode_vector),
            created_at: from_micros(self.created_at).ok_or_else(|| corrupt("created_at".into()))?,
            updated_at: from_micros(self.updated_at).ok_or_else(|| corrupt("updated_at".into()))?,
            archived: self.archived,
            archived_at,
            tenant_id: self.tenant_id,
            conversation_id: self.conversation_id,
            content: self.content,
        })
    }
}

fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn exists(conn: &Connection, id: &str) -> Result<Option<bool>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT archived FROM messages WHERE id = ?1",
            [id],
            |row| row.get::<_, bool>(0),
        )
        .optional()?)
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn insert(&self, message: Message) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let result = conn.execute(
            &format!("INSERT INTO messages ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"),
            params![
                message.id.to_string(),
                message.tenant_id,
                message.conversation_id,
                message.role.as_str(),
                message.content,
                serde_json::to_string(&message.metadata)?,
                f64::from(message.importance_score),
                message.embedding.as_deref().map(encode_vector),
                message.embedding_status.as_str(),
                message.created_at.timestamp_micros(),
                message.updated_at.timestamp_micros(),
                message.archived,
                message.archived_at.map(|at| at.timestamp_micros()),
            ],
        );
        match result {
            Ok(_) => {
                debug!(
                    "stored message (id={}, tenant_id={})",
                    message.id, message.tenant_id
                );
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate(message.id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"),
                [id.to_string()],
                RawMessage::from_row,
            )
            .optional()?;
        raw.map(RawMessage::decode).transpose()
    }

    async fn scan(&self, query: &MessageQuery) -> Result<Vec<Message>, StoreError> {
        let mut sql = format!("SELECT {COLUMNS} FROM messages WHERE 1 = 1");
        let mut values: Vec<Value> = Vec::new();
        if !query.include_archived {
            sql.push_str(" AND archived = 0");
        }
        if let Some(tenant) = &query.tenant_id {
            sql.push_str(" AND tenant_id = ?");
            values.push(Value::Text(tenant.clone()));
        }
        if let Some(conversation) = &query.conversation_id {
            sql.push_str(" AND conversation_id = ?");
            values.push(Value::Text(conversation.clone()));
        }
        if let Some(min) = query.importance_min {
            sql.push_str(" AND importance_score >= ?");
            values.push(Value::Real(f64::from(min)));
        }
        if let Some(status) = query.embedding_status {
            sql.push_str(" AND embedding_status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        sql.push_str(" ORDER BY created_at DESC, id ASC");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), RawMessage::from_row)?;
        let mut messages = Vec::new();
        for raw in rows {
            messages.push(raw?.decode()?);
        }
        Ok(messages)
    }

    async fn list_distinct_tenants(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT tenant_id FROM messages ORDER BY tenant_id")?;
        let tenants = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tenants)
    }

    async fn update(
        &self,
        id: Uuid,
        update: MessageUpdate,
        at: DateTime<Utc>,
    ) -> Result<Message, StoreError> {
        {
            let conn = self.conn.lock();
            let changed = conn.execute(
                "UPDATE messages SET
                    importance_score = COALESCE(?2, importance_score),
                    embedding = COALESCE(?3, embedding),
                    embedding_status = COALESCE(?4, embedding_status),
                    updated_at = ?5
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    update.importance_score.map(f64::from),
                    update.embedding.as_deref().map(encode_vector),
                    update.embedding_status.map(EmbeddingStatus::as_str),
                    at.timestamp_micros(),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(id));
            }
        }
        self.get(id).await?.ok_or(StoreError::NotFound(id))
    }

    async fn archive(&self, id: Uuid, at: DateTime<Utc>) -> Result<ArchiveOutcome, StoreError> {
        let conn = self.conn.lock();
        let key = id.to_string();
        let changed = conn.execute(
            "UPDATE messages SET archived = 1, archived_at = ?2, updated_at = ?2
             WHERE id = ?1 AND archived = 0",
            params![key, at.timestamp_micros()],
        )?;
        if changed == 1 {
            return Ok(ArchiveOutcome::Archived);
        }
        match exists(&conn, &key)? {
            Some(_) => Ok(ArchiveOutcome::AlreadyArchived),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn purge(&self, id: Uuid) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let key = id.to_string();
        let changed = conn.execute(
            "DELETE FROM messages WHERE id = ?1 AND archived = 1",
            [&key],
        )?;
        if changed == 1 {
            return Ok(());
        }
        match exists(&conn, &key)? {
            Some(_) => Err(StoreError::NotArchived(id)),
            None => Err(StoreError::NotFound(id)),
        }
    }
}

#[async_trait]
impl PolicySource for SqliteMemoryStore {
    async fn policy_for(&self, tenant_id: &str) -> Result<Option<RetentionPolicy>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT max_age_days, importance_threshold, purge_after_days
                 FROM retention_policies WHERE tenant_key = ?1",
                [tenant_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((max_age_days, importance_threshold, purge_after_days)) = row else {
            return Ok(None);
        };
        let days = |value: i64| {
            u32::try_from(value)
                .map_err(|_| StoreError::Corrupt(format!("policy {tenant_id}: day count {value}")))
        };
        Ok(Some(RetentionPolicy {
            max_age_days: days(max_age_days)?,
            importance_threshold: importance_threshold as f32,
            purge_after_days: days(purge_after_days)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn message(tenant: &str, minutes: i64) -> Message {
        let created_at = Utc
            .with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
            .single()
            .expect("timestamp")
            + Duration::minutes(minutes);
        Message {
            id: Uuid::new_v4(),
            tenant_id: tenant.to_string(),
            conversation_id: "c1".to_string(),
            role: Role::System,
            content: format!("m{minutes}"),
            metadata: serde_json::json!({ "k": minutes }),
            importance_score: 0.25,
            embedding: Some(vec![0.25, -1.5, 3.0]),
            embedding_status: EmbeddingStatus::Completed,
            created_at,
            updated_at: created_at,
            archived: false,
            archived_at: None,
        }
    }

    #[tokio::test]
    async fn round_trips_messages() {
        let store = SqliteMemoryStore::open_in_memory().expect("store");
        let original = message("acme", 0);
        store.insert(original.clone()).await.expect("insert");
        assert_eq!(store.get(original.id).await.expect("get"), Some(original.clone()));
        assert!(matches!(
            store.insert(original).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn scan_orders_and_filters() {
        let store = SqliteMemoryStore::open_in_memory().expect("store");
        for minutes in [1, 3, 2] {
            store.insert(message("acme", minutes)).await.expect("insert");
        }
        store.insert(message("beta", 9)).await.expect("insert");

        let rows = store
            .scan_candidates("acme", Some("c1"), None, 2)
            .await
            .expect("scan");
        let contents: Vec<&str> = rows.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m2"]);
        assert_eq!(
            store.list_distinct_tenants().await.expect("tenants"),
            vec!["acme".to_string(), "beta".to_string()]
        );
        assert!(store
            .scan_candidates("acme", None, Some(0.5), 10)
            .await
            .expect("scan")
            .is_empty());
    }

    #[tokio::test]
    async fn lifecycle_transitions_are_guarded() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteMemoryStore::open(temp.path().join("memlayer.db")).expect("store");
        let msg = message("acme", 0);
        let id = msg.id;
        store.insert(msg).await.expect("insert");

        assert!(matches!(store.purge(id).await, Err(StoreError::NotArchived(_))));
        let at = Utc::now();
        assert_eq!(store.archive(id, at).await.expect("archive"), ArchiveOutcome::Archived);
        assert_eq!(
            store.archive(id, at).await.expect("again"),
            ArchiveOutcome::AlreadyArchived
        );
        assert!(store.scan(&MessageQuery::tenant("acme")).await.expect("scan").is_empty());
        store.purge(id).await.expect("purge");
        assert!(matches!(store.purge(id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn update_and_policies() {
        let store = SqliteMemoryStore::open_in_memory().expect("store");
        let mut msg = message("acme", 0);
        msg.embedding = None;
        msg.embedding_status = EmbeddingStatus::Pending;
        let id = msg.id;
        store.insert(msg).await.expect("insert");
        assert_eq!(store.pending_embeddings(5).await.expect("pending").len(), 1);

        let updated = store
            .update(id, MessageUpdate::embedded(vec![1.0, 2.0]), Utc::now())
            .await
            .expect("update");
        assert_eq!(updated.embedding, Some(vec![1.0, 2.0]));
        assert_eq!(updated.embedding_status, EmbeddingStatus::Completed);
        assert_eq!(updated.importance_score, 0.25);

        let policy = RetentionPolicy {
            max_age_days: 3,
            importance_threshold: 0.5,
            purge_after_days: 2,
        };
        store.set_policy("acme", policy).expect("set");
        assert_eq!(store.policy_for("acme").await.expect("policy"), Some(policy));
        assert_eq!(store.default_policy().await.expect("default"), None);
    }
}
