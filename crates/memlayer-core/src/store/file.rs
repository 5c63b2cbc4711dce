//! JSONL file store: one file per tenant plus a policy table.
//!
//! Layout under the root directory:
//! - `messages/<tenant>.jsonl`, one message per line
//! - `policies.json`, retention policies keyed by tenant or `*`
//!
//! Mutations rewrite the tenant file through a temp file and rename while
//! holding the store lock, so a single message transition is all-or-nothing.

use super::{ArchiveOutcome, MemoryStore, MessageQuery, StoreError};
use crate::model::{Message, MessageUpdate, validate_identifier};
use crate::policy::{PolicySource, RetentionPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const MESSAGES_DIR: &str = "messages";
const POLICIES_FILE: &str = "policies.json";
const EXTENSION: &str = "jsonl";

/// File-backed message store.
pub struct FileMemoryStore {
    root: PathBuf,
    /// Message id to tenant id; also serializes all file access.
    index: Mutex<HashMap<Uuid, String>>,
}

impl FileMemoryStore {
    /// Open or create a store under `root`, indexing existing messages.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(MESSAGES_DIR))?;
        let store = Self {
            root,
            index: Mutex::new(HashMap::new()),
        };
        let mut index = HashMap::new();
        for tenant in store.tenant_files()? {
            for message in store.load_records(&tenant)? {
                index.insert(message.id, tenant.clone());
            }
        }
        info!(
            "initialized file memory store (root={}, messages={})",
            store.root.display(),
            index.len()
        );
        *store.index.lock() = index;
        Ok(store)
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store or replace a retention policy record.
    pub fn set_policy(&self, key: &str, policy: RetentionPolicy) -> Result<(), StoreError> {
        let _guard = self.index.lock();
        let mut policies = self.load_policies()?;
        policies.insert(key.to_string(), policy);
        let contents = serde_json::to_string_pretty(&policies)?;
        write_atomic(&self.root.join(POLICIES_FILE), contents.as_bytes())?;
        debug!("stored retention policy (key={key})");
        Ok(())
    }

    fn tenant_path(&self, tenant_id: &str) -> Result<PathBuf, StoreError> {
        validate_identifier("tenant id", tenant_id)
            .map_err(|err| StoreError::InvalidKey(err.to_string()))?;
        Ok(self
            .root
            .join(MESSAGES_DIR)
            .join(format!("{tenant_id}.{EXTENSION}")))
    }

    /// Tenants that have a message file on disk.
    fn tenant_files(&self) -> Result<Vec<String>, StoreError> {
        let mut tenants = Vec::new();
        for entry in fs::read_dir(self.root.join(MESSAGES_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                tenants.push(stem.to_string());
            }
        }
        tenants.sort();
        Ok(tenants)
    }

    fn load_records(&self, tenant_id: &str) -> Result<Vec<Message>, StoreError> {
        let path = self.tenant_path(tenant_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(OpenOptions::new().read(true).open(&path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }

    fn write_records(&self, tenant_id: &str, records: &[Message]) -> Result<(), StoreError> {
        let path = self.tenant_path(tenant_id)?;
        if records.is_empty() {
            if path.exists() {
                fs::remove_file(&path)?;
            }
            return Ok(());
        }
        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }
        write_atomic(&path, &buffer)
    }

    fn load_policies(&self) -> Result<BTreeMap<String, RetentionPolicy>, StoreError> {
        let path = self.root.join(POLICIES_FILE);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Rewrite one message of a tenant file under the store lock.
    fn modify<T>(
        &self,
        index: &HashMap<Uuid, String>,
        id: Uuid,
        change: impl FnOnce(&mut Vec<Message>, usize) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let tenant = index.get(&id).ok_or(StoreError::NotFound(id))?;
        let mut records = self.load_records(tenant)?;
        let position = records
            .iter()
            .position(|message| message.id == id)
            .ok_or(StoreError::NotFound(id))?;
        let result = change(&mut records, position)?;
        self.write_records(tenant, &records)?;
        Ok(result)
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn insert(&self, message: Message) -> Result<(), StoreError> {
        let mut index = self.index.lock();
        if index.contains_key(&message.id) {
            return Err(StoreError::Duplicate(message.id));
        }
        let path = self.tenant_path(&message.tenant_id)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(&message)?;
        writeln!(file, "{line}")?;
        debug!(
            "stored message (id={}, tenant_id={}, content_len={})",
            message.id,
            message.tenant_id,
            message.content.len()
        );
        index.insert(message.id, message.tenant_id);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        let index = self.index.lock();
        let Some(tenant) = index.get(&id) else {
            return Ok(None);
        };
        Ok(self
            .load_records(tenant)?
            .into_iter()
            .find(|message| message.id == id))
    }

    async fn scan(&self, query: &MessageQuery) -> Result<Vec<Message>, StoreError> {
        let _guard = self.index.lock();
        let tenants = match &query.tenant_id {
            Some(tenant) => vec![tenant.clone()],
            None => self.tenant_files()?,
        };
        let mut messages = Vec::new();
        for tenant in tenants {
            messages.extend(self.load_records(&tenant)?);
        }
        Ok(query.apply(messages))
    }

    async fn list_distinct_tenants(&self) -> Result<Vec<String>, StoreError> {
        let index = self.index.lock();
        let tenants: BTreeSet<&String> = index.values().collect();
        Ok(tenants.into_iter().cloned().collect())
    }

    async fn update(
        &self,
        id: Uuid,
        update: MessageUpdate,
        at: DateTime<Utc>,
    ) -> Result<Message, StoreError> {
        let index = self.index.lock();
        self.modify(&index, id, |records, position| {
            let message = &mut records[position];
            update.apply_to(message, at);
            Ok(message.clone())
        })
    }

    async fn archive(&self, id: Uuid, at: DateTime<Utc>) -> Result<ArchiveOutcome, StoreError> {
        let index = self.index.lock();
        let tenant = index.get(&id).ok_or(StoreError::NotFound(id))?;
        let records = self.load_records(tenant)?;
        if records.iter().any(|message| message.id == id && message.archived) {
            return Ok(ArchiveOutcome::AlreadyArchived);
        }
        self.modify(&index, id, |records, position| {
            let message = &mut records[position];
            message.archived = true;
            message.archived_at = Some(at);
            message.updated_at = at;
            Ok(ArchiveOutcome::Archived)
        })
    }

    async fn purge(&self, id: Uuid) -> Result<(), StoreError> {
        let mut index = self.index.lock();
        self.modify(&index, id, |records, position| {
            if !records[position].archived {
                return Err(StoreError::NotArchived(id));
            }
            records.remove(position);
            Ok(())
        })?;
        index.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl PolicySource for FileMemoryStore {
    async fn policy_for(&self, tenant_id: &str) -> Result<Option<RetentionPolicy>, StoreError> {
        let _guard = self.index.lock();
        let policies = self.load_policies().inspect_err(|err| {
            warn!(
                "failed to read retention policies (root={}, error={})",
                self.root.display(),
                err
            );
        })?;
        Ok(policies.get(tenant_id).copied())
    }
}

/// Replace `path` with `contents` via a sibling temp file.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);
    {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(temp_path, path)?;
    Ok(())
}
