//! TTL caches for search results and query embeddings.

use crate::model::RetrievalResult;
use log::debug;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Bounded map whose entries expire. When full, the entry expiring soonest is evicted.
pub struct TtlCache<V> {
    max_items: usize,
    entries: Mutex<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        let expired = entries.get(key)?.0 <= Instant::now();
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|(_, value)| value.clone())
    }

    pub fn insert(&self, key: String, value: V, ttl: Duration) {
        if self.max_items == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) && entries.len() >= self.max_items {
            let oldest = entries
                .iter()
                .min_by_key(|(_, (expires_at, _))| *expires_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(key, (Instant::now() + ttl, value));
    }

    /// Drop every key starting with `prefix`, returning how many were removed.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_items: usize,
    pub search_ttl: Duration,
    pub embedding_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_items: 2000,
            search_ttl: Duration::from_secs(30),
            embedding_ttl: Duration::from_secs(600),
        }
    }
}

/// Parameters that identify a cached search.
#[derive(Debug, Clone, Copy)]
pub struct SearchKey<'a> {
    pub tenant_id: &'a str,
    pub conversation_id: Option<&'a str>,
    pub query: &'a str,
    pub top_k: usize,
    pub candidate_limit: usize,
    pub importance_min: Option<f32>,
}

impl SearchKey<'_> {
    /// `search:<tenant>:<conversation or *>:<sha256 of all parameters>`.
    pub fn render(&self) -> String {
        let conversation = self.conversation_id.unwrap_or("*");
        let importance_min = self
            .importance_min
            .map(|value| value.to_string())
            .unwrap_or_else(|| "-".to_string());
        let raw = [
            self.tenant_id,
            conversation,
            &self.top_k.to_string(),
            &self.candidate_limit.to_string(),
            &importance_min,
            self.query,
        ]
        .join("|");
        format!(
            "search:{}:{}:{}",
            self.tenant_id,
            conversation,
            hex_digest(raw.as_bytes())
        )
    }
}

/// Search-result and query-embedding caches sharing one configuration.
pub struct SearchCache {
    settings: CacheSettings,
    searches: TtlCache<Vec<RetrievalResult>>,
    embeddings: TtlCache<Vec<f32>>,
}

impl SearchCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            searches: TtlCache::new(settings.max_items),
            embeddings: TtlCache::new(settings.max_items),
        }
    }

    pub fn disabled() -> Self {
        Self::new(CacheSettings {
            enabled: false,
            ..CacheSettings::default()
        })
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn search(&self, key: &SearchKey<'_>) -> Option<Vec<RetrievalResult>> {
        if !self.settings.enabled {
            return None;
        }
        self.searches.get(&key.render())
    }

    pub fn store_search(&self, key: &SearchKey<'_>, results: Vec<RetrievalResult>) {
        if self.settings.enabled {
            self.searches
                .insert(key.render(), results, self.settings.search_ttl);
        }
    }

    pub fn embedding(&self, text: &str) -> Option<Vec<f32>> {
        if !self.settings.enabled {
            return None;
        }
        self.embeddings.get(&embedding_key(text))
    }

    pub fn store_embedding(&self, text: &str, vector: Vec<f32>) {
        if self.settings.enabled {
            self.embeddings
                .insert(embedding_key(text), vector, self.settings.embedding_ttl);
        }
    }

    /// Forget every cached search of a tenant.
    pub fn invalidate_tenant(&self, tenant_id: &str) {
        if !self.settings.enabled {
            return;
        }
        let removed = self.searches.remove_prefix(&format!("search:{tenant_id}:"));
        if removed > 0 {
            debug!("search cache invalidated (tenant_id={tenant_id}, removed={removed})");
        }
    }
}

fn embedding_key(text: &str) -> String {
    format!("embedding:{}", hex_digest(text.as_bytes()))
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
