//! Configuration schema for memlayer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root config for the memlayer SDK.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemlayerConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub importance: ImportanceConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MemlayerConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> MemlayerConfigBuilder {
        MemlayerConfigBuilder::new()
    }
}

/// Builder for assembling a `MemlayerConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct MemlayerConfigBuilder {
    config: MemlayerConfig,
}

impl MemlayerConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: MemlayerConfig::default(),
        }
    }

    /// Replace the embedding provider configuration.
    pub fn embedding(mut self, embedding: EmbeddingConfig) -> Self {
        self.config.embedding = embedding;
        self
    }

    /// Replace the importance scoring configuration.
    pub fn importance(mut self, importance: ImportanceConfig) -> Self {
        self.config.importance = importance;
        self
    }

    /// Replace the ranking configuration.
    pub fn ranking(mut self, ranking: RankingConfig) -> Self {
        self.config.ranking = ranking;
        self
    }

    /// Replace the retention configuration.
    pub fn retention(mut self, retention: RetentionConfig) -> Self {
        self.config.retention = retention;
        self
    }

    /// Replace the cache configuration.
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    /// Replace the store configuration.
    pub fn store(mut self, store: StoreConfig) -> Self {
        self.config.store = store;
        self
    }

    /// Replace the ingestion limits.
    pub fn ingest(mut self, ingest: IngestConfig) -> Self {
        self.config.ingest = ingest;
        self
    }

    /// Replace the logging configuration.
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Finalize and return the built `MemlayerConfig`.
    pub fn build(self) -> MemlayerConfig {
        self.config
    }
}

/// Embedding backend selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Deterministic local feature-hashing provider.
    #[default]
    Hash,
    /// OpenAI-compatible remote embeddings API.
    Openai,
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    /// Queue embeddings instead of computing them inline during ingestion.
    #[serde(default)]
    pub async_mode: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            dimension: default_embedding_dimension(),
            model: None,
            base_url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_embedding_timeout_secs(),
            async_mode: false,
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_embedding_dimension() -> usize {
    384
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    1024
}

/// Importance scoring weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportanceConfig {
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,
    #[serde(default = "default_role_weight")]
    pub role_weight: f32,
    #[serde(default = "default_explicit_weight")]
    pub explicit_weight: f32,
    #[serde(default = "default_base_explicit")]
    pub base_explicit: f32,
    #[serde(default = "default_recency_scale_days")]
    pub recency_scale_days: f64,
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        Self {
            recency_weight: default_recency_weight(),
            role_weight: default_role_weight(),
            explicit_weight: default_explicit_weight(),
            base_explicit: default_base_explicit(),
            recency_scale_days: default_recency_scale_days(),
        }
    }
}

fn default_recency_weight() -> f32 {
    0.4
}

fn default_role_weight() -> f32 {
    0.2
}

fn default_explicit_weight() -> f32 {
    0.4
}

fn default_base_explicit() -> f32 {
    0.5
}

fn default_recency_scale_days() -> f64 {
    5.0
}

/// Hybrid ranking weights and candidate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f32,
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f32,
    #[serde(default = "default_decay_weight")]
    pub decay_weight: f32,
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            similarity_weight: default_similarity_weight(),
            importance_weight: default_importance_weight(),
            decay_weight: default_decay_weight(),
            half_life_days: default_half_life_days(),
            candidate_limit: default_candidate_limit(),
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
        }
    }
}

fn default_similarity_weight() -> f32 {
    0.6
}

fn default_importance_weight() -> f32 {
    0.3
}

fn default_decay_weight() -> f32 {
    0.1
}

fn default_half_life_days() -> f64 {
    7.0
}

fn default_candidate_limit() -> usize {
    200
}

fn default_top_k() -> usize {
    5
}

fn default_max_top_k() -> usize {
    50
}

/// Retention thresholds for a tenant (or the default record).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetentionPolicyConfig {
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    #[serde(default = "default_importance_threshold")]
    pub importance_threshold: f32,
    #[serde(default = "default_purge_after_days")]
    pub purge_after_days: u32,
}

impl Default for RetentionPolicyConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            importance_threshold: default_importance_threshold(),
            purge_after_days: default_purge_after_days(),
        }
    }
}

fn default_max_age_days() -> u32 {
    90
}

fn default_importance_threshold() -> f32 {
    0.2
}

fn default_purge_after_days() -> u32 {
    30
}

/// Retention scheduling and policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_retention_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub default: RetentionPolicyConfig,
    #[serde(default)]
    pub tenants: BTreeMap<String, RetentionPolicyConfig>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_retention_interval_secs(),
            default: RetentionPolicyConfig::default(),
            tenants: BTreeMap::new(),
        }
    }
}

fn default_retention_interval_secs() -> u64 {
    60 * 60
}

/// Search and embedding cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_max_items")]
    pub max_items: usize,
    #[serde(default = "default_search_ttl_secs")]
    pub search_ttl_secs: u64,
    #[serde(default = "default_embedding_ttl_secs")]
    pub embedding_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_items: default_cache_max_items(),
            search_ttl_secs: default_search_ttl_secs(),
            embedding_ttl_secs: default_embedding_ttl_secs(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_max_items() -> usize {
    2000
}

fn default_search_ttl_secs() -> u64 {
    30
}

fn default_embedding_ttl_secs() -> u64 {
    600
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreProviderKind {
    /// Process-local store, lost on exit.
    #[default]
    Memory,
    /// JSONL files under `store.path`.
    File,
    /// SQLite database at `store.path`.
    Sqlite,
}

/// Message store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub provider: StoreProviderKind,
    #[serde(default)]
    pub path: Option<String>,
}

/// Ingestion limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_content_chars: default_max_content_chars(),
        }
    }
}

fn default_max_content_chars() -> usize {
    16_000
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit one JSON object per line instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
