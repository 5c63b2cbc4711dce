//! Config sections mapped onto core types.

use log::{info, warn};
use memlayer_config::{
    CacheConfig, ConfigError, EmbeddingConfig, EmbeddingProviderKind, MemlayerConfig,
    RetentionConfig, RetentionPolicyConfig,
};
use memlayer_core::{
    CacheSettings, EmbeddingError, EmbeddingProvider, HashEmbeddingProvider, ImportanceWeights,
    MemoryError, OpenAiEmbeddingConfig, OpenAiEmbeddingProvider, RankingWeights, RetentionPolicy,
    ServiceSettings, StaticPolicies, StoreError,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building a [`crate::MemoryLayer`].
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// The config names a data directory that cannot be determined.
    #[error("no data directory available for the {0} store; set store.path")]
    NoDataDir(&'static str),
}

pub fn service_settings(config: &MemlayerConfig) -> ServiceSettings {
    let importance = &config.importance;
    let ranking = &config.ranking;
    ServiceSettings {
        importance: ImportanceWeights {
            recency: importance.recency_weight,
            role: importance.role_weight,
            explicit: importance.explicit_weight,
            base_explicit: importance.base_explicit,
            recency_scale_days: importance.recency_scale_days,
        },
        ranking: RankingWeights {
            similarity: ranking.similarity_weight,
            importance: ranking.importance_weight,
            decay: ranking.decay_weight,
            half_life_days: ranking.half_life_days,
        },
        candidate_limit: ranking.candidate_limit,
        default_top_k: ranking.default_top_k,
        max_top_k: ranking.max_top_k,
        max_content_chars: config.ingest.max_content_chars,
    }
}

pub fn cache_settings(config: &CacheConfig) -> CacheSettings {
    CacheSettings {
        enabled: config.enabled,
        max_items: config.max_items,
        search_ttl: Duration::from_secs(config.search_ttl_secs),
        embedding_ttl: Duration::from_secs(config.embedding_ttl_secs),
    }
}

pub fn retention_policy(config: &RetentionPolicyConfig) -> RetentionPolicy {
    RetentionPolicy {
        max_age_days: config.max_age_days,
        importance_threshold: config.importance_threshold,
        purge_after_days: config.purge_after_days,
    }
}

/// Policies declared in config: `retention.default` under the wildcard key
/// plus one record per configured tenant.
pub fn configured_policies(config: &RetentionConfig) -> StaticPolicies {
    config.tenants.iter().fold(
        StaticPolicies::new().with_default(retention_policy(&config.default)),
        |policies, (tenant_id, policy)| policies.with_policy(tenant_id, retention_policy(policy)),
    )
}

/// Build the configured embedding provider.
///
/// `lookup_env` resolves `embedding.api_key_env`; a missing key is logged and
/// surfaces later as a provider error on the first embed call.
pub fn embedding_provider(
    config: &EmbeddingConfig,
    lookup_env: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn EmbeddingProvider>, BootstrapError> {
    match config.provider {
        EmbeddingProviderKind::Hash => {
            info!("using hash embeddings (dimension={})", config.dimension);
            Ok(Arc::new(HashEmbeddingProvider::new(config.dimension)?))
        }
        EmbeddingProviderKind::Openai => {
            let api_key = lookup_env(&config.api_key_env).filter(|key| !key.trim().is_empty());
            if api_key.is_none() {
                warn!(
                    "embedding api key is not set (env={}); embeddings will fail",
                    config.api_key_env
                );
            }
            let provider = OpenAiEmbeddingProvider::new(OpenAiEmbeddingConfig {
                base_url: config.base_url.clone(),
                model: config.model.clone(),
                api_key,
                dimension: config.dimension,
                timeout: Duration::from_secs(config.timeout_secs),
            })?;
            info!(
                "using openai embeddings (dimension={}, timeout_secs={})",
                config.dimension, config.timeout_secs
            );
            Ok(Arc::new(provider))
        }
    }
}
