//! Service facade over the scorer, ranker, retention engine, and collaborators.

use crate::cache::{SearchCache, SearchKey};
use crate::clock::{Clock, SystemClock};
use crate::embedding::{EmbeddingError, EmbeddingProvider, check_dimension};
use crate::error::MemoryError;
use crate::importance::{ImportanceScorer, ImportanceWeights, validate_override};
use crate::model::{
    EmbeddingStatus, Message, MessageUpdate, NewMessage, RetrievalResult, Role, SearchFilters,
    validate_identifier,
};
use crate::policy::{PolicySource, RetentionPolicy, StaticPolicies};
use crate::queue::{EmbeddingJob, EmbeddingQueue};
use crate::ranking::{RankingWeights, RetrievalRanker};
use crate::retention::{RetentionEngine, RetentionReport, TenantScope};
use crate::store::MemoryStore;
use chrono::{DateTime, SubsecRound, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Fractional-second digits kept on stored timestamps (microseconds).
const TIMESTAMP_DIGITS: u16 = 6;

/// Limits and weights applied by [`MemoryService`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceSettings {
    pub importance: ImportanceWeights,
    pub ranking: RankingWeights,
    /// Maximum candidates scanned per search.
    pub candidate_limit: usize,
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub max_content_chars: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            importance: ImportanceWeights::default(),
            ranking: RankingWeights::default(),
            candidate_limit: 200,
            default_top_k: 5,
            max_top_k: 50,
            max_content_chars: 16_000,
        }
    }
}

/// Builder for [`MemoryService`].
pub struct MemoryServiceBuilder {
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    policies: Option<Arc<dyn PolicySource>>,
    clock: Arc<dyn Clock>,
    cache: SearchCache,
    settings: ServiceSettings,
    queue: Option<EmbeddingQueue>,
}

impl MemoryServiceBuilder {
    /// Policy source; defaults to the built-in policy only.
    pub fn policies(mut self, policies: Arc<dyn PolicySource>) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache(mut self, cache: SearchCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Defer embeddings to a background worker.
    pub fn queue(mut self, queue: EmbeddingQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn build(self) -> MemoryService {
        let policies = self
            .policies
            .unwrap_or_else(|| Arc::new(StaticPolicies::new()));
        MemoryService {
            retention: RetentionEngine::new(self.store.clone(), policies),
            scorer: ImportanceScorer::new(self.settings.importance),
            ranker: RetrievalRanker::new(self.settings.ranking),
            store: self.store,
            embedder: self.embedder,
            clock: self.clock,
            cache: self.cache,
            settings: self.settings,
            queue: self.queue,
        }
    }
}

/// Entry point used by the transport layer and the CLI.
pub struct MemoryService {
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    clock: Arc<dyn Clock>,
    cache: SearchCache,
    scorer: ImportanceScorer,
    ranker: RetrievalRanker,
    retention: RetentionEngine,
    settings: ServiceSettings,
    queue: Option<EmbeddingQueue>,
}

impl MemoryService {
    pub fn builder(
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> MemoryServiceBuilder {
        MemoryServiceBuilder {
            store,
            embedder,
            policies: None,
            clock: Arc::new(SystemClock),
            cache: SearchCache::disabled(),
            settings: ServiceSettings::default(),
            queue: None,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Importance of a message created at `created_at`, scored against the service clock.
    pub fn compute_importance(
        &self,
        created_at: DateTime<Utc>,
        role: &str,
        explicit_override: Option<f32>,
    ) -> Result<f32, MemoryError> {
        self.scorer
            .score(created_at, role, explicit_override, self.clock.now())
    }

    /// Validate, score, embed, and store a message.
    ///
    /// Embedding failures do not fail ingestion; the message is stored with
    /// `embedding_status = failed` and is not searchable.
    pub async fn ingest(&self, input: NewMessage) -> Result<Message, MemoryError> {
        validate_identifier("tenant id", &input.tenant_id)?;
        validate_identifier("conversation id", &input.conversation_id)?;
        let role: Role = input.role.parse()?;
        let chars = input.content.chars().count();
        if input.content.trim().is_empty() {
            return Err(MemoryError::Validation("content is empty".to_string()));
        }
        if chars > self.settings.max_content_chars {
            return Err(MemoryError::Validation(format!(
                "content has {chars} characters, limit is {}",
                self.settings.max_content_chars
            )));
        }
        if let Some(value) = input.importance_override {
            validate_override(value)?;
        }

        let now = self.stamp();
        let created_at = input
            .created_at
            .map(|at| at.trunc_subsecs(TIMESTAMP_DIGITS))
            .unwrap_or(now);
        if created_at > now {
            return Err(MemoryError::Validation(format!(
                "created_at {created_at} is in the future"
            )));
        }
        let importance_score =
            self.scorer
                .score(created_at, role.as_str(), input.importance_override, now)?;

        let mut message = Message {
            id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            conversation_id: input.conversation_id,
            role,
            content: input.content,
            metadata: input
                .metadata
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            importance_score,
            embedding: None,
            embedding_status: EmbeddingStatus::Pending,
            created_at,
            updated_at: now,
            archived: false,
            archived_at: None,
        };

        if let Some(queue) = &self.queue {
            self.store.insert(message.clone()).await?;
            let queued = queue.enqueue(EmbeddingJob {
                message_id: message.id,
                tenant_id: message.tenant_id.clone(),
                text: message.content.clone(),
            });
            if !queued {
                info!(
                    "message left pending for backlog drain (tenant_id={}, message_id={})",
                    message.tenant_id, message.id
                );
            }
        } else {
            match self.embed_text(&message.content).await {
                Ok(vector) => {
                    message.embedding = Some(vector);
                    message.embedding_status = EmbeddingStatus::Completed;
                }
                Err(err) => {
                    warn!(
                        "embedding failed during ingest (tenant_id={}, message_id={}, error={})",
                        message.tenant_id, message.id, err
                    );
                    message.embedding_status = EmbeddingStatus::Failed;
                }
            }
            self.store.insert(message.clone()).await?;
        }

        self.cache.invalidate_tenant(&message.tenant_id);
        info!(
            "message ingested (tenant_id={}, message_id={}, role={}, importance={:.3}, embedding_status={})",
            message.tenant_id,
            message.id,
            message.role,
            message.importance_score,
            message.embedding_status.as_str()
        );
        Ok(message)
    }

    pub async fn get_message(&self, id: Uuid) -> Result<Message, MemoryError> {
        self.store.get(id).await?.ok_or(MemoryError::NotFound(id))
    }

    /// Rank a tenant's messages against a query vector.
    pub async fn search(
        &self,
        tenant_id: &str,
        query_vector: &[f32],
        filters: &SearchFilters,
        top_k: Option<usize>,
    ) -> Result<Vec<RetrievalResult>, MemoryError> {
        validate_identifier("tenant id", tenant_id)?;
        if query_vector.is_empty() || query_vector.iter().any(|value| !value.is_finite()) {
            return Err(MemoryError::Validation(
                "query vector must be non-empty and finite".to_string(),
            ));
        }
        if let Some(min) = filters.importance_min {
            validate_override(min)?;
        }
        let top_k = self.resolve_top_k(top_k);
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let limit = filters
            .candidate_limit
            .unwrap_or(self.settings.candidate_limit);
        let candidates = self
            .store
            .scan_candidates(
                tenant_id,
                filters.conversation_id.as_deref(),
                filters.importance_min,
                limit,
            )
            .await?;
        let results = self.ranker.rank(
            query_vector,
            &candidates,
            top_k,
            filters.importance_min,
            self.clock.now(),
        );
        debug!(
            "search finished (tenant_id={}, candidates={}, returned={})",
            tenant_id,
            candidates.len(),
            results.len()
        );
        Ok(results)
    }

    /// Embed `query` and search, using the result and embedding caches.
    pub async fn search_text(
        &self,
        tenant_id: &str,
        query: &str,
        filters: &SearchFilters,
        top_k: Option<usize>,
    ) -> Result<Vec<RetrievalResult>, MemoryError> {
        validate_identifier("tenant id", tenant_id)?;
        if query.trim().is_empty() {
            return Err(MemoryError::Validation("query is empty".to_string()));
        }
        let resolved_top_k = self.resolve_top_k(top_k);
        let key = SearchKey {
            tenant_id,
            conversation_id: filters.conversation_id.as_deref(),
            query,
            top_k: resolved_top_k,
            candidate_limit: filters
                .candidate_limit
                .unwrap_or(self.settings.candidate_limit),
            importance_min: filters.importance_min,
        };
        if let Some(results) = self.cache.search(&key) {
            debug!("search cache hit (tenant_id={tenant_id})");
            return Ok(results);
        }
        let vector = self.embed_text(query).await?;
        let results = self
            .search(tenant_id, &vector, filters, Some(resolved_top_k))
            .await?;
        self.cache.store_search(&key, results.clone());
        Ok(results)
    }

    /// Run retention with a fresh cancellation token.
    pub async fn run_retention(
        &self,
        scope: &TenantScope,
        policy_override: Option<RetentionPolicy>,
        dry_run: bool,
    ) -> Result<RetentionReport, MemoryError> {
        self.run_retention_with_cancel(scope, policy_override, dry_run, &CancellationToken::new())
            .await
    }

    /// Run retention, stopping between items once `cancel` fires.
    pub async fn run_retention_with_cancel(
        &self,
        scope: &TenantScope,
        policy_override: Option<RetentionPolicy>,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<RetentionReport, MemoryError> {
        let report = self
            .retention
            .run(scope, policy_override, dry_run, self.stamp(), cancel)
            .await?;
        if !dry_run {
            for tenant in &report.tenants {
                if tenant.outcome.archived > 0 || tenant.outcome.deleted > 0 {
                    self.cache.invalidate_tenant(&tenant.tenant_id);
                }
            }
        }
        Ok(report)
    }

    pub fn retention(&self) -> &RetentionEngine {
        &self.retention
    }

    /// Embed a queued message and record the result.
    ///
    /// Messages that are gone, archived, no longer pending, or owned by a
    /// different tenant than the job names are left alone.
    pub async fn process_embedding(&self, job: &EmbeddingJob) -> Result<EmbeddingStatus, MemoryError> {
        let Some(message) = self.store.get(job.message_id).await? else {
            debug!("embedding job for missing message (message_id={})", job.message_id);
            return Ok(EmbeddingStatus::Failed);
        };
        if message.tenant_id != job.tenant_id {
            warn!(
                "embedding job tenant mismatch, skipped (message_id={}, job_tenant_id={}, tenant_id={})",
                job.message_id, job.tenant_id, message.tenant_id
            );
            return Ok(message.embedding_status);
        }
        if message.archived || message.embedding_status != EmbeddingStatus::Pending {
            return Ok(message.embedding_status);
        }
        let update = match self.embed_text(&job.text).await {
            Ok(vector) => MessageUpdate::embedded(vector),
            Err(err) => {
                warn!(
                    "embedding failed (tenant_id={}, message_id={}, error={})",
                    job.tenant_id, job.message_id, err
                );
                MessageUpdate::embedding_failed()
            }
        };
        let updated = self
            .store
            .update(job.message_id, update, self.stamp())
            .await?;
        self.cache.invalidate_tenant(&updated.tenant_id);
        Ok(updated.embedding_status)
    }

    /// Process up to `limit` stored messages still marked `pending`.
    ///
    /// A failing message is logged and skipped; the count covers the
    /// messages processed without error.
    pub async fn drain_pending(&self, limit: usize) -> Result<usize, MemoryError> {
        let pending = self.store.pending_embeddings(limit).await?;
        let mut processed = 0;
        let mut failed = 0;
        for message in pending {
            let job = EmbeddingJob {
                message_id: message.id,
                tenant_id: message.tenant_id,
                text: message.content,
            };
            match self.process_embedding(&job).await {
                Ok(_) => processed += 1,
                Err(err) => {
                    failed += 1;
                    warn!(
                        "pending embedding failed (tenant_id={}, message_id={}, error={})",
                        job.tenant_id, job.message_id, err
                    );
                }
            }
        }
        if processed > 0 || failed > 0 {
            info!("drained pending embeddings (processed={processed}, failed={failed})");
        }
        Ok(processed)
    }

    /// Current time at the precision every store persists.
    fn stamp(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(TIMESTAMP_DIGITS)
    }

    fn resolve_top_k(&self, top_k: Option<usize>) -> usize {
        top_k
            .unwrap_or(self.settings.default_top_k)
            .min(self.settings.max_top_k)
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Some(vector) = self.cache.embedding(text) {
            return Ok(vector);
        }
        let vector = self.embedder.embed(text).await?;
        check_dimension(&vector, self.embedder.dimension())?;
        self.cache.store_embedding(text, vector.clone());
        Ok(vector)
    }
}
