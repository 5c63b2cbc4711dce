//! Memory ranking and lifecycle engine: importance scoring, hybrid retrieval
//! ranking, and tenant-scoped retention over a pluggable message store.

pub mod cache;
pub mod clock;
pub mod embedding;
pub mod error;
pub mod importance;
pub mod model;
pub mod policy;
pub mod queue;
pub mod ranking;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod store;

pub use cache::{CacheSettings, SearchCache};
pub use clock::{Clock, SystemClock};
pub use embedding::{
    EmbeddingError, EmbeddingProvider, HashEmbeddingProvider, OpenAiEmbeddingConfig,
    OpenAiEmbeddingProvider,
};
pub use error::MemoryError;
pub use importance::{ImportanceScorer, ImportanceWeights};
pub use model::{
    EmbeddingStatus, Message, MessageUpdate, NewMessage, RetrievalResult, Role, SearchFilters,
};
pub use policy::{
    ChainedPolicies, PolicyOrigin, PolicySource, RetentionPolicy, StaticPolicies, WILDCARD_TENANT,
};
pub use queue::{
    DEFAULT_DRAIN_INTERVAL, EmbeddingJob, EmbeddingQueue, EmbeddingReceiver, EmbeddingWorker,
    embedding_queue,
};
pub use ranking::{RankingWeights, RetrievalRanker, cosine_similarity};
pub use retention::{
    ApplyOutcome, RetentionEngine, RetentionPlan, RetentionReport, TenantReport, TenantScope,
};
pub use scheduler::{MIN_RETENTION_INTERVAL, RetentionScheduler};
pub use service::{MemoryService, MemoryServiceBuilder, ServiceSettings};
pub use store::{
    ArchiveOutcome, FileMemoryStore, InMemoryStore, MemoryStore, MessageQuery, SqliteMemoryStore,
    StoreError,
};
