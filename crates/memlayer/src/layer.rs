//! Config-driven assembly of the service and its background tasks.

use crate::convert::{
    BootstrapError, cache_settings, configured_policies, embedding_provider, service_settings,
};
use directories::ProjectDirs;
use log::{debug, info, warn};
use memlayer_config::{MemlayerConfig, StoreConfig, StoreProviderKind};
use memlayer_core::{
    ChainedPolicies, EmbeddingProvider, EmbeddingReceiver, EmbeddingWorker, FileMemoryStore,
    InMemoryStore, MemoryService, MemoryStore, PolicySource, RetentionScheduler, SearchCache,
    SqliteMemoryStore, embedding_queue,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A configured [`MemoryService`] plus the embedding worker and retention
/// scheduler the config asks for.
pub struct MemoryLayer {
    service: Arc<MemoryService>,
    receiver: Option<EmbeddingReceiver>,
    retention_interval: Option<Duration>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
    scheduler: Option<JoinHandle<usize>>,
}

impl MemoryLayer {
    /// Build from config, resolving the embedding api key from the process environment.
    pub fn from_config(config: &MemlayerConfig) -> Result<Self, BootstrapError> {
        let embedder = embedding_provider(&config.embedding, |name| std::env::var(name).ok())?;
        Self::with_embedder(config, embedder)
    }

    /// Build from config with an explicit embedding provider.
    pub fn with_embedder(
        config: &MemlayerConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, BootstrapError> {
        let (store, stored_policies) = open_store(&config.store)?;
        let policies: Arc<dyn PolicySource> = Arc::new(ChainedPolicies::new(
            stored_policies,
            Arc::new(configured_policies(&config.retention)),
        ));
        let mut builder = MemoryService::builder(store, embedder)
            .policies(policies)
            .cache(SearchCache::new(cache_settings(&config.cache)))
            .settings(service_settings(config));

        let mut receiver = None;
        if config.embedding.async_mode {
            let (queue, rx) = embedding_queue(config.embedding.queue_capacity);
            builder = builder.queue(queue);
            receiver = Some(rx);
        }
        let retention_interval = config
            .retention
            .enabled
            .then(|| Duration::from_secs(config.retention.interval_secs.max(1)));

        info!(
            "memory layer ready (store={:?}, async_embeddings={}, retention_enabled={})",
            config.store.provider, config.embedding.async_mode, config.retention.enabled
        );
        Ok(Self {
            service: Arc::new(builder.build()),
            receiver,
            retention_interval,
            cancel: CancellationToken::new(),
            worker: None,
            scheduler: None,
        })
    }

    pub fn service(&self) -> &Arc<MemoryService> {
        &self.service
    }

    /// Token observed by the background tasks.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the embedding worker and retention scheduler, if configured.
    /// Calling this twice does not start duplicates.
    pub fn start(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            let worker = EmbeddingWorker::new(self.service.clone(), receiver);
            self.worker = Some(tokio::spawn(worker.run(self.cancel.clone())));
            debug!("embedding worker spawned");
        }
        if self.scheduler.is_none()
            && let Some(interval) = self.retention_interval
        {
            let scheduler = RetentionScheduler::new(self.service.clone(), interval);
            self.scheduler = Some(scheduler.spawn(self.cancel.clone()));
            debug!(
                "retention scheduler spawned (interval_secs={})",
                interval.as_secs()
            );
        }
    }

    /// Cancel background tasks and wait for them. Returns the number of
    /// completed scheduled retention runs.
    pub async fn shutdown(mut self) -> usize {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take()
            && let Err(err) = worker.await
        {
            warn!("embedding worker did not stop cleanly (error={err})");
        }
        let mut runs = 0;
        if let Some(scheduler) = self.scheduler.take() {
            match scheduler.await {
                Ok(count) => runs = count,
                Err(err) => warn!("retention scheduler did not stop cleanly (error={err})"),
            }
        }
        info!("memory layer stopped (retention_runs={runs})");
        runs
    }
}

type OpenedStore = (Arc<dyn MemoryStore>, Arc<dyn PolicySource>);

fn open_store(config: &StoreConfig) -> Result<OpenedStore, BootstrapError> {
    match config.provider {
        StoreProviderKind::Memory => {
            let store = Arc::new(InMemoryStore::new());
            Ok((store.clone(), store))
        }
        StoreProviderKind::File => {
            let root = store_path(config, "file", "store")?;
            info!("opening file store (root={})", root.display());
            let store = Arc::new(FileMemoryStore::new(&root)?);
            Ok((store.clone(), store))
        }
        StoreProviderKind::Sqlite => {
            let path = store_path(config, "sqlite", "memlayer.db")?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(memlayer_core::StoreError::from)?;
            }
            info!("opening sqlite store (path={})", path.display());
            let store = Arc::new(SqliteMemoryStore::open(&path)?);
            Ok((store.clone(), store))
        }
    }
}

fn store_path(
    config: &StoreConfig,
    kind: &'static str,
    default_name: &str,
) -> Result<PathBuf, BootstrapError> {
    if let Some(path) = config.path.as_deref().filter(|path| !path.trim().is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let dirs = ProjectDirs::from("", "", "memlayer").ok_or(BootstrapError::NoDataDir(kind))?;
    Ok(dirs.data_dir().join(default_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn explicit_store_path_wins() {
        let config = StoreConfig {
            provider: StoreProviderKind::Sqlite,
            path: Some("/tmp/memlayer-test.db".to_string()),
        };
        assert_eq!(
            store_path(&config, "sqlite", "memlayer.db").expect("path"),
            PathBuf::from("/tmp/memlayer-test.db")
        );
    }

    #[test]
    fn blank_store_path_uses_default_name() {
        let config = StoreConfig {
            provider: StoreProviderKind::File,
            path: Some("  ".to_string()),
        };
        if let Ok(path) = store_path(&config, "file", "store") {
            assert!(path.ends_with("store"));
        }
    }
}
