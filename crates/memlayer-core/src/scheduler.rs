//! Periodic retention over every tenant.

use crate::error::MemoryError;
use crate::retention::TenantScope;
use crate::service::MemoryService;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Shortest period between scheduled runs.
pub const MIN_RETENTION_INTERVAL: Duration = Duration::from_secs(1);

/// Runs wildcard retention on a fixed interval until cancelled.
pub struct RetentionScheduler {
    service: Arc<MemoryService>,
    interval: Duration,
    dry_run: bool,
}

impl RetentionScheduler {
    /// Periods shorter than [`MIN_RETENTION_INTERVAL`] are raised to it.
    pub fn new(service: Arc<MemoryService>, interval: Duration) -> Self {
        Self {
            service,
            interval: interval.max(MIN_RETENTION_INTERVAL),
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Spawn the loop on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<usize> {
        tokio::spawn(self.run(cancel))
    }

    /// Tick until cancelled, returning the number of completed runs.
    /// The first run happens immediately.
    pub async fn run(self, cancel: CancellationToken) -> usize {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs = 0;
        info!(
            "retention scheduler started (interval_secs={}, dry_run={})",
            self.interval.as_secs(),
            self.dry_run
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self
                .service
                .run_retention_with_cancel(&TenantScope::All, None, self.dry_run, &cancel)
                .await
            {
                Ok(report) => {
                    runs += 1;
                    debug!(
                        "scheduled retention finished (archived={}, deleted={}, failed={})",
                        report.archived(),
                        report.deleted(),
                        report.failed()
                    );
                }
                Err(MemoryError::NoTenants) => {
                    runs += 1;
                    debug!("scheduled retention found no tenants");
                }
                Err(err) => warn!("scheduled retention failed (error={err})"),
            }
        }
        info!("retention scheduler stopped (runs={runs})");
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingProvider;
    use crate::store::InMemoryStore;
    use pretty_assertions::assert_eq;

    fn service() -> Arc<MemoryService> {
        let embedder = HashEmbeddingProvider::new(4).expect("provider");
        Arc::new(MemoryService::builder(Arc::new(InMemoryStore::new()), Arc::new(embedder)).build())
    }

    #[test]
    fn zero_interval_is_raised_to_minimum() {
        let scheduler = RetentionScheduler::new(service(), Duration::ZERO);
        assert_eq!(scheduler.interval, MIN_RETENTION_INTERVAL);
    }

    #[tokio::test]
    async fn zero_interval_scheduler_runs_and_stops() {
        let cancel = CancellationToken::new();
        let handle = RetentionScheduler::new(service(), Duration::ZERO).spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        assert_eq!(handle.await.expect("scheduler joined"), 1);
    }
}
