//! Background embedding queue.
//!
//! Ingestion in async mode stores the message as `pending` and enqueues a job;
//! an [`EmbeddingWorker`] consumes jobs and writes the vector back. Jobs that
//! never reach the channel stay `pending` in the store; a running worker
//! drains them on every backlog tick, and [`EmbeddingWorker::drain_once`]
//! does the same on demand.

use crate::service::MemoryService;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unit of embedding work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingJob {
    pub message_id: Uuid,
    pub tenant_id: String,
    pub text: String,
}

/// Producer side of the queue.
#[derive(Debug, Clone)]
pub struct EmbeddingQueue {
    sender: mpsc::Sender<EmbeddingJob>,
}

/// Consumer side of the queue.
pub struct EmbeddingReceiver {
    receiver: mpsc::Receiver<EmbeddingJob>,
}

/// Bounded queue with room for `capacity` jobs.
pub fn embedding_queue(capacity: usize) -> (EmbeddingQueue, EmbeddingReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (EmbeddingQueue { sender }, EmbeddingReceiver { receiver })
}

impl EmbeddingQueue {
    /// Enqueue without waiting. Returns false when the queue is full or closed.
    pub fn enqueue(&self, job: EmbeddingJob) -> bool {
        let message_id = job.message_id;
        match self.sender.try_send(job) {
            Ok(()) => {
                debug!("embedding job queued (message_id={message_id})");
                true
            }
            Err(err) => {
                warn!("embedding job not queued (message_id={message_id}, error={err})");
                false
            }
        }
    }
}

/// Consumes embedding jobs on behalf of a [`MemoryService`].
pub struct EmbeddingWorker {
    service: Arc<MemoryService>,
    receiver: EmbeddingReceiver,
    drain_batch: usize,
    drain_interval: Duration,
}

/// Default period between backlog drains of a running worker.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(10);

impl EmbeddingWorker {
    pub fn new(service: Arc<MemoryService>, receiver: EmbeddingReceiver) -> Self {
        Self {
            service,
            receiver,
            drain_batch: 100,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
        }
    }

    pub fn with_drain_batch(mut self, drain_batch: usize) -> Self {
        self.drain_batch = drain_batch.max(1);
        self
    }

    /// Period between sweeps for `pending` rows whose job never reached the queue.
    pub fn with_drain_interval(mut self, drain_interval: Duration) -> Self {
        self.drain_interval = drain_interval.max(Duration::from_millis(1));
        self
    }

    /// Process jobs until cancelled or every producer is dropped.
    ///
    /// Stored `pending` rows are drained at start and then on every
    /// backlog tick, which recovers jobs rejected by a full queue.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "embedding worker started (drain_interval_ms={}, drain_batch={})",
            self.drain_interval.as_millis(),
            self.drain_batch
        );
        let mut backlog = tokio::time::interval(self.drain_interval);
        backlog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let wake = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = backlog.tick() => Wake::Backlog,
                job = self.receiver.receiver.recv() => Wake::Job(job),
            };
            match wake {
                Wake::Backlog => {
                    if let Err(err) = self.service.drain_pending(self.drain_batch).await {
                        warn!("embedding backlog drain failed (error={err})");
                    }
                }
                Wake::Job(Some(job)) => {
                    self.process(&job).await;
                }
                Wake::Job(None) => break,
            }
        }
        info!("embedding worker stopped");
    }

    /// Process queued jobs and stored `pending` rows once, without waiting.
    pub async fn drain_once(&mut self) -> Result<usize, crate::MemoryError> {
        let mut processed = 0;
        while let Ok(job) = self.receiver.receiver.try_recv() {
            if self.process(&job).await {
                processed += 1;
            }
        }
        processed += self.service.drain_pending(self.drain_batch).await?;
        Ok(processed)
    }

    async fn process(&self, job: &EmbeddingJob) -> bool {
        match self.service.process_embedding(job).await {
            Ok(_) => true,
            Err(err) => {
                warn!(
                    "embedding job failed (message_id={}, tenant_id={}, error={})",
                    job.message_id, job.tenant_id, err
                );
                false
            }
        }
    }
}

enum Wake {
    Backlog,
    Job(Option<EmbeddingJob>),
}
