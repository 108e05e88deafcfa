pub mod processor;
pub mod queue;

pub use processor::DocumentProcessor;
pub use queue::JobQueue;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::database::{DbPool, NotificationListener, Repository};
use crate::embedding::EmbeddingService;
use crate::storage::FsStorage;
use crate::utils::metrics::Metrics;

pub struct Worker {
    settings: Settings,
    repository: Arc<Repository>,
    listener: NotificationListener,
    queue: Arc<JobQueue>,
    processor: Arc<DocumentProcessor>,
    metrics: Metrics,
}

impl Worker {
    pub async fn new(settings: Settings, db_pool: DbPool) -> Result<Self> {
        let repository = Arc::new(Repository::new(db_pool));

        let listener = NotificationListener::new(
            settings.database.clone(),
            settings.database.listen_channel.clone(),
        );

        let queue = Arc::new(JobQueue::new(
            repository.clone(),
            settings.worker.max_attempts,
            settings.worker.base_backoff_seconds,
        ));

        let storage = Arc::new(FsStorage::new(&settings.storage));
        let embedding = Arc::new(EmbeddingService::new(settings.embedding.clone()));
        let metrics = Metrics::new();

        let processor = Arc::new(DocumentProcessor::new(
            settings.clone(),
            repository.clone(),
            storage,
            embedding,
            metrics.clone(),
        ));

        Ok(Self {
            settings,
            repository,
            listener,
            queue,
            processor,
            metrics,
        })
    }

    /// Main worker loop: a durable-queue poll, woken early by LISTEN/
    /// NOTIFY when it fires but never dependent on it. Shuts down
    /// cleanly on Ctrl-C.
    pub async fn run(self) -> Result<()> {
        info!("ingest worker started");

        let mut notification_rx = self.listener.start().await?;
        let poll_interval = Duration::from_millis(self.settings.worker.poll_interval_ms);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                notification = notification_rx.recv() => {
                    if notification.is_none() {
                        warn!("notification channel closed, continuing on poll interval alone");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal");
                    break;
                }
            }

            self.drain_available_jobs().await;
        }

        self.metrics.print_summary();
        info!("ingest worker stopped");
        Ok(())
    }

    async fn drain_available_jobs(&self) {
        loop {
            let job = match self.queue.claim_next().await {
                Ok(Some(job)) => job,
                Ok(None) => return,
                Err(e) => {
                    error!(error = %e, "failed to claim next ingest job");
                    return;
                }
            };

            match self.processor.process_document(job.document_id).await {
                Ok(()) => {
                    if let Err(e) = self.queue.complete(job.id).await {
                        error!(job_id = %job.id, error = %e, "failed to mark job complete");
                    }
                    info!(document_id = %job.document_id, "document ingested");
                }
                Err(e) => {
                    error!(document_id = %job.document_id, error = %e, "document ingestion failed");
                    match self.queue.fail(job.id, job.attempts, &e.to_string()).await {
                        Ok(dead_lettered) => {
                            // Only a dead-lettered job is a terminal document
                            // failure; a job still queued for retry will
                            // attempt processing again, and the document
                            // should stay in `processing` until it does.
                            if dead_lettered {
                                if let Err(mark_err) = self
                                    .repository
                                    .mark_document_failed(job.document_id, &e.to_string())
                                    .await
                                {
                                    error!(error = %mark_err, "failed to mark document failed");
                                }
                            }
                        }
                        Err(queue_err) => {
                            error!(job_id = %job.id, error = %queue_err, "failed to record job failure");
                        }
                    }
                }
            }
        }
    }
}
