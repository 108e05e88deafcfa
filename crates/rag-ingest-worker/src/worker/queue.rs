use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::{IngestJobRow, Repository};

/// Durable ingest queue (C6). Wraps the `ingest_jobs` table claim/
/// complete/fail operations so `Worker`'s poll loop doesn't talk to
/// `Repository` directly — keeps the SQL and the retry/backoff policy
/// in one seam.
pub struct JobQueue {
    repository: Arc<Repository>,
    max_attempts: i32,
    base_backoff_seconds: i64,
}

impl JobQueue {
    pub fn new(repository: Arc<Repository>, max_attempts: i32, base_backoff_seconds: i64) -> Self {
        Self {
            repository,
            max_attempts,
            base_backoff_seconds,
        }
    }

    pub async fn claim_next(&self) -> Result<Option<IngestJobRow>> {
        self.repository.claim_next_job().await
    }

    pub async fn complete(&self, job_id: Uuid) -> Result<()> {
        self.repository.complete_job(job_id).await
    }

    /// Returns `true` if the job was dead-lettered (no further retries
    /// will be attempted), `false` if it was re-queued with backoff.
    pub async fn fail(&self, job_id: Uuid, attempts: i32, error: &str) -> Result<bool> {
        self.repository
            .fail_job(job_id, attempts, self.max_attempts, self.base_backoff_seconds, error)
            .await
    }
}
