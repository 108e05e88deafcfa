use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use uuid::Uuid;

use super::models::{ChunkInsert, DocumentRow, IngestJobRow};
use super::DbPool;

pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    // ==================== Documents ====================

    pub async fn get_document(&self, document_id: Uuid) -> Result<Option<DocumentRow>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"SELECT id, workspace_id, title, storage_key, content_type
               FROM documents WHERE id = $1"#,
        )
        .bind(document_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row)
    }

    pub async fn mark_document_processing(&self, document_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE documents SET status = 'processing', updated_at = now() WHERE id = $1")
            .bind(document_id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    pub async fn mark_document_done(&self, document_id: Uuid, chunk_count: i64) -> Result<()> {
        sqlx::query(
            r#"UPDATE documents SET status = 'done', chunk_count = $2, error_message = NULL,
               updated_at = now() WHERE id = $1"#,
        )
        .bind(document_id)
        .bind(chunk_count as i32)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    pub async fn mark_document_failed(&self, document_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"UPDATE documents SET status = 'failed', error_message = $2, updated_at = now()
               WHERE id = $1"#,
        )
        .bind(document_id)
        .bind(error)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    // ==================== Chunks ====================

    /// Idempotent per-chunk upsert keyed on `(document_id, chunk_index)`
    /// (step 5 of the ingestion state machine): a retry after a crash
    /// mid-write re-applies the same rows rather than losing whatever had
    /// already landed from a prior attempt. Chunks past the new chunk
    /// count (the document shrank on reprocess) are deleted once the
    /// upsert commits.
    pub async fn upsert_chunks(&self, document_id: Uuid, chunks: Vec<ChunkInsert>) -> Result<()> {
        let chunk_count = chunks.len();
        let mut transaction = self.pool.get_pool().begin().await?;

        for chunk in &chunks {
            sqlx::query(
                r#"INSERT INTO chunks
                   (id, workspace_id, document_id, document_title, chunk_index, content,
                    token_count, embedding)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                   ON CONFLICT (document_id, chunk_index) DO UPDATE SET
                       content = EXCLUDED.content,
                       token_count = EXCLUDED.token_count,
                       embedding = EXCLUDED.embedding,
                       document_title = EXCLUDED.document_title"#,
            )
            .bind(chunk.id)
            .bind(chunk.workspace_id)
            .bind(chunk.document_id)
            .bind(&chunk.document_title)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(chunk.token_count)
            .bind(&chunk.embedding)
            .execute(&mut *transaction)
            .await?;
        }

        sqlx::query("DELETE FROM chunks WHERE document_id = $1 AND chunk_index >= $2")
            .bind(document_id)
            .bind(chunk_count as i32)
            .execute(&mut *transaction)
            .await?;

        transaction.commit().await?;
        tracing::debug!(chunk_count, "upserted chunks");

        Ok(())
    }

    // ==================== Durable ingest queue (C6) ====================

    /// Claim the oldest visible job. `FOR UPDATE SKIP LOCKED` lets a pool
    /// of worker processes all run this query concurrently without
    /// blocking on each other or double-claiming a row.
    pub async fn claim_next_job(&self) -> Result<Option<IngestJobRow>> {
        let mut tx = self.pool.get_pool().begin().await?;

        let claimed = sqlx::query_as::<_, IngestJobRow>(
            r#"SELECT id, document_id, status, attempts FROM ingest_jobs
               WHERE status IN ('queued', 'retrying') AND next_visible_at <= now()
               ORDER BY next_visible_at
               FOR UPDATE SKIP LOCKED
               LIMIT 1"#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = claimed else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            "UPDATE ingest_jobs SET status = 'processing', attempts = attempts + 1, updated_at = now() WHERE id = $1",
        )
        .bind(job.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(IngestJobRow {
            attempts: job.attempts + 1,
            ..job
        }))
    }

    pub async fn complete_job(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE ingest_jobs SET status = 'done', updated_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    /// Re-queue a failed job with exponential backoff, or dead-letter it
    /// once `max_attempts` is exhausted so a poison document can't spin
    /// the worker forever. Returns `true` when the job was dead-lettered
    /// — the only outcome the caller should treat as a terminal document
    /// failure, since every other outcome means the job will be retried.
    pub async fn fail_job(
        &self,
        job_id: Uuid,
        attempts: i32,
        max_attempts: i32,
        base_backoff_seconds: i64,
        error: &str,
    ) -> Result<bool> {
        if attempts >= max_attempts {
            sqlx::query(
                r#"UPDATE ingest_jobs SET status = 'dead_letter', last_error = $2, updated_at = now()
                   WHERE id = $1"#,
            )
            .bind(job_id)
            .bind(error)
            .execute(self.pool.get_pool())
            .await?;
            return Ok(true);
        }

        const MAX_BACKOFF_SECONDS: i64 = 300;

        let exponential = base_backoff_seconds.saturating_mul(2i64.pow(attempts.max(0) as u32));
        let jitter = rand::rng().random_range(0..=base_backoff_seconds.max(1));
        let backoff_seconds = exponential.saturating_add(jitter).min(MAX_BACKOFF_SECONDS);
        let next_visible_at = Utc::now() + ChronoDuration::seconds(backoff_seconds);

        sqlx::query(
            r#"UPDATE ingest_jobs SET status = 'retrying', last_error = $2, next_visible_at = $3,
               updated_at = now() WHERE id = $1"#,
        )
        .bind(job_id)
        .bind(error)
        .bind(next_visible_at)
        .execute(self.pool.get_pool())
        .await?;

        Ok(false)
    }
}
