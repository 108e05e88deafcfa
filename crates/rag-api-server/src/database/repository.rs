use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use pgvector::Vector;
use serde_json::json;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use super::models::{
    ChatMessageRow, ChatSessionRow, ChunkSearchRow, DocumentRow, EmbedCodeRow, SubscriptionRow,
    WorkspaceRow,
};
use super::DbPool;
use crate::domain::{Citation, MessageRole};
use crate::utils::error::{ApiError, QuotaExceededInfo};

pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Cheapest possible round trip to the database, used by the
    /// readiness probe. Any query failure (pool exhausted, connection
    /// refused, auth rejected) is surfaced to the caller as not-ready.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(self.pool.get_pool()).await?;
        Ok(())
    }

    pub async fn get_workspace(&self, workspace_id: Uuid) -> Result<Option<WorkspaceRow>> {
        let row = sqlx::query_as::<_, WorkspaceRow>(
            "SELECT id, name, created_at FROM workspaces WHERE id = $1",
        )
        .bind(workspace_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row)
    }

    // ==================== Quota (C11) ====================

    /// Atomically reserve one query against the workspace's subscription.
    /// Locks the subscription row for the duration of the transaction so
    /// concurrent reservers never observe `queries_used` exceeding
    /// `query_quota`. Rolls the billing period over first if it has
    /// elapsed, so a reservation against a stale period always sees a
    /// freshly-reset counter rather than one pinned against the old
    /// `period_end`. `query_quota = NULL` means the plan is unlimited.
    /// Returns the post-reservation snapshot on success.
    pub async fn reserve_query(
        &self,
        workspace_id: Uuid,
    ) -> Result<Result<SubscriptionRow, ApiError>> {
        let mut tx = self.pool.get_pool().begin().await?;

        let current = sqlx::query_as::<_, SubscriptionRow>(
            r#"SELECT workspace_id, plan, query_quota, queries_used, period_start, period_end
               FROM subscriptions WHERE workspace_id = $1 FOR UPDATE"#,
        )
        .bind(workspace_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            tx.rollback().await?;
            return Ok(Err(ApiError::NotFound(format!(
                "no subscription for workspace {workspace_id}"
            ))));
        };

        let current = if current.period_end <= Utc::now() {
            Self::rollover_in_tx(&mut tx, &current).await?
        } else {
            current
        };

        if let Some(quota) = current.query_quota {
            if current.queries_used >= quota {
                tx.rollback().await?;
                return Ok(Err(ApiError::QuotaExceeded(QuotaExceededInfo {
                    limit: quota,
                    used: current.queries_used,
                })));
            }
        }

        let updated = sqlx::query_as::<_, SubscriptionRow>(
            r#"UPDATE subscriptions SET queries_used = queries_used + 1
               WHERE workspace_id = $1
               RETURNING workspace_id, plan, query_quota, queries_used, period_start, period_end"#,
        )
        .bind(workspace_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(
            workspace_id = %workspace_id,
            used = updated.queries_used,
            limit = ?updated.query_quota,
            "reserved query"
        );

        Ok(Ok(updated))
    }

    /// `rollover(workspace_id)` (spec §4.11): if the current period has
    /// elapsed, advance `period_start`/`period_end` by one 30-day period
    /// and reset `queries_used` to zero. Idempotent — a subscription
    /// whose `period_end` is still in the future is returned unchanged.
    /// Takes the row already locked by the caller's transaction so the
    /// rollover and the reservation it enables commit atomically.
    async fn rollover_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        current: &SubscriptionRow,
    ) -> Result<SubscriptionRow> {
        let new_period_start = current.period_end;
        let new_period_end = new_period_start + ChronoDuration::days(30);

        let rolled = sqlx::query_as::<_, SubscriptionRow>(
            r#"UPDATE subscriptions
               SET period_start = $2, period_end = $3, queries_used = 0
               WHERE workspace_id = $1
               RETURNING workspace_id, plan, query_quota, queries_used, period_start, period_end"#,
        )
        .bind(current.workspace_id)
        .bind(new_period_start)
        .bind(new_period_end)
        .fetch_one(&mut **tx)
        .await?;

        debug!(workspace_id = %current.workspace_id, "subscription period rolled over");
        Ok(rolled)
    }

    /// Public entry point for rolling a subscription over outside of a
    /// reservation (e.g. an operator-triggered reset, or a scheduled
    /// sweep). No-op if the period hasn't elapsed yet.
    pub async fn rollover(&self, workspace_id: Uuid) -> Result<Option<SubscriptionRow>> {
        let mut tx = self.pool.get_pool().begin().await?;

        let current = sqlx::query_as::<_, SubscriptionRow>(
            r#"SELECT workspace_id, plan, query_quota, queries_used, period_start, period_end
               FROM subscriptions WHERE workspace_id = $1 FOR UPDATE"#,
        )
        .bind(workspace_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            tx.rollback().await?;
            return Ok(None);
        };

        if current.period_end > Utc::now() {
            tx.rollback().await?;
            return Ok(Some(current));
        }

        let rolled = Self::rollover_in_tx(&mut tx, &current).await?;
        tx.commit().await?;
        Ok(Some(rolled))
    }

    /// Refund a reservation made by [`reserve_query`] when orchestration
    /// fails before producing a billable answer (generator unavailable,
    /// deadline exceeded with no persisted message).
    pub async fn refund_query(&self, workspace_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE subscriptions SET queries_used = GREATEST(queries_used - 1, 0) WHERE workspace_id = $1",
        )
        .bind(workspace_id)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    // ==================== Documents ====================

    pub async fn list_documents(&self, workspace_id: Uuid) -> Result<Vec<DocumentRow>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"SELECT id, workspace_id, title, storage_key, content_type, size_bytes,
                      status, error_message, chunk_count, created_at, updated_at
               FROM documents WHERE workspace_id = $1 ORDER BY created_at DESC"#,
        )
        .bind(workspace_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows)
    }

    pub async fn get_document(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<DocumentRow>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"SELECT id, workspace_id, title, storage_key, content_type, size_bytes,
                      status, error_message, chunk_count, created_at, updated_at
               FROM documents WHERE workspace_id = $1 AND id = $2"#,
        )
        .bind(workspace_id)
        .bind(document_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row)
    }

    pub async fn insert_document(
        &self,
        workspace_id: Uuid,
        title: &str,
        storage_key: &str,
        content_type: &str,
        size_bytes: i64,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO documents
               (id, workspace_id, title, storage_key, content_type, size_bytes, status, chunk_count, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, now(), now())"#,
        )
        .bind(id)
        .bind(workspace_id)
        .bind(title)
        .bind(storage_key)
        .bind(content_type)
        .bind(size_bytes)
        .execute(self.pool.get_pool())
        .await?;

        Ok(id)
    }

    // ==================== Retrieval (C7) ====================

    /// Dense side: cosine-nearest chunks within the workspace, score in
    /// `[0, 1]` (`1 - cosine_distance`). `document_ids`, when `Some`,
    /// restricts the search to that subset of the workspace's documents.
    pub async fn dense_search(
        &self,
        workspace_id: Uuid,
        embedding: Vector,
        limit: i64,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<ChunkSearchRow>> {
        let rows = sqlx::query_as::<_, ChunkSearchRow>(
            r#"SELECT id, workspace_id, document_id, document_title, chunk_index, content,
                      token_count, (1 - (embedding <=> $2)) AS score
               FROM chunks
               WHERE workspace_id = $1
                 AND ($4::uuid[] IS NULL OR document_id = ANY($4))
               ORDER BY embedding <=> $2
               LIMIT $3"#,
        )
        .bind(workspace_id)
        .bind(embedding)
        .bind(limit)
        .bind(document_ids)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows)
    }

    /// Lexical side: Postgres full-text rank within the workspace.
    pub async fn lexical_search(
        &self,
        workspace_id: Uuid,
        query_text: &str,
        limit: i64,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<ChunkSearchRow>> {
        let rows = sqlx::query_as::<_, ChunkSearchRow>(
            r#"SELECT id, workspace_id, document_id, document_title, chunk_index, content,
                      token_count,
                      ts_rank(content_tsv, plainto_tsquery('simple', $2)) AS score
               FROM chunks
               WHERE workspace_id = $1 AND content_tsv @@ plainto_tsquery('simple', $2)
                 AND ($4::uuid[] IS NULL OR document_id = ANY($4))
               ORDER BY score DESC
               LIMIT $3"#,
        )
        .bind(workspace_id)
        .bind(query_text)
        .bind(limit)
        .bind(document_ids)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows)
    }

    pub async fn count_chunks(&self, workspace_id: Uuid) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM chunks WHERE workspace_id = $1")
            .bind(workspace_id)
            .fetch_one(self.pool.get_pool())
            .await?;

        Ok(row.get("count"))
    }

    // ==================== Session Store (C10) ====================

    pub async fn create_session(&self, workspace_id: Uuid) -> Result<ChatSessionRow> {
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, ChatSessionRow>(
            r#"INSERT INTO chat_sessions (id, workspace_id, title, created_at, updated_at)
               VALUES ($1, $2, NULL, now(), now())
               RETURNING id, workspace_id, title, created_at, updated_at"#,
        )
        .bind(id)
        .bind(workspace_id)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(row)
    }

    pub async fn get_session(
        &self,
        workspace_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<ChatSessionRow>> {
        let row = sqlx::query_as::<_, ChatSessionRow>(
            "SELECT id, workspace_id, title, created_at, updated_at FROM chat_sessions WHERE workspace_id = $1 AND id = $2",
        )
        .bind(workspace_id)
        .bind(session_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row)
    }

    pub async fn get_session_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessageRow>> {
        let rows = sqlx::query_as::<_, ChatMessageRow>(
            r#"SELECT id, session_id, role, content, sources, created_at
               FROM chat_messages WHERE session_id = $1 ORDER BY created_at ASC"#,
        )
        .bind(session_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows)
    }

    pub async fn append_message(
        &self,
        session_id: Uuid,
        role: MessageRole,
        content: &str,
        sources: &[Citation],
    ) -> Result<ChatMessageRow> {
        let id = Uuid::new_v4();
        let role_str = match role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        let sources_json = json!(sources);

        let mut tx = self.pool.get_pool().begin().await?;

        let row = sqlx::query_as::<_, ChatMessageRow>(
            r#"INSERT INTO chat_messages (id, session_id, role, content, sources, created_at)
               VALUES ($1, $2, $3, $4, $5, now())
               RETURNING id, session_id, role, content, sources, created_at"#,
        )
        .bind(id)
        .bind(session_id)
        .bind(role_str)
        .bind(content)
        .bind(sources_json)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE chat_sessions SET updated_at = now() WHERE id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(row)
    }

    // ==================== Embed Code Issuer (C13) ====================

    pub async fn insert_embed_code(
        &self,
        workspace_id: Uuid,
        key_hash: &str,
        allowed_origins: &[String],
    ) -> Result<EmbedCodeRow> {
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, EmbedCodeRow>(
            r#"INSERT INTO embed_codes (id, workspace_id, key_hash, allowed_origins, revoked, created_at)
               VALUES ($1, $2, $3, $4, false, now())
               RETURNING id, workspace_id, key_hash, allowed_origins, revoked, created_at"#,
        )
        .bind(id)
        .bind(workspace_id)
        .bind(key_hash)
        .bind(allowed_origins)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(row)
    }

    pub async fn get_embed_code_by_hash(&self, key_hash: &str) -> Result<Option<EmbedCodeRow>> {
        let row = sqlx::query_as::<_, EmbedCodeRow>(
            "SELECT id, workspace_id, key_hash, allowed_origins, revoked, created_at FROM embed_codes WHERE key_hash = $1",
        )
        .bind(key_hash)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row)
    }

    /// Swap the stored hash for a new one while keeping the same id,
    /// workspace, and allowed origins. Returns `None` if the code
    /// doesn't exist or was revoked — rotation does not resurrect a
    /// revoked code.
    pub async fn rotate_embed_code(
        &self,
        workspace_id: Uuid,
        embed_id: Uuid,
        new_key_hash: &str,
    ) -> Result<Option<EmbedCodeRow>> {
        let row = sqlx::query_as::<_, EmbedCodeRow>(
            r#"UPDATE embed_codes SET key_hash = $3
               WHERE workspace_id = $1 AND id = $2 AND revoked = false
               RETURNING id, workspace_id, key_hash, allowed_origins, revoked, created_at"#,
        )
        .bind(workspace_id)
        .bind(embed_id)
        .bind(new_key_hash)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row)
    }

    pub async fn revoke_embed_code(&self, workspace_id: Uuid, embed_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE embed_codes SET revoked = true WHERE workspace_id = $1 AND id = $2",
        )
        .bind(workspace_id)
        .bind(embed_id)
        .execute(self.pool.get_pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_embed_codes(&self, workspace_id: Uuid) -> Result<Vec<EmbedCodeRow>> {
        let rows = sqlx::query_as::<_, EmbedCodeRow>(
            "SELECT id, workspace_id, key_hash, allowed_origins, revoked, created_at FROM embed_codes WHERE workspace_id = $1 ORDER BY created_at DESC",
        )
        .bind(workspace_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows)
    }

    pub async fn touch_embed_code_last_used(&self, embed_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE embed_codes SET last_used_at = now() WHERE id = $1")
            .bind(embed_id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    // ==================== Ingestion handoff (C6) ====================

    /// Hands a newly uploaded document off to the ingestion worker by
    /// dropping a row into the durable job queue it polls with
    /// `SELECT ... FOR UPDATE SKIP LOCKED`. The API server never touches
    /// job state past this insert.
    pub async fn enqueue_ingest_job(&self, document_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO ingest_jobs (id, document_id, status, attempts, next_visible_at, created_at)
               VALUES ($1, $2, 'queued', 0, now(), now())"#,
        )
        .bind(Uuid::new_v4())
        .bind(document_id)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }
}
