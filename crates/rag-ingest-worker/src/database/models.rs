use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payload carried on the LISTEN/NOTIFY wake-up channel the API server
/// fires after queuing a job. Purely a latency optimization — the
/// durable queue in `ingest_jobs` is always re-scanned on a timer
/// regardless of whether a notification ever arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJobNotification {
    pub job_id: Uuid,
    pub document_id: Uuid,
}

#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub title: String,
    pub storage_key: String,
    pub content_type: String,
}

/// A claimed row from `ingest_jobs`. `FOR UPDATE SKIP LOCKED` guarantees
/// at most one worker process holds a given job at a time.
#[derive(Debug, Clone, FromRow)]
pub struct IngestJobRow {
    pub id: Uuid,
    pub document_id: Uuid,
    pub status: String,
    pub attempts: i32,
}

#[derive(Debug, Clone)]
pub struct ChunkInsert {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub document_id: Uuid,
    pub document_title: String,
    pub chunk_index: i32,
    pub content: String,
    pub token_count: i32,
    pub embedding: Vector,
}
