use pgvector::Vector;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::database::Repository;
use crate::domain::Chunk;
use crate::utils::error::ApiError;
use crate::utils::limiters::Limiters;

/// Vector Store (C5) client. The platform delegates the actual index to
/// Postgres/pgvector rather than embedding one — this type is the seam
/// a different backing store would sit behind, and it owns the
/// workspace-scoped collection naming convention so callers never
/// build a raw collection string themselves.
pub struct VectorStore {
    repository: Arc<Repository>,
    limiters: Arc<Limiters>,
}

impl VectorStore {
    pub fn new(repository: Arc<Repository>, limiters: Arc<Limiters>) -> Self {
        Self { repository, limiters }
    }

    /// `workspace_<id>` with the id in its lowercase hyphenated form —
    /// the identifier pgvector queries are implicitly scoped to via the
    /// `workspace_id` column predicate.
    pub fn collection_name(workspace_id: Uuid) -> String {
        format!("workspace_{}", workspace_id.simple())
    }

    pub async fn dense_search(
        &self,
        workspace_id: Uuid,
        query_embedding: Vec<f32>,
        limit: usize,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<(Chunk, f32)>, ApiError> {
        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.db_search.clone(),
            self.limiters.acquire_timeout,
            "dense_search",
        )
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
        debug!(wait_ms = wait.as_millis() as u64, op = "dense_search", "wait_queue");

        let vector = Vector::from(query_embedding);
        let rows = self
            .repository
            .dense_search(workspace_id, vector, limit as i64, document_ids)
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let score = r.score;
                (r.into(), score)
            })
            .collect())
    }
}
