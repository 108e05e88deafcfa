use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::database::Repository;
use crate::domain::{Chunk, ChunkId};
use crate::services::embedding_service::EmbeddingService;
use crate::services::rerank_service::RerankService;
use crate::services::vector_store::VectorStore;
use crate::utils::error::ApiError;
use crate::utils::similarity::min_max_normalize;

struct CacheEntry {
    inserted_at: Instant,
    results: Vec<Chunk>,
}

/// Which side(s) of the Retrieval Engine (C7) a query consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Dense (pgvector cosine) search only.
    Vector,
    /// Lexical (`tsvector`/`ts_rank`) search only.
    Lexical,
    /// Both sides, fused by weighted min-max normalized score. The default.
    #[default]
    Hybrid,
    /// Hybrid candidate generation followed by a cross-encoder rerank
    /// pass. Falls back to plain hybrid if reranking is disabled or the
    /// rerank provider call fails.
    Rerank,
}

/// Retrieval Engine (C7). Fuses the dense (pgvector cosine) and lexical
/// (`tsvector`/`ts_rank`) sides by min-max normalizing each side's
/// scores independently, then combining with the configured weights.
/// A chunk seen on only one side still participates, scored as if it
/// were absent (score `0.0`) on the side that missed it — recall
/// favors the side that found it rather than discarding partial
/// matches.
pub struct RetrievalEngine {
    repository: Arc<Repository>,
    embedding_service: Arc<EmbeddingService>,
    vector_store: Arc<VectorStore>,
    rerank_service: Arc<RerankService>,
    cache: DashMap<(Uuid, String), CacheEntry>,
    config: RetrievalConfig,
}

#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
    pub search_method: &'static str,
}

impl RetrievalEngine {
    pub fn new(
        repository: Arc<Repository>,
        embedding_service: Arc<EmbeddingService>,
        vector_store: Arc<VectorStore>,
        rerank_service: Arc<RerankService>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            repository,
            embedding_service,
            vector_store,
            rerank_service,
            cache: DashMap::new(),
            config,
        }
    }

    pub async fn retrieve(
        &self,
        workspace_id: Uuid,
        query: &str,
        mode: RetrievalMode,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<RetrievedChunk>, ApiError> {
        let cache_key = (workspace_id, cache_key_for(query, mode, document_ids));
        if let Some(entry) = self.cache.get(&cache_key) {
            if entry.inserted_at.elapsed() < Duration::from_secs(self.config.cache_ttl_seconds) {
                debug!(workspace_id = %workspace_id, "retrieval cache hit");
                return Ok(entry
                    .results
                    .iter()
                    .cloned()
                    .map(|chunk| RetrievedChunk {
                        chunk,
                        score: 1.0,
                        search_method: "cache",
                    })
                    .collect());
            }
        }

        let results = match mode {
            RetrievalMode::Vector => self.retrieve_vector(workspace_id, query, document_ids).await?,
            RetrievalMode::Lexical => {
                self.retrieve_lexical(workspace_id, query, document_ids).await?
            }
            RetrievalMode::Hybrid => self.retrieve_hybrid(workspace_id, query, document_ids).await?,
            RetrievalMode::Rerank => self.retrieve_rerank(workspace_id, query, document_ids).await?,
        };

        if results.is_empty() {
            return Ok(Vec::new());
        }

        self.cache.insert(
            cache_key,
            CacheEntry {
                inserted_at: Instant::now(),
                results: results.iter().map(|r| r.chunk.clone()).collect(),
            },
        );

        Ok(results)
    }

    async fn retrieve_vector(
        &self,
        workspace_id: Uuid,
        query: &str,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<RetrievedChunk>, ApiError> {
        let query_embedding = self.embedding_service.embed(query).await?;
        let dense = self
            .vector_store
            .dense_search(workspace_id, query_embedding, self.config.top_k, document_ids)
            .await?;

        let scores = min_max_normalize(&dense.iter().map(|(_, s)| *s).collect::<Vec<_>>());
        let mut results: Vec<RetrievedChunk> = dense
            .into_iter()
            .zip(scores)
            .map(|((chunk, _), score)| RetrievedChunk {
                chunk,
                score,
                search_method: "vector",
            })
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(self.config.top_k);
        Ok(results)
    }

    async fn retrieve_lexical(
        &self,
        workspace_id: Uuid,
        query: &str,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<RetrievedChunk>, ApiError> {
        let lexical = self
            .lexical_search(workspace_id, query, self.config.top_k, document_ids)
            .await?;

        let scores = min_max_normalize(&lexical.iter().map(|(_, s)| *s).collect::<Vec<_>>());
        let mut results: Vec<RetrievedChunk> = lexical
            .into_iter()
            .zip(scores)
            .map(|((chunk, _), score)| RetrievedChunk {
                chunk,
                score,
                search_method: "lexical",
            })
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(self.config.top_k);
        Ok(results)
    }

    async fn retrieve_hybrid(
        &self,
        workspace_id: Uuid,
        query: &str,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<RetrievedChunk>, ApiError> {
        let query_embedding = self.embedding_service.embed(query).await?;

        let (dense, lexical) = tokio::join!(
            self.vector_store.dense_search(
                workspace_id,
                query_embedding,
                self.config.top_k * 2,
                document_ids
            ),
            self.lexical_search(workspace_id, query, self.config.top_k * 2, document_ids)
        );

        // Fall back to whichever side succeeded; only fail if both did.
        let dense = dense.unwrap_or_else(|e| {
            debug!(error = %e, "dense search degraded");
            Vec::new()
        });
        let lexical = lexical.unwrap_or_else(|e| {
            debug!(error = %e, "lexical search degraded");
            Vec::new()
        });

        if dense.is_empty() && lexical.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self.fuse(dense, lexical))
    }

    /// Generates hybrid candidates, then reorders them by cross-encoder
    /// relevance. Reranking only changes order, not membership — the
    /// candidate set is still whatever hybrid fusion surfaced.
    async fn retrieve_rerank(
        &self,
        workspace_id: Uuid,
        query: &str,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<RetrievedChunk>, ApiError> {
        if !self.config.rerank_enabled {
            debug!("rerank mode requested but rerank_enabled=false, falling back to hybrid");
            return self.retrieve_hybrid(workspace_id, query, document_ids).await;
        }

        let candidates = self.retrieve_hybrid(workspace_id, query, document_ids).await?;
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let documents: Vec<&str> = candidates.iter().map(|r| r.chunk.content.as_str()).collect();
        let reranked = match self.rerank_service.rerank(query, &documents).await {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "rerank provider unavailable, keeping hybrid order");
                return Ok(candidates);
            }
        };

        let mut results: Vec<RetrievedChunk> = reranked
            .into_iter()
            .filter_map(|(idx, score)| {
                candidates.get(idx).map(|r| RetrievedChunk {
                    chunk: r.chunk.clone(),
                    score,
                    search_method: "rerank",
                })
            })
            .collect();
        results.truncate(self.config.top_k);
        Ok(results)
    }

    async fn lexical_search(
        &self,
        workspace_id: Uuid,
        query: &str,
        limit: usize,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<(Chunk, f32)>, ApiError> {
        let rows = self
            .repository
            .lexical_search(workspace_id, query, limit as i64, document_ids)
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

    fn fuse(
        &self,
        dense: Vec<(Chunk, f32)>,
        lexical: Vec<(Chunk, f32)>,
    ) -> Vec<RetrievedChunk> {
        let dense_scores = min_max_normalize(&dense.iter().map(|(_, s)| *s).collect::<Vec<_>>());
        let lexical_scores =
            min_max_normalize(&lexical.iter().map(|(_, s)| *s).collect::<Vec<_>>());

        let mut fused: HashMap<ChunkId, (Chunk, f32, bool, bool)> = HashMap::new();

        for ((chunk, _), norm) in dense.into_iter().zip(dense_scores) {
            let contribution = norm * self.config.dense_weight;
            fused
                .entry(chunk.id)
                .and_modify(|(_, score, seen_dense, _)| {
                    *score += contribution;
                    *seen_dense = true;
                })
                .or_insert((chunk, contribution, true, false));
        }

        for ((chunk, _), norm) in lexical.into_iter().zip(lexical_scores) {
            let contribution = norm * self.config.lexical_weight;
            fused
                .entry(chunk.id)
                .and_modify(|(_, score, _, seen_lexical)| {
                    *score += contribution;
                    *seen_lexical = true;
                })
                .or_insert((chunk, contribution, false, true));
        }

        let mut results: Vec<RetrievedChunk> = fused
            .into_values()
            .map(|(chunk, score, seen_dense, seen_lexical)| RetrievedChunk {
                chunk,
                score,
                search_method: match (seen_dense, seen_lexical) {
                    (true, true) => "hybrid",
                    (true, false) => "dense",
                    (false, true) => "lexical",
                    (false, false) => unreachable!("fused entry always has at least one source"),
                },
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(self.config.top_k);
        results
    }
}

fn cache_key_for(query: &str, mode: RetrievalMode, document_ids: Option<&[Uuid]>) -> String {
    let mode_tag = match mode {
        RetrievalMode::Vector => "vector",
        RetrievalMode::Lexical => "lexical",
        RetrievalMode::Hybrid => "hybrid",
        RetrievalMode::Rerank => "rerank",
    };
    match document_ids {
        Some(ids) => format!("{mode_tag}|{ids:?}|{query}"),
        None => format!("{mode_tag}|*|{query}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_defaults_to_hybrid() {
        assert_eq!(RetrievalMode::default(), RetrievalMode::Hybrid);
    }

    #[test]
    fn mode_round_trips_on_the_wire() {
        let value = serde_json::to_value(RetrievalMode::Rerank).unwrap();
        assert_eq!(value, "rerank");
        let parsed: RetrievalMode = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, RetrievalMode::Rerank);
    }

    #[test]
    fn cache_key_distinguishes_mode_and_scope() {
        let a = cache_key_for("q", RetrievalMode::Hybrid, None);
        let b = cache_key_for("q", RetrievalMode::Vector, None);
        let id = Uuid::nil();
        let c = cache_key_for("q", RetrievalMode::Hybrid, Some(&[id]));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
