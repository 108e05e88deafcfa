use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RerankConfig;
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

/// Cross-encoder reranker client. A document's candidate-set score from
/// dense/lexical retrieval only estimates relevance from the query and
/// passage separately; a cross-encoder scores the (query, passage) pair
/// jointly, which costs one round trip per candidate set but produces a
/// noticeably better final ordering. Used only for `RetrievalMode::Rerank`.
pub struct RerankService {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl RerankService {
    pub fn new(config: RerankConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url,
            model: config.model,
            api_key: config.api_key,
        }
    }

    /// Returns `(original_index, relevance_score)` pairs ordered by
    /// descending relevance. `documents` is the candidate passage text in
    /// the same order the caller's chunk list is in.
    pub async fn rerank(
        &self,
        query: &str,
        documents: &[&str],
    ) -> Result<Vec<(usize, f32)>, ApiError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let scored = self
            .call_rerank_api(query, documents)
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;

        let mut scored = scored;
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored)
    }

    async fn call_rerank_api(
        &self,
        query: &str,
        documents: &[&str],
    ) -> Result<Vec<(usize, f32)>> {
        let url = format!("{}/v1/rerank", self.base_url);

        let mut request_builder = self.client.post(&url).json(&RerankRequest {
            model: &self.model,
            query,
            documents: documents.to_vec(),
        });

        if let Some(key) = &self.api_key {
            request_builder = request_builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = request_builder
            .send()
            .await
            .context("failed to reach rerank provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("rerank provider returned {status}: {body}");
        }

        let body: RerankResponse = response
            .json()
            .await
            .context("failed to parse rerank response")?;

        debug!(candidates = documents.len(), "reranked candidates");

        Ok(body
            .results
            .into_iter()
            .map(|r| (r.index, r.relevance_score))
            .collect())
    }
}
