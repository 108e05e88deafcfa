use anyhow::{Context, Result};
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::utils::error::ApiError;
use crate::utils::limiters::Limiters;

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding Service (C4). Shared shape between the query-time and
/// ingestion-time crates: a thin OpenAI-compatible `/v1/embeddings`
/// client with an in-memory cache over exact text matches and a
/// semaphore gate so a burst of concurrent retrieval/ingest calls
/// doesn't overrun the upstream embedding provider.
#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    base_url: String,
    model: String,
    pub dimension: usize,
    api_key: Option<String>,
    batch_size: usize,
    cache: Arc<DashMap<String, Vec<f32>>>,
    limiters: Arc<Limiters>,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig, limiters: Arc<Limiters>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url,
            model: config.model,
            dimension: config.dimension,
            api_key: config.api_key,
            batch_size: config.batch_size.max(1),
            cache: Arc::new(DashMap::new()),
            limiters,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        self.embed_batch(vec![text.to_string()])
            .await
            .map(|mut v| v.remove(0))
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ApiError> {
        let mut results = vec![Vec::new(); texts.len()];
        let mut misses = Vec::new();

        for (idx, text) in texts.iter().enumerate() {
            if let Some(cached) = self.cache.get(text) {
                results[idx] = cached.clone();
            } else {
                misses.push((idx, text.clone()));
            }
        }

        if misses.is_empty() {
            return Ok(results);
        }

        for batch in misses.chunks(self.batch_size) {
            let inputs: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
            let embeddings = self
                .call_embedding_api(inputs)
                .await
                .map_err(|e| ApiError::Unavailable(e.to_string()))?;

            for ((idx, text), embedding) in batch.iter().zip(embeddings.into_iter()) {
                self.cache.insert(text.clone(), embedding.clone());
                results[*idx] = embedding;
            }
        }

        Ok(results)
    }

    async fn call_embedding_api(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.embedding.clone(),
            self.limiters.acquire_timeout,
            "embedding",
        )
        .await?;
        debug!(wait_ms = wait.as_millis() as u64, op = "embedding", "wait_queue");

        let exec_start = Instant::now();
        let url = format!("{}/v1/embeddings", self.base_url);

        let mut request_builder = self.client.post(&url).json(&EmbeddingRequest {
            input: inputs,
            model: self.model.clone(),
        });

        if let Some(key) = &self.api_key {
            request_builder = request_builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = request_builder
            .send()
            .await
            .context("failed to reach embedding provider")?;

        debug!(exec_ms = exec_start.elapsed().as_millis() as u64, op = "embedding", "exec");

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("embedding provider returned {status}: {body}");
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .context("failed to parse embedding response")?;

        if body.data.is_empty() {
            anyhow::bail!("embedding provider returned no vectors");
        }

        for vector in &body.data {
            if vector.embedding.len() != self.dimension {
                anyhow::bail!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    vector.embedding.len()
                );
            }
        }

        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}
