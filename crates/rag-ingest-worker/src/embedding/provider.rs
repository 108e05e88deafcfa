use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;

#[derive(Debug, Serialize)]
struct EmbeddingRequestBody {
    input: Vec<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponseBody {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding Service (C4). Same shared shape as the query-time crate's
/// client: a thin OpenAI-compatible `/v1/embeddings` call, batched so a
/// whole document's chunks go out in a handful of requests rather than
/// one per chunk.
#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    base_url: String,
    model: String,
    pub dimension: usize,
    api_key: Option<String>,
    batch_size: usize,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url,
            model: config.model,
            dimension: config.dimension,
            api_key: config.api_key,
            batch_size: config.batch_size.max(1),
        }
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let mut request_builder = self.client.post(format!("{}/v1/embeddings", self.base_url)).json(
                &EmbeddingRequestBody {
                    input: batch.to_vec(),
                    model: self.model.clone(),
                },
            );

            if let Some(key) = &self.api_key {
                request_builder = request_builder.header("Authorization", format!("Bearer {key}"));
            }

            let response = request_builder
                .send()
                .await
                .context("failed to reach embedding provider")?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("embedding provider returned {status}: {body}");
            }

            let body: EmbeddingResponseBody = response
                .json()
                .await
                .context("failed to parse embedding response")?;

            for vector in &body.data {
                if vector.embedding.len() != self.dimension {
                    anyhow::bail!(
                        "embedding dimension mismatch: expected {}, got {}",
                        self.dimension,
                        vector.embedding.len()
                    );
                }
            }

            embeddings.extend(body.data.into_iter().map(|d| d.embedding));
        }

        Ok(embeddings)
    }
}
