use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::GeneratorConfig;
use crate::utils::error::ApiError;
use crate::utils::limiters::Limiters;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatStreamRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Generator Adapter (C9): a single-retry OpenAI-compatible chat
/// completion client. Orchestration (C8) does not itself retry past
/// this boundary — by design, a generator outage surfaces rather than
/// retrying indefinitely against a provider that is already degraded.
pub struct GeneratorAdapter {
    client: Client,
    config: GeneratorConfig,
    limiters: Arc<Limiters>,
}

impl GeneratorAdapter {
    pub fn new(config: GeneratorConfig, limiters: Arc<Limiters>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
            limiters,
        }
    }

    pub async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ApiError> {
        match self.generate_once(system_prompt, user_prompt).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                warn!(error = %e, "generator call failed, retrying once");
                self.generate_once(system_prompt, user_prompt)
                    .await
                    .map_err(|e| ApiError::Unavailable(e.to_string()))
            }
        }
    }

    async fn generate_once(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.generator.clone(),
            self.limiters.acquire_timeout,
            "generate",
        )
        .await?;
        debug!(wait_ms = wait.as_millis() as u64, op = "generate", "wait_queue");

        let exec_start = Instant::now();
        let url = format!("{}/v1/chat/completions", self.config.base_url);

        let mut request_builder = self.client.post(&url).json(&ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt.to_string(),
                },
            ],
            max_tokens: self.config.max_output_tokens,
        });

        if let Some(key) = &self.config.api_key {
            request_builder = request_builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = request_builder
            .send()
            .await
            .context("failed to reach generator provider")?;

        debug!(exec_ms = exec_start.elapsed().as_millis() as u64, op = "generate", "exec");

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("generator provider returned {status}: {body}");
        }

        let body: ChatResponse = response
            .json()
            .await
            .context("failed to parse generator response")?;

        let answer = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("generator returned no choices"))?;

        Ok(answer)
    }

    /// Streaming counterpart to `generate`: yields text deltas as the
    /// provider emits them over SSE, rather than waiting for the full
    /// completion. No retry-on-failure here — a mid-stream error
    /// surfaces to the caller immediately since replaying from scratch
    /// would duplicate already-delivered deltas.
    pub async fn generate_stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, ApiError>> + Send>>, ApiError> {
        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.generator.clone(),
            self.limiters.acquire_timeout,
            "generate_stream",
        )
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
        debug!(wait_ms = wait.as_millis() as u64, op = "generate_stream", "wait_queue");

        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let mut request_builder = self.client.post(&url).json(&ChatStreamRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt.to_string(),
                },
            ],
            max_tokens: self.config.max_output_tokens,
            stream: true,
        });

        if let Some(key) = &self.config.api_key {
            request_builder = request_builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = request_builder
            .send()
            .await
            .map_err(|e| ApiError::Unavailable(format!("failed to reach generator provider: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Unavailable(format!(
                "generator provider returned {status}: {body}"
            )));
        }

        let byte_stream = response.bytes_stream();
        let parsed = futures::stream::unfold(byte_stream, |mut stream| async move {
            loop {
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        for line in text.lines() {
                            let Some(json_str) = line.strip_prefix("data: ") else {
                                continue;
                            };
                            if json_str == "[DONE]" {
                                return None;
                            }
                            if let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(json_str) {
                                if let Some(content) =
                                    chunk.choices.first().and_then(|c| c.delta.content.clone())
                                {
                                    if !content.is_empty() {
                                        return Some((Ok(content), stream));
                                    }
                                }
                            }
                        }
                        // No deliverable delta in this frame; keep polling.
                        continue;
                    }
                    Some(Err(e)) => {
                        return Some((Err(ApiError::Unavailable(format!("stream error: {e}"))), stream));
                    }
                    None => return None,
                }
            }
        });

        Ok(Box::pin(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::LimitsConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> GeneratorConfig {
        GeneratorConfig {
            base_url,
            model: "test-model".to_string(),
            api_key: None,
            timeout_seconds: 5,
            max_output_tokens: 256,
        }
    }

    fn test_limiters() -> Arc<Limiters> {
        Arc::new(Limiters::new(&LimitsConfig {
            embedding_concurrency: 4,
            db_search_concurrency: 4,
            generator_concurrency: 4,
            acquire_timeout_ms: 1000,
        }))
    }

    #[tokio::test]
    async fn generate_returns_the_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "the answer"}}]
            })))
            .mount(&server)
            .await;

        let adapter = GeneratorAdapter::new(test_config(server.uri()), test_limiters());
        let answer = adapter.generate("system", "question").await.unwrap();
        assert_eq!(answer, "the answer");
    }

    #[tokio::test]
    async fn generate_retries_once_then_fails_on_sustained_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let adapter = GeneratorAdapter::new(test_config(server.uri()), test_limiters());
        let err = adapter.generate("system", "question").await.unwrap_err();
        assert!(matches!(err, ApiError::Unavailable(_)));
    }

    #[tokio::test]
    async fn generate_stream_yields_deltas_in_order_and_stops_at_done() {
        let server = MockServer::start().await;
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n\
                     data: {\"choices\":[{\"delta\":{\"content\":\", world\"}}]}\n\n\
                     data: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let adapter = GeneratorAdapter::new(test_config(server.uri()), test_limiters());
        let mut stream = adapter.generate_stream("system", "question").await.unwrap();

        let mut deltas = Vec::new();
        while let Some(chunk) = stream.next().await {
            deltas.push(chunk.unwrap());
        }

        assert_eq!(deltas, vec!["Hello".to_string(), ", world".to_string()]);
    }

    #[tokio::test]
    async fn generate_stream_surfaces_provider_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let adapter = GeneratorAdapter::new(test_config(server.uri()), test_limiters());
        let err = match adapter.generate_stream("system", "question").await {
            Ok(_) => panic!("expected generate_stream to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, ApiError::Unavailable(_)));
    }
}
