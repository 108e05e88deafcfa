use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::Repository;
use crate::domain::{Citation, MessageRole, QueryAnswer};
use crate::services::quota::QuotaManager;
use crate::services::retrieval::{RetrievalEngine, RetrievalMode};
use crate::services::generator::GeneratorAdapter;
use crate::utils::error::ApiError;
use crate::utils::token_estimator::estimate_tokens;

const NO_CONTEXT_ANSWER: &str =
    "I couldn't find any relevant information in this workspace's documents to answer that.";
const GENERATOR_UNAVAILABLE_ANSWER: &str =
    "I'm temporarily unable to answer. Please try again in a moment.";

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers strictly from the numbered \
context passages provided. Cite passages inline using the form [n] matching the passage number. \
If the context does not contain the answer, say so plainly.";

/// Events emitted by `RagOrchestrator::answer_stream`.
pub enum StreamEvent {
    /// A text fragment as it arrives from the generator.
    Delta(String),
    /// The stream is finished and the answer has been persisted.
    Done(QueryAnswer),
    /// The pipeline failed before or during streaming.
    Error(ApiError),
}

/// RAG Orchestrator (C8). Ties retrieval, generation, quota, and session
/// persistence into a single query operation. Quota is reserved before
/// any retrieval or generation work happens and is refunded (not
/// committed) on every exit path that does not end in a persisted
/// assistant message, per the error design's "surface, don't silently
/// eat the slot" rule for `Unavailable`/`DeadlineExceeded`.
pub struct RagOrchestrator {
    repository: Arc<Repository>,
    retrieval: Arc<RetrievalEngine>,
    generator: Arc<GeneratorAdapter>,
    quota: Arc<QuotaManager>,
    max_context_tokens: usize,
}

impl RagOrchestrator {
    pub fn new(
        repository: Arc<Repository>,
        retrieval: Arc<RetrievalEngine>,
        generator: Arc<GeneratorAdapter>,
        quota: Arc<QuotaManager>,
        max_context_tokens: usize,
    ) -> Self {
        Self {
            repository,
            retrieval,
            generator,
            quota,
            max_context_tokens,
        }
    }

    pub async fn answer(
        &self,
        workspace_id: Uuid,
        session_id: Uuid,
        query: &str,
        mode: RetrievalMode,
        document_ids: Option<&[Uuid]>,
    ) -> Result<QueryAnswer, ApiError> {
        let (reservation, subscription) = self.quota.reserve(workspace_id).await?;
        info!(
            workspace_id = %workspace_id,
            used = subscription.queries_used,
            limit = ?subscription.query_quota,
            "quota reserved for query"
        );

        self.repository
            .append_message(session_id, MessageRole::User, query, &[])
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;

        let retrieved = match self.retrieval.retrieve(workspace_id, query, mode, document_ids).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, "retrieval failed, refunding reservation");
                self.quota.refund(reservation).await?;
                return Err(e);
            }
        };

        if retrieved.is_empty() {
            let answer = self
                .persist_answer(session_id, NO_CONTEXT_ANSWER, &[])
                .await?;
            reservation.commit();
            return Ok(answer);
        }

        let (context, citations) = self.build_context(&retrieved);
        let user_prompt = format!("Context:\n{context}\n\nQuestion: {query}");

        let generated = match self.generator.generate(SYSTEM_PROMPT, &user_prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "generator unavailable, refunding reservation");
                self.quota.refund(reservation).await?;
                let answer = self
                    .persist_answer(session_id, GENERATOR_UNAVAILABLE_ANSWER, &[])
                    .await?;
                return Ok(answer);
            }
        };

        let answer = self.persist_answer(session_id, &generated, &citations).await?;
        reservation.commit();
        Ok(answer)
    }

    /// Streaming counterpart to `answer`. Runs the same
    /// retrieve-then-generate pipeline but forwards each generator
    /// delta to the caller as it arrives rather than waiting for the
    /// full completion; persistence and quota settlement still happen
    /// exactly once, after the last delta, from inside the spawned
    /// task so a caller that drops the receiver early does not leave
    /// the reservation or session message half-written.
    pub fn answer_stream(
        self: &Arc<Self>,
        workspace_id: Uuid,
        session_id: Uuid,
        query: String,
        mode: RetrievalMode,
        document_ids: Option<Vec<Uuid>>,
    ) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = self.clone();
        tokio::spawn(async move {
            this.drive_stream(workspace_id, session_id, query, mode, document_ids, tx)
                .await;
        });
        rx
    }

    async fn drive_stream(
        &self,
        workspace_id: Uuid,
        session_id: Uuid,
        query: String,
        mode: RetrievalMode,
        document_ids: Option<Vec<Uuid>>,
        tx: mpsc::UnboundedSender<StreamEvent>,
    ) {
        let (reservation, subscription) = match self.quota.reserve(workspace_id).await {
            Ok(r) => r,
            Err(e) => {
                let _ = tx.send(StreamEvent::Error(e));
                return;
            }
        };
        info!(
            workspace_id = %workspace_id,
            used = subscription.queries_used,
            limit = ?subscription.query_quota,
            "quota reserved for streaming query"
        );

        if let Err(e) = self
            .repository
            .append_message(session_id, MessageRole::User, &query, &[])
            .await
        {
            let _ = self.quota.refund(reservation).await;
            let _ = tx.send(StreamEvent::Error(ApiError::Unavailable(e.to_string())));
            return;
        }

        let retrieved = match self
            .retrieval
            .retrieve(workspace_id, &query, mode, document_ids.as_deref())
            .await
        {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, "retrieval failed, refunding reservation");
                let _ = self.quota.refund(reservation).await;
                let _ = tx.send(StreamEvent::Error(e));
                return;
            }
        };

        if retrieved.is_empty() {
            match self.persist_answer(session_id, NO_CONTEXT_ANSWER, &[]).await {
                Ok(answer) => {
                    reservation.commit();
                    let _ = tx.send(StreamEvent::Delta(NO_CONTEXT_ANSWER.to_string()));
                    let _ = tx.send(StreamEvent::Done(answer));
                }
                Err(e) => {
                    let _ = tx.send(StreamEvent::Error(e));
                }
            }
            return;
        }

        let (context, citations) = self.build_context(&retrieved);
        let user_prompt = format!("Context:\n{context}\n\nQuestion: {query}");

        let mut stream = match self.generator.generate_stream(SYSTEM_PROMPT, &user_prompt).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "generator stream unavailable, refunding reservation");
                let _ = self.quota.refund(reservation).await;
                match self
                    .persist_answer(session_id, GENERATOR_UNAVAILABLE_ANSWER, &[])
                    .await
                {
                    Ok(answer) => {
                        let _ = tx.send(StreamEvent::Delta(GENERATOR_UNAVAILABLE_ANSWER.to_string()));
                        let _ = tx.send(StreamEvent::Done(answer));
                    }
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e));
                    }
                }
                return;
            }
        };

        let mut full_text = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(delta) => {
                    full_text.push_str(&delta);
                    if tx.send(StreamEvent::Delta(delta)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(StreamEvent::Error(e));
                    return;
                }
            }
        }

        match self.persist_answer(session_id, &full_text, &citations).await {
            Ok(answer) => {
                reservation.commit();
                let _ = tx.send(StreamEvent::Done(answer));
            }
            Err(e) => {
                let _ = tx.send(StreamEvent::Error(e));
            }
        }
    }

    /// Assembles a numbered `[1]`, `[2]`, ... context block from the
    /// fused retrieval results, trimming from the tail once the token
    /// budget is spent so the highest-scoring passages are never
    /// dropped to make room for lower-scoring ones.
    fn build_context(
        &self,
        retrieved: &[crate::services::retrieval::RetrievedChunk],
    ) -> (String, Vec<Citation>) {
        let mut context = String::new();
        let mut citations = Vec::new();
        let mut tokens_used = 0usize;

        for (i, r) in retrieved.iter().enumerate() {
            let index = (i + 1) as u32;
            let entry = format!("[{index}] {}\n", r.chunk.content);
            let entry_tokens = estimate_tokens(&entry);

            if tokens_used + entry_tokens > self.max_context_tokens && !context.is_empty() {
                break;
            }

            context.push_str(&entry);
            tokens_used += entry_tokens;

            citations.push(Citation {
                index,
                chunk_id: r.chunk.id,
                document_id: r.chunk.document_id,
                document_title: r.chunk.document_title.clone(),
            });
        }

        (context, citations)
    }

    async fn persist_answer(
        &self,
        session_id: Uuid,
        content: &str,
        citations: &[Citation],
    ) -> Result<QueryAnswer, ApiError> {
        let row = self
            .repository
            .append_message(session_id, MessageRole::Assistant, content, citations)
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;

        Ok(QueryAnswer {
            message_id: row.id,
            content: row.content,
            sources: citations.to_vec(),
        })
    }
}
