use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ChatMessage, ChatSession, Citation, QueryAnswer};
use crate::services::retrieval::RetrievalMode;
use crate::state::AppState;
use crate::utils::error::{ApiError, ApiResult};

#[derive(Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub title: Option<String>,
}

impl From<ChatSession> for SessionResponse {
    fn from(s: ChatSession) -> Self {
        Self {
            id: s.id,
            workspace_id: s.workspace_id,
            title: s.title,
        }
    }
}

pub async fn create_session(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
) -> ApiResult<Json<SessionResponse>> {
    state.workspace_guard.require_workspace(workspace_id).await?;

    let row = state
        .repository
        .create_session(workspace_id)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    Ok(Json(SessionResponse::from(ChatSession::from(row))))
}

#[derive(Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub mode: RetrievalMode,
    /// Restricts retrieval to this subset of the workspace's documents.
    #[serde(default)]
    pub document_ids: Option<Vec<Uuid>>,
}

/// Non-widget REST entry point into the RAG Orchestrator (C8) — the
/// same operation the widget transport drives over its WebSocket, for
/// first-party clients that don't need the real-time framing.
pub async fn query_session(
    State(state): State<AppState>,
    Path((workspace_id, session_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Json<QueryAnswer>> {
    state.workspace_guard.require_workspace(workspace_id).await?;

    if req.query.trim().is_empty() {
        return Err(ApiError::Validation("query must not be empty".to_string()));
    }

    let session = state
        .repository
        .get_session(workspace_id, session_id)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("session {session_id} not found")))?;

    state
        .workspace_guard
        .require_owned_by(workspace_id, session.workspace_id, "session")?;

    let answer = state
        .orchestrator
        .answer(
            workspace_id,
            session_id,
            &req.query,
            req.mode,
            req.document_ids.as_deref(),
        )
        .await?;

    Ok(Json(answer))
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub role: String,
    pub content: String,
    pub sources: Vec<Citation>,
}

impl From<ChatMessage> for MessageResponse {
    fn from(m: ChatMessage) -> Self {
        Self {
            id: m.id,
            role: match m.role {
                crate::domain::MessageRole::User => "user".to_string(),
                crate::domain::MessageRole::Assistant => "assistant".to_string(),
            },
            content: m.content,
            sources: m.sources,
        }
    }
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path((workspace_id, session_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Vec<MessageResponse>>> {
    state.workspace_guard.require_workspace(workspace_id).await?;

    let session = state
        .repository
        .get_session(workspace_id, session_id)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("session {session_id} not found")))?;

    state
        .workspace_guard
        .require_owned_by(workspace_id, session.workspace_id, "session")?;

    let rows = state
        .repository
        .get_session_messages(session_id)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    Ok(Json(
        rows.into_iter()
            .map(ChatMessage::from)
            .map(MessageResponse::from)
            .collect(),
    ))
}
