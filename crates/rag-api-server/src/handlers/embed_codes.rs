use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::EmbedCodeRow;
use crate::state::AppState;
use crate::utils::error::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct IssueEmbedCodeRequest {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Serialize)]
pub struct IssuedEmbedCodeResponse {
    pub id: Uuid,
    /// Plaintext widget key. Returned exactly once — only its hash is
    /// ever persisted, so this response is the only chance to see it.
    pub key: String,
    pub allowed_origins: Vec<String>,
}

pub async fn issue_embed_code(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<IssueEmbedCodeRequest>,
) -> ApiResult<Json<IssuedEmbedCodeResponse>> {
    state.workspace_guard.require_workspace(workspace_id).await?;

    let issued = state
        .embed_issuer
        .issue(workspace_id, req.allowed_origins.clone())
        .await?;

    Ok(Json(IssuedEmbedCodeResponse {
        id: issued.id,
        key: issued.plaintext_key,
        allowed_origins: req.allowed_origins,
    }))
}

#[derive(Serialize)]
pub struct EmbedCodeSummary {
    pub id: Uuid,
    pub allowed_origins: Vec<String>,
    pub revoked: bool,
}

impl From<EmbedCodeRow> for EmbedCodeSummary {
    fn from(r: EmbedCodeRow) -> Self {
        Self {
            id: r.id,
            allowed_origins: r.allowed_origins,
            revoked: r.revoked,
        }
    }
}

pub async fn list_embed_codes(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
) -> ApiResult<Json<Vec<EmbedCodeSummary>>> {
    state.workspace_guard.require_workspace(workspace_id).await?;

    let rows = state.embed_issuer.list(workspace_id).await?;
    Ok(Json(rows.into_iter().map(EmbedCodeSummary::from).collect()))
}

pub async fn rotate_embed_code(
    State(state): State<AppState>,
    Path((workspace_id, embed_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<IssuedEmbedCodeResponse>> {
    state.workspace_guard.require_workspace(workspace_id).await?;

    let existing = state
        .embed_issuer
        .list(workspace_id)
        .await?
        .into_iter()
        .find(|c| c.id == embed_id)
        .ok_or_else(|| ApiError::NotFound(format!("embed code {embed_id} not found")))?;

    let rotated = state
        .embed_issuer
        .rotate(workspace_id, embed_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("embed code {embed_id} not found")))?;

    Ok(Json(IssuedEmbedCodeResponse {
        id: rotated.id,
        key: rotated.plaintext_key,
        allowed_origins: existing.allowed_origins,
    }))
}

pub async fn revoke_embed_code(
    State(state): State<AppState>,
    Path((workspace_id, embed_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<serde_json::Value>> {
    state.workspace_guard.require_workspace(workspace_id).await?;

    let revoked = state.embed_issuer.revoke(workspace_id, embed_id).await?;
    if !revoked {
        return Err(ApiError::NotFound(format!("embed code {embed_id} not found")));
    }

    Ok(Json(serde_json::json!({ "revoked": true })))
}
