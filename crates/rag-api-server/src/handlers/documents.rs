use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::Document;
use crate::state::AppState;
use crate::utils::error::{ApiError, ApiResult};

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub title: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub status: String,
}

impl From<Document> for DocumentResponse {
    fn from(d: Document) -> Self {
        Self {
            id: d.id,
            workspace_id: d.workspace_id,
            title: d.title,
            content_type: d.content_type,
            size_bytes: d.size_bytes,
            status: d.status.to_string(),
        }
    }
}

/// Accepts a single-file multipart upload, lands the bytes via the
/// storage adapter, and hands the document off to the ingestion worker.
/// Chunking and embedding happen out-of-band — this endpoint returns as
/// soon as the document is durably queued, with `status: pending`.
pub async fn upload_document(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<Json<DocumentResponse>> {
    state.workspace_guard.require_workspace(workspace_id).await?;

    let mut filename = None;
    let mut content_type = None;
    let mut bytes = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().map(str::to_string);
            content_type = field.content_type().map(str::to_string);
            bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("failed to read upload: {e}")))?,
            );
        }
    }

    let bytes = bytes.ok_or_else(|| ApiError::Validation("missing 'file' field".to_string()))?;
    if bytes.is_empty() {
        return Err(ApiError::Validation("uploaded file is empty".to_string()));
    }

    let filename = filename.unwrap_or_else(|| "upload.bin".to_string());
    let content_type = content_type.unwrap_or_else(|| "application/octet-stream".to_string());

    let storage_key = state.storage.save(workspace_id, &filename, &bytes).await?;

    let document_id = state
        .repository
        .insert_document(
            workspace_id,
            &filename,
            &storage_key,
            &content_type,
            bytes.len() as i64,
        )
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    state
        .repository
        .enqueue_ingest_job(document_id)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    Ok(Json(DocumentResponse {
        id: document_id,
        workspace_id,
        title: filename,
        content_type,
        size_bytes: bytes.len() as i64,
        status: "pending".to_string(),
    }))
}

pub async fn list_documents(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
) -> ApiResult<Json<Vec<DocumentResponse>>> {
    state.workspace_guard.require_workspace(workspace_id).await?;

    let rows = state
        .repository
        .list_documents(workspace_id)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    Ok(Json(
        rows.into_iter()
            .map(Document::from)
            .map(DocumentResponse::from)
            .collect(),
    ))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path((workspace_id, document_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<DocumentResponse>> {
    state.workspace_guard.require_workspace(workspace_id).await?;

    let row = state
        .repository
        .get_document(workspace_id, document_id)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("document {document_id} not found")))?;

    Ok(Json(DocumentResponse::from(Document::from(row))))
}
