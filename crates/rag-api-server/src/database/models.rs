use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{
    ChatMessage, ChatSession, Chunk, Citation, Document, DocumentStatus, EmbedCode, MessageRole,
    Subscription, SubscriptionPlan, Workspace,
};

#[derive(Debug, Clone, FromRow)]
pub struct WorkspaceRow {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<WorkspaceRow> for Workspace {
    fn from(r: WorkspaceRow) -> Self {
        Workspace {
            id: r.id,
            name: r.name,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub workspace_id: Uuid,
    pub plan: String,
    pub query_quota: Option<i64>,
    pub queries_used: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

pub fn plan_from_str(plan: &str) -> SubscriptionPlan {
    match plan {
        "starter" => SubscriptionPlan::Starter,
        "pro" => SubscriptionPlan::Pro,
        "enterprise" => SubscriptionPlan::Enterprise,
        "white_label" => SubscriptionPlan::WhiteLabel,
        _ => SubscriptionPlan::Free,
    }
}

pub fn plan_to_str(plan: SubscriptionPlan) -> &'static str {
    match plan {
        SubscriptionPlan::Free => "free",
        SubscriptionPlan::Starter => "starter",
        SubscriptionPlan::Pro => "pro",
        SubscriptionPlan::Enterprise => "enterprise",
        SubscriptionPlan::WhiteLabel => "white_label",
    }
}

impl From<SubscriptionRow> for Subscription {
    fn from(r: SubscriptionRow) -> Self {
        Subscription {
            workspace_id: r.workspace_id,
            plan: plan_from_str(&r.plan),
            query_quota: r.query_quota,
            queries_used: r.queries_used,
            period_start: r.period_start,
            period_end: r.period_end,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub title: String,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub chunk_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DocumentRow> for Document {
    fn from(r: DocumentRow) -> Self {
        Document {
            id: r.id,
            workspace_id: r.workspace_id,
            title: r.title,
            storage_key: r.storage_key,
            content_type: r.content_type,
            size_bytes: r.size_bytes,
            status: DocumentStatus::from(r.status),
            error_message: r.error_message,
            chunk_count: r.chunk_count,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Row shape returned by both the dense and lexical search functions;
/// `score` carries whichever side produced it so the retrieval engine
/// can fuse the two result sets before building [`Chunk`] values.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkSearchRow {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub document_id: Uuid,
    pub document_title: String,
    pub chunk_index: i32,
    pub content: String,
    pub token_count: i32,
    pub score: f32,
}

impl From<ChunkSearchRow> for Chunk {
    fn from(r: ChunkSearchRow) -> Self {
        Chunk {
            id: r.id,
            workspace_id: r.workspace_id,
            document_id: r.document_id,
            document_title: r.document_title,
            chunk_index: r.chunk_index,
            content: r.content,
            token_count: r.token_count,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ChatSessionRow {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ChatSessionRow> for ChatSession {
    fn from(r: ChatSessionRow) -> Self {
        ChatSession {
            id: r.id,
            workspace_id: r.workspace_id,
            title: r.title,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ChatMessageRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: String,
    pub content: String,
    pub sources: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<ChatMessageRow> for ChatMessage {
    fn from(r: ChatMessageRow) -> Self {
        let sources: Vec<Citation> = serde_json::from_value(r.sources).unwrap_or_default();
        ChatMessage {
            id: r.id,
            session_id: r.session_id,
            role: if r.role == "assistant" {
                MessageRole::Assistant
            } else {
                MessageRole::User
            },
            content: r.content,
            sources,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EmbedCodeRow {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub key_hash: String,
    pub allowed_origins: Vec<String>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl From<EmbedCodeRow> for EmbedCode {
    fn from(r: EmbedCodeRow) -> Self {
        EmbedCode {
            id: r.id,
            workspace_id: r.workspace_id,
            key_hash: r.key_hash,
            allowed_origins: r.allowed_origins,
            revoked: r.revoked,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub limit: i64,
    pub used: i64,
}
