use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type WorkspaceId = Uuid;
pub type DocumentId = Uuid;
pub type ChunkId = Uuid;
pub type SessionId = Uuid;
pub type MessageId = Uuid;
pub type EmbedCodeId = Uuid;

/// A tenant boundary. Every relational row and every vector-store entry
/// carries a `workspace_id`; cross-workspace visibility is never granted
/// by query shape alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionPlan {
    Free,
    Starter,
    Pro,
    Enterprise,
    WhiteLabel,
}

/// Seed quotas by tier. A pure lookup table, not a database table — the
/// `subscriptions` row is the authoritative source once provisioned, so
/// this is only consulted when a workspace's first Subscription is created.
pub struct Plans;

impl Plans {
    /// `None` means unlimited.
    pub fn default_quota(tier: SubscriptionPlan) -> Option<i64> {
        match tier {
            SubscriptionPlan::Free => Some(100),
            SubscriptionPlan::Starter => Some(1_000),
            SubscriptionPlan::Pro => Some(10_000),
            SubscriptionPlan::Enterprise => Some(100_000),
            SubscriptionPlan::WhiteLabel => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub workspace_id: WorkspaceId,
    pub plan: SubscriptionPlan,
    /// `None` means this tier carries no cap.
    pub query_quota: Option<i64>,
    pub queries_used: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

impl Subscription {
    pub fn remaining(&self) -> Option<i64> {
        self.query_quota
            .map(|limit| (limit - self.queries_used).max(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Done => "done",
            DocumentStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl From<String> for DocumentStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => DocumentStatus::Pending,
            "processing" => DocumentStatus::Processing,
            "done" => DocumentStatus::Done,
            "failed" => DocumentStatus::Failed,
            _ => DocumentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub workspace_id: WorkspaceId,
    pub title: String,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub chunk_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A retrieval-unit slice of a document, weakly referenced by chat
/// messages as citations (`sources`) rather than owned by them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub workspace_id: WorkspaceId,
    pub document_id: DocumentId,
    pub document_title: String,
    pub chunk_index: i32,
    pub content: String,
    pub token_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub workspace_id: WorkspaceId,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A numbered citation into a retrieved chunk. `index` is the `[n]`
/// marker the generator was told to use; it need not equal the chunk's
/// position in the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub index: u32,
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub document_title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: MessageRole,
    pub content: String,
    pub sources: Vec<Citation>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedCode {
    pub id: EmbedCodeId,
    pub workspace_id: WorkspaceId,
    pub key_hash: String,
    pub allowed_origins: Vec<String>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a retrieval-augmented query, handed to both the HTTP
/// handler and the widget transport so both surfaces render identical
/// citation contracts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub message_id: MessageId,
    pub content: String,
    pub sources: Vec<Citation>,
}
