use std::sync::Arc;

use crate::config::Settings;
use crate::database::Repository;
use crate::security::WorkspaceGuard;
use crate::services::{EmbedCodeIssuer, FsStorage, RagOrchestrator};

/// Application state shared across the REST handlers. The widget
/// transport carries its own narrower [`crate::transport::WidgetState`]
/// since it is reachable without the rest of this surface and should
/// not gain access to it by accident.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<Repository>,
    pub workspace_guard: Arc<WorkspaceGuard>,
    pub orchestrator: Arc<RagOrchestrator>,
    pub embed_issuer: Arc<EmbedCodeIssuer>,
    pub storage: Arc<FsStorage>,
    pub settings: Settings,
}
