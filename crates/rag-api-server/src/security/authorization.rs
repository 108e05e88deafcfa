use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::Repository;
use crate::utils::error::ApiError;

/// Tenant boundary enforcement. Every handler that accepts a
/// `workspace_id` path segment resolves it through here before
/// touching any other repository method, so a typo'd or forged id
/// fails closed with `NotFound` rather than `PermissionDenied` —
/// existence is never leaked across tenants.
pub struct WorkspaceGuard {
    repository: Arc<Repository>,
}

impl WorkspaceGuard {
    pub fn new(repository: Arc<Repository>) -> Self {
        Self { repository }
    }

    pub async fn require_workspace(&self, workspace_id: Uuid) -> Result<(), ApiError> {
        let exists = self
            .repository
            .get_workspace(workspace_id)
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?
            .is_some();

        if !exists {
            warn!(workspace_id = %workspace_id, "workspace not found");
            return Err(ApiError::NotFound(format!(
                "workspace {workspace_id} not found"
            )));
        }

        debug!(workspace_id = %workspace_id, "workspace resolved");
        Ok(())
    }

    /// Confirm a resource read from the relational store actually
    /// belongs to the workspace context under which it was requested.
    pub fn require_owned_by(
        &self,
        workspace_id: Uuid,
        resource_workspace_id: Uuid,
        resource: &str,
    ) -> Result<(), ApiError> {
        if workspace_id != resource_workspace_id {
            return Err(ApiError::NotFound(format!("{resource} not found")));
        }
        Ok(())
    }
}
