use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::database::{EmbedCodeRow, Repository};
use crate::utils::error::ApiError;

/// Embed Code Issuer (C13). Mints an opaque widget API key, stores
/// only its hash (the same posture as a password), and hands the
/// plaintext back to the caller exactly once — it cannot be recovered
/// afterwards, only rotated by issuing a new code and revoking the old.
pub struct EmbedCodeIssuer {
    repository: Arc<Repository>,
}

pub struct IssuedEmbedCode {
    pub id: Uuid,
    pub plaintext_key: String,
}

impl EmbedCodeIssuer {
    pub fn new(repository: Arc<Repository>) -> Self {
        Self { repository }
    }

    pub async fn issue(
        &self,
        workspace_id: Uuid,
        allowed_origins: Vec<String>,
    ) -> Result<IssuedEmbedCode, ApiError> {
        let plaintext_key = generate_key();
        let key_hash = hash_key(&plaintext_key);

        let row = self
            .repository
            .insert_embed_code(workspace_id, &key_hash, &allowed_origins)
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;

        Ok(IssuedEmbedCode {
            id: row.id,
            plaintext_key,
        })
    }

    pub async fn resolve(&self, plaintext_key: &str) -> Result<Option<EmbedCodeRow>, ApiError> {
        let key_hash = hash_key(plaintext_key);
        let row = self
            .repository
            .get_embed_code_by_hash(&key_hash)
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;

        Ok(row.filter(|r| !r.revoked))
    }

    /// Replace an embed code's key without disturbing its id, workspace,
    /// or allowed-origins configuration — the widget script keeps
    /// pointing at the same `embed_id`, only the secret changes. Returns
    /// `None` if the code is unknown or already revoked.
    pub async fn rotate(
        &self,
        workspace_id: Uuid,
        embed_id: Uuid,
    ) -> Result<Option<IssuedEmbedCode>, ApiError> {
        let plaintext_key = generate_key();
        let key_hash = hash_key(&plaintext_key);

        let row = self
            .repository
            .rotate_embed_code(workspace_id, embed_id, &key_hash)
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;

        Ok(row.map(|row| IssuedEmbedCode {
            id: row.id,
            plaintext_key,
        }))
    }

    pub async fn revoke(&self, workspace_id: Uuid, embed_id: Uuid) -> Result<bool, ApiError> {
        self.repository
            .revoke_embed_code(workspace_id, embed_id)
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))
    }

    pub async fn list(&self, workspace_id: Uuid) -> Result<Vec<EmbedCodeRow>, ApiError> {
        self.repository
            .list_embed_codes(workspace_id)
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))
    }
}

fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    format!("wck_{}", hex::encode(bytes))
}

fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_unique_and_prefixed() {
        let a = generate_key();
        let b = generate_key();
        assert_ne!(a, b);
        assert!(a.starts_with("wck_"));
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_key("abc"), hash_key("abc"));
        assert_ne!(hash_key("abc"), hash_key("abd"));
    }
}
