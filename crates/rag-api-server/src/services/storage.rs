use std::path::PathBuf;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::utils::error::ApiError;

/// Storage Adapter (C1), write side. The API server's only job here is
/// to land the raw bytes somewhere content-addressed-enough that the
/// ingestion worker can find them again by `storage_key` alone; it
/// never reads the file back or inspects its contents.
pub struct FsStorage {
    base_dir: PathBuf,
}

impl FsStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            base_dir: PathBuf::from(&config.base_dir),
        }
    }

    pub async fn save(
        &self,
        workspace_id: Uuid,
        original_filename: &str,
        bytes: &[u8],
    ) -> Result<String, ApiError> {
        let dir = self.base_dir.join(workspace_id.simple().to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to create storage dir: {e}")))?;

        let stored_name = format!("{}-{}", Uuid::new_v4(), sanitize(original_filename));
        let path = dir.join(&stored_name);

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to write upload: {e}")))?;

        Ok(path
            .strip_prefix(&self.base_dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .into_owned())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize("../../etc/passwd"), "______etc_passwd");
        assert_eq!(sanitize("report v2.pdf"), "report_v2.pdf");
    }
}
