use std::path::PathBuf;

use crate::config::StorageConfig;

/// Storage Adapter (C1), read side — the mirror image of the API
/// server's write side. Both crates agree on `storage_key` being a path
/// relative to a shared `base_dir`.
pub struct FsStorage {
    base_dir: PathBuf,
}

impl FsStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            base_dir: PathBuf::from(&config.base_dir),
        }
    }

    pub async fn read(&self, storage_key: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.base_dir.join(storage_key);
        tokio::fs::read(&path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to read {path:?}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_back_bytes_written_under_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let workspace_dir = dir.path().join("11111111111111111111111111111111");
        tokio::fs::create_dir_all(&workspace_dir).await.unwrap();
        let key = "11111111111111111111111111111111/doc-id-report.txt";
        tokio::fs::write(dir.path().join(key), b"hello world")
            .await
            .unwrap();

        let storage = FsStorage::new(&StorageConfig {
            base_dir: dir.path().to_string_lossy().into_owned(),
        });

        let bytes = storage.read(key).await.unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[tokio::test]
    async fn missing_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(&StorageConfig {
            base_dir: dir.path().to_string_lossy().into_owned(),
        });

        assert!(storage.read("nonexistent/file.txt").await.is_err());
    }
}
