//! Object store contract.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use crate::error::StorageResult;

/// Flat key/value blob storage addressed within one bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        let data = tokio::fs::read(path).await?;
        self.put(key, data, content_type).await
    }

    /// Download `key` to `path`, creating parent directories.
    async fn get_to_path(&self, key: &str, path: &Path) -> StorageResult<()> {
        let data = self.get(key).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        debug!("Downloaded {} to {}", key, path.display());
        Ok(())
    }

    /// Delete every key under `prefix`; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let keys = self.list(prefix).await?;
        for key in &keys {
            self.delete(key).await?;
        }
        Ok(keys.len())
    }
}
