//! In-process object store for tests and local runs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_list_delete() {
        let store = MemoryStore::new();
        store.put("a/frames/1.jpg", vec![1], "image/jpeg").await.unwrap();
        store.put("a/frames/0.jpg", vec![0], "image/jpeg").await.unwrap();
        store.put("a/viewer.html", vec![2], "text/html").await.unwrap();
        store.put("ab/viewer.html", vec![3], "text/html").await.unwrap();

        assert_eq!(store.get("a/frames/1.jpg").await.unwrap(), vec![1]);
        assert_eq!(
            store.list("a/frames/").await.unwrap(),
            vec!["a/frames/0.jpg", "a/frames/1.jpg"]
        );
        assert_eq!(store.list("a/").await.unwrap().len(), 3);

        assert_eq!(store.delete_prefix("a/").await.unwrap(), 3);
        assert_eq!(store.keys().await, vec!["ab/viewer.html"]);
        assert!(store.get("a/viewer.html").await.unwrap_err().is_not_found());
        store.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("in.bin");
        tokio::fs::write(&src, b"payload").await.unwrap();

        let store = MemoryStore::new();
        store.put_file(&src, "j/original.mp4", "video/mp4").await.unwrap();
        assert_eq!(store.object("j/original.mp4").await.unwrap().content_type, "video/mp4");

        let dst = dir.path().join("nested").join("out.bin");
        store.get_to_path("j/original.mp4", &dst).await.unwrap();
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"payload");
    }
}
