//! Model handle cache and TTL result cache.
//!
//! Both are plain values owned by whoever wires the worker together; there
//! are no process globals.

use std::any::Any;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::WorkerResult;

type Handle = Arc<dyn Any + Send + Sync>;

/// Process-lifetime cache of loaded model handles, keyed by model id.
///
/// Handles are read-only once inserted. Two tasks racing on the same key may
/// both build a handle; the first one stored wins.
#[derive(Default)]
pub struct HandleCache {
    handles: RwLock<HashMap<String, Handle>>,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let handles = self.handles.read().unwrap_or_else(|e| e.into_inner());
        handles.get(key).cloned().and_then(|h| h.downcast::<T>().ok())
    }

    pub fn insert<T: Any + Send + Sync>(&self, key: &str, value: T) -> Arc<T> {
        let value = Arc::new(value);
        let mut handles = self.handles.write().unwrap_or_else(|e| e.into_inner());
        handles.insert(key.to_string(), value.clone() as Handle);
        value
    }

    /// Cached handle for `key`, building it with `load` on first use.
    pub fn get_or_insert_with<T, F>(&self, key: &str, load: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.get::<T>(key) {
            return existing;
        }

        // Load outside the lock; slow model loads must not block readers
        let loaded = Arc::new(load());
        let mut handles = self.handles.write().unwrap_or_else(|e| e.into_inner());
        if let Some(stored) = handles.get(key).cloned() {
            match stored.downcast::<T>() {
                Ok(handle) => return handle,
                Err(_) => warn!(key, "Handle cache type mismatch, replacing entry"),
            }
        }
        handles.insert(key.to_string(), loaded.clone() as Handle);
        loaded
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handles.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.handles.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// On-disk shape of one result cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Deserialize)]
struct EntryTimes {
    expires_at: DateTime<Utc>,
}

/// Stable key for a function call: SHA-256 of `{"func": .., "args": [..]}`.
pub fn cache_key(func: &str, args: &[serde_json::Value]) -> String {
    let payload = serde_json::json!({ "func": func, "args": args });
    format!("{:x}", Sha256::digest(payload.to_string().as_bytes()))
}

/// Directory-backed result cache, one `{key}.json` file per entry.
///
/// Expiry is lazy: `get` ignores stale entries and `sweep_expired` deletes them.
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
    default_ttl: Duration,
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>, default_ttl: Duration) -> WorkerResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, default_ttl })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// The cached value if present, readable and not yet expired.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        let raw = std::fs::read(&path).ok()?;
        let entry: CacheEntry<T> = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(key, error = %e, "Unreadable cache entry ignored");
                return None;
            }
        };
        if entry.is_expired(Utc::now()) {
            return None;
        }
        Some(entry.value)
    }

    /// Store `value`, replacing any previous entry. `None` uses the default TTL.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> WorkerResult<()> {
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl.unwrap_or(self.default_ttl))
            .unwrap_or_else(|_| chrono::Duration::days(36500));
        let entry = CacheEntry {
            value,
            created_at,
            expires_at: created_at + ttl,
        };

        // Write then rename so readers never see a partial entry
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{}.json.tmp", key));
        std::fs::write(&tmp, serde_json::to_vec(&entry)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> WorkerResult<bool> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete expired and unreadable entries. Returns how many were removed.
    pub fn sweep_expired(&self) -> WorkerResult<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let expired = std::fs::read(&path)
                .ok()
                .and_then(|raw| serde_json::from_slice::<EntryTimes>(&raw).ok())
                .map_or(true, |times| now >= times.expires_at);
            if expired && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, dir = %self.dir.display(), "Swept expired cache entries");
        }
        Ok(removed)
    }
}

/// Cheap content fingerprint of a video: size plus first and last KiB.
pub fn video_fingerprint(path: &Path) -> std::io::Result<String> {
    const CHUNK: u64 = 1024;

    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut hasher = Sha256::new();
    hasher.update(size.to_le_bytes());

    let mut head = Vec::with_capacity(CHUNK as usize);
    (&mut file).take(CHUNK).read_to_end(&mut head)?;
    hasher.update(&head);

    if size > CHUNK {
        file.seek(SeekFrom::Start(size - CHUNK))?;
        let mut tail = Vec::with_capacity(CHUNK as usize);
        file.take(CHUNK).read_to_end(&mut tail)?;
        hasher.update(&tail);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_handle_cache_loads_once() {
        let cache = HandleCache::new();
        let mut loads = 0;
        let a = cache.get_or_insert_with("model", || {
            loads += 1;
            String::from("weights")
        });
        let b = cache.get_or_insert_with("model", || {
            loads += 1;
            String::from("other")
        });
        assert_eq!(loads, 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.get::<String>("model").as_deref().map(String::as_str), Some("weights"));
        assert!(cache.get::<u32>("model").is_none());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_handle_cache_type_mismatch_replaces() {
        let cache = HandleCache::new();
        cache.insert("k", 5u32);
        let s = cache.get_or_insert_with("k", || "text".to_string());
        assert_eq!(s.as_str(), "text");
        assert!(cache.get::<u32>("k").is_none());
    }

    #[test]
    fn test_cache_key_is_stable() {
        let a = cache_key("cumulative_angles", &[json!("abc"), json!(1)]);
        let b = cache_key("cumulative_angles", &[json!("abc"), json!(1)]);
        let c = cache_key("cumulative_angles", &[json!("abc"), json!(2)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_result_cache_roundtrip_and_replace() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path(), Duration::from_secs(60)).unwrap();

        assert!(cache.get::<Vec<f64>>("k").is_none());
        cache.set("k", &vec![0.0, 7.5], None).unwrap();
        assert_eq!(cache.get::<Vec<f64>>("k"), Some(vec![0.0, 7.5]));

        cache.set("k", &vec![1.0], None).unwrap();
        assert_eq!(cache.get::<Vec<f64>>("k"), Some(vec![1.0]));
        assert!(dir.path().join("k.json").exists());
    }

    #[test]
    fn test_zero_ttl_is_absent_immediately() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path(), Duration::from_secs(60)).unwrap();
        cache.set("k", &42u32, Some(Duration::ZERO)).unwrap();
        assert_eq!(cache.get::<u32>("k"), None);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path(), Duration::from_secs(60)).unwrap();
        cache.set("stale", &1u32, Some(Duration::ZERO)).unwrap();
        cache.set("fresh", &2u32, None).unwrap();
        std::fs::write(dir.path().join("junk.json"), b"not json").unwrap();

        assert_eq!(cache.sweep_expired().unwrap(), 2);
        assert_eq!(cache.get::<u32>("fresh"), Some(2));
        assert!(!dir.path().join("stale.json").exists());
        assert!(cache.remove("fresh").unwrap());
        assert!(!cache.remove("fresh").unwrap());
    }

    #[test]
    fn test_video_fingerprint() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.mp4");
        let b = dir.path().join("b.mp4");
        let mut data = vec![7u8; 4096];
        std::fs::write(&a, &data).unwrap();
        data[4000] = 8;
        std::fs::write(&b, &data).unwrap();

        let fa = video_fingerprint(&a).unwrap();
        assert_eq!(fa, video_fingerprint(&a).unwrap());
        assert_ne!(fa, video_fingerprint(&b).unwrap());

        // Middle bytes are not part of the fingerprint
        data[4000] = 7;
        data[2000] = 9;
        std::fs::write(&b, &data).unwrap();
        assert_eq!(fa, video_fingerprint(&b).unwrap());
    }
}
