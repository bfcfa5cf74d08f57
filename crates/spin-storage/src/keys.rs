//! Job-scoped object key layout.
//!
//! ```text
//! {job}/original.{ext}
//! {job}/frames/frame_000.{ext}
//! {job}/sprite.{ext}
//! {job}/viewer.html
//! ```

use spin_models::{JobId, OutputFormat};

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

/// Everything belonging to a job.
pub fn job_prefix(job_id: &JobId) -> String {
    format!("{}/", job_id)
}

/// Prefix under which the uploaded source video is stored.
pub fn original_prefix(job_id: &JobId) -> String {
    format!("{}/original", job_id)
}

pub fn original_key(job_id: &JobId, extension: &str) -> String {
    format!("{}/original.{}", job_id, extension.trim_start_matches('.'))
}

pub fn frames_prefix(job_id: &JobId) -> String {
    format!("{}/frames/", job_id)
}

pub fn frame_file_name(index: usize, format: OutputFormat) -> String {
    format!("frame_{:03}.{}", index, format.extension())
}

pub fn frame_key(job_id: &JobId, index: usize, format: OutputFormat) -> String {
    format!("{}{}", frames_prefix(job_id), frame_file_name(index, format))
}

pub fn sprite_key(job_id: &JobId, format: OutputFormat) -> String {
    format!("{}/sprite.{}", job_id, format.extension())
}

pub fn viewer_key(job_id: &JobId) -> String {
    format!("{}/viewer.html", job_id)
}

/// Extension of a key's last path segment, if any.
pub fn extension_of(key: &str) -> Option<&str> {
    let name = key.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then_some(ext)
}

/// Key of the uploaded source video for a job.
pub async fn find_original(store: &dyn ObjectStore, job_id: &JobId) -> StorageResult<String> {
    store
        .list(&original_prefix(job_id))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| StorageError::not_found(format!("original video for job {}", job_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn job() -> JobId {
        JobId::from_string("abc")
    }

    #[test]
    fn test_layout() {
        let job = job();
        assert_eq!(job_prefix(&job), "abc/");
        assert_eq!(original_key(&job, ".mp4"), "abc/original.mp4");
        assert_eq!(frame_key(&job, 7, OutputFormat::Jpeg), "abc/frames/frame_007.jpg");
        assert_eq!(sprite_key(&job, OutputFormat::Png), "abc/sprite.png");
        assert_eq!(viewer_key(&job), "abc/viewer.html");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("abc/original.mov"), Some("mov"));
        assert_eq!(extension_of("abc/original"), None);
        assert_eq!(extension_of("a.b/original"), None);
    }

    #[tokio::test]
    async fn test_find_original() {
        let store = MemoryStore::new();
        let job = job();
        assert!(find_original(&store, &job).await.unwrap_err().is_not_found());

        store
            .put(&original_key(&job, "mp4"), b"video".to_vec(), "video/mp4")
            .await
            .unwrap();
        assert_eq!(find_original(&store, &job).await.unwrap(), "abc/original.mp4");
    }
}
