//! Object store errors.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object store misconfigured: {0}")]
    ConfigError(String),

    #[error("No such object: {0}")]
    NotFound(String),

    #[error("Put failed: {0}")]
    UploadFailed(String),

    #[error("Get failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("List failed: {0}")]
    ListFailed(String),

    /// Bucket-level calls (head, create)
    #[error("Bucket error: {0}")]
    Bucket(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn delete_failed(msg: impl Into<String>) -> Self {
        Self::DeleteFailed(msg.into())
    }

    pub fn list_failed(msg: impl Into<String>) -> Self {
        Self::ListFailed(msg.into())
    }

    pub fn bucket(msg: impl Into<String>) -> Self {
        Self::Bucket(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(StorageError::not_found("job/original.mp4").is_not_found());
        assert!(!StorageError::download_failed("timeout").is_not_found());
        assert_eq!(
            StorageError::not_found("job/sprite.jpg").to_string(),
            "No such object: job/sprite.jpg"
        );
    }
}
