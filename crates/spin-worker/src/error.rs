//! Worker error types.

use thiserror::Error;

use spin_media::MediaError;
use spin_queue::QueueError;
use spin_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Coarse failure class of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or unreadable source video, or no extractable frames
    Input,
    /// Object store or job record write failed
    Storage,
    Processing,
    Cancelled,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Input => "input",
            ErrorKind::Storage => "storage",
            ErrorKind::Processing => "processing",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config",
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Input error: {0}")]
    InputError(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job cancelled: {0}")]
    Cancelled(String),

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job record error: {0}")]
    Queue(#[from] QueueError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Job record error: {0}")]
    Model(#[from] spin_models::ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn input_error(msg: impl Into<String>) -> Self {
        Self::InputError(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::InputError(_) => ErrorKind::Input,
            WorkerError::Storage(_) | WorkerError::Queue(_) => ErrorKind::Storage,
            WorkerError::Media(e) if e.is_input_error() => ErrorKind::Input,
            WorkerError::Media(MediaError::Timeout(_)) | WorkerError::Cancelled(_) => {
                ErrorKind::Cancelled
            }
            WorkerError::ConfigError(_) => ErrorKind::Config,
            WorkerError::Media(MediaError::FfmpegNotFound | MediaError::FfprobeNotFound) => ErrorKind::Config,
            _ => ErrorKind::Processing,
        }
    }

    /// Input and storage failures end the job immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Input | ErrorKind::Storage)
    }
}
