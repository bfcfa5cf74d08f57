//! ML client error types.

use thiserror::Error;

pub type MlClientResult<T> = Result<T, MlClientError>;

#[derive(Debug, Error)]
pub enum MlClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Media error: {0}")]
    Media(#[from] spin_media::MediaError),
}

impl MlClientError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Network failures, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            MlClientError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            MlClientError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let status = |status| MlClientError::Status {
            status,
            body: String::new(),
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!MlClientError::invalid_response("bad json").is_retryable());
    }
}
