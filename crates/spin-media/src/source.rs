//! Where frames come from.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::command::FfmpegRunner;
use crate::error::{MediaError, MediaResult};
use crate::extract::{extract_frames, ExtractionRequest};
use crate::frame::{load_frames, Frame};
use crate::stabilize::{StabilizeOutcome, Stabilizer};

/// Stabilization plus frame extraction for one source video.
#[async_trait]
pub trait FrameSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stabilize `video` into `work_dir` and return the video to extract from.
    ///
    /// Filter trouble degrades to the unstabilized input; only I/O errors fail.
    async fn stabilize(&self, video: &Path, work_dir: &Path) -> MediaResult<PathBuf>;

    /// Decode frames in temporal order. Zero frames is an input error.
    async fn extract(&self, video: &Path, work_dir: &Path, request: &ExtractionRequest) -> MediaResult<Vec<Frame>>;
}

/// FFmpeg CLI frame source.
#[derive(Debug, Clone, Default)]
pub struct FfmpegFrameSource {
    runner: FfmpegRunner,
    stabilizer: Stabilizer,
}

impl FfmpegFrameSource {
    pub fn new(runner: FfmpegRunner, stabilizer: Stabilizer) -> Self {
        Self { runner, stabilizer }
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn stabilize(&self, video: &Path, work_dir: &Path) -> MediaResult<PathBuf> {
        if !video.exists() {
            return Err(MediaError::FileNotFound(video.to_path_buf()));
        }
        let output = work_dir.join("stabilized.mp4");
        let outcome = self.stabilizer.stabilize(video, &output, work_dir).await?;
        if let StabilizeOutcome::PassedThrough { reason } = &outcome {
            info!(%reason, "Stabilization skipped");
        }
        Ok(output)
    }

    async fn extract(&self, video: &Path, work_dir: &Path, request: &ExtractionRequest) -> MediaResult<Vec<Frame>> {
        if !video.exists() {
            return Err(MediaError::FileNotFound(video.to_path_buf()));
        }
        let frames_dir = work_dir.join("frames");
        let extracted = extract_frames(&self.runner, video, &frames_dir, request).await?;
        tokio::task::spawn_blocking(move || load_frames(&extracted.paths))
            .await
            .map_err(|e| MediaError::internal(format!("Frame decode task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_video_is_input_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = FfmpegFrameSource::default();
        let missing = dir.path().join("missing.mp4");

        let err = source.stabilize(&missing, dir.path()).await.unwrap_err();
        assert!(err.is_input_error());
        let err = source
            .extract(&missing, dir.path(), &ExtractionRequest::default())
            .await
            .unwrap_err();
        assert!(err.is_input_error());
    }
}
