//! Video stabilization with FFmpeg vidstab.
//!
//! Stabilization is best-effort: a missing filter or a failed pass leaves
//! the source video in place of the stabilized output.

use std::path::Path;
use tracing::{info, warn};

use crate::command::{list_filters, FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

#[derive(Debug, Clone, PartialEq)]
pub struct StabilizerConfig {
    /// How shaky the input is (1-10)
    pub shakiness: u8,
    /// Motion detection accuracy (1-15)
    pub accuracy: u8,
    /// Frames used for camera path smoothing
    pub smoothing: u32,
    pub crf: u8,
    pub preset: String,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            shakiness: 5,
            accuracy: 15,
            smoothing: 30,
            crf: 18,
            preset: "fast".to_string(),
        }
    }
}

/// What the stabilizer ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilizeOutcome {
    /// Two-pass vidstab succeeded
    Stabilized,
    /// vidstab was unavailable and `deshake` was used
    Deshaked,
    /// Source copied unchanged
    PassedThrough { reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct Stabilizer {
    config: StabilizerConfig,
    runner: FfmpegRunner,
}

impl Stabilizer {
    pub fn new(config: StabilizerConfig, runner: FfmpegRunner) -> Self {
        Self { config, runner }
    }

    /// Stabilize `input` into `output`. `work_dir` receives the transforms file.
    pub async fn stabilize(&self, input: &Path, output: &Path, work_dir: &Path) -> MediaResult<StabilizeOutcome> {
        let filters = list_filters().await.unwrap_or_default();
        let has_vidstab = filters.iter().any(|f| f == "vidstabdetect")
            && filters.iter().any(|f| f == "vidstabtransform");

        if !has_vidstab {
            if filters.iter().any(|f| f == "deshake") {
                return self.deshake(input, output).await;
            }
            return self.pass_through(input, output, "no stabilization filter available").await;
        }

        let transforms = work_dir.join("transforms.trf");
        let detect = FfmpegCommand::analysis(input).video_filter(detect_filter(&self.config, &transforms));
        if let Err(e) = self.runner.run(&detect).await {
            warn!(error = %e, "vidstabdetect failed");
            return self.pass_through(input, output, "vidstabdetect failed").await;
        }

        let transform = FfmpegCommand::new(input, output)
            .video_filter(transform_filter(&self.config, &transforms))
            .video_codec("libx264")
            .preset(self.config.preset.clone())
            .crf(self.config.crf)
            .output_args(["-c:a", "copy"]);
        let result = self.runner.run(&transform).await;
        let _ = tokio::fs::remove_file(&transforms).await;

        match result {
            Ok(()) => {
                info!("Stabilized {}", input.display());
                Ok(StabilizeOutcome::Stabilized)
            }
            Err(e) => {
                warn!(error = %e, "vidstabtransform failed");
                self.pass_through(input, output, "vidstabtransform failed").await
            }
        }
    }

    async fn deshake(&self, input: &Path, output: &Path) -> MediaResult<StabilizeOutcome> {
        let cmd = FfmpegCommand::new(input, output)
            .video_filter("deshake=x=-1:y=-1:w=-1:h=-1:rx=16:ry=16")
            .video_codec("libx264")
            .preset(self.config.preset.clone())
            .crf(self.config.crf)
            .output_args(["-c:a", "copy"]);
        match self.runner.run(&cmd).await {
            Ok(()) => Ok(StabilizeOutcome::Deshaked),
            Err(e) => {
                warn!(error = %e, "deshake failed");
                self.pass_through(input, output, "deshake failed").await
            }
        }
    }

    async fn pass_through(&self, input: &Path, output: &Path, reason: &str) -> MediaResult<StabilizeOutcome> {
        tokio::fs::copy(input, output).await?;
        info!(reason, "Using unstabilized video");
        Ok(StabilizeOutcome::PassedThrough {
            reason: reason.to_string(),
        })
    }
}

fn detect_filter(config: &StabilizerConfig, transforms: &Path) -> String {
    format!(
        "vidstabdetect=shakiness={}:accuracy={}:result={}",
        config.shakiness,
        config.accuracy,
        transforms.display()
    )
}

fn transform_filter(config: &StabilizerConfig, transforms: &Path) -> String {
    format!(
        "vidstabtransform=input={}:smoothing={}:crop=black",
        transforms.display(),
        config.smoothing
    )
}

/// Whether the local FFmpeg build ships vidstab.
pub async fn vidstab_available() -> bool {
    list_filters()
        .await
        .map(|filters| filters.iter().any(|f| f.starts_with("vidstab")))
        .unwrap_or(false)
}
