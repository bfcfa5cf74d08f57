//! Worker and pipeline configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spin_media::encode::{FRAME_JPEG_QUALITY, SPRITE_JPEG_QUALITY};
use spin_media::loop_closure::DEFAULT_LOOP_THRESHOLD;
use spin_media::{AlignmentStrategy, NormalizeConfig};

use crate::error::WorkerError;

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Wall-clock cap per job
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Parent of the per-job temporary directories
    pub work_dir: PathBuf,
    /// Result cache directory
    pub cache_dir: PathBuf,
    /// How often to reclaim jobs from crashed workers
    pub claim_interval: Duration,
    /// Prometheus exporter port; no exporter when unset
    pub metrics_port: Option<u16>,
    /// Expiry of job records in Redis
    pub record_ttl_secs: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            job_timeout: Duration::from_secs(1800),
            shutdown_timeout: Duration::from_secs(60),
            work_dir: PathBuf::from("/tmp/spin"),
            cache_dir: PathBuf::from("/tmp/spin-cache"),
            claim_interval: Duration::from_secs(30),
            metrics_port: None,
            record_ttl_secs: Some(7 * 24 * 3600),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS").unwrap_or(defaults.max_concurrent_jobs),
            job_timeout: env_parse("WORKER_JOB_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            cache_dir: std::env::var("WORKER_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            metrics_port: env_parse("METRICS_PORT"),
            record_ttl_secs: match std::env::var("JOB_RECORD_TTL_SECS") {
                Ok(v) if v == "0" => None,
                Ok(v) => v.parse().ok().or(defaults.record_ttl_secs),
                Err(_) => defaults.record_ttl_secs,
            },
        }
    }
}

/// How the final frame set is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Dense extraction, then frames at equidistant estimated angles
    #[default]
    Angle,
    /// Oversampled fixed-count extraction, then loop-point truncation
    LoopClosure,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::Angle => "angle",
            SelectionStrategy::LoopClosure => "loop_closure",
        }
    }
}

impl FromStr for SelectionStrategy {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "angle" => Ok(SelectionStrategy::Angle),
            "loop_closure" | "loop" => Ok(SelectionStrategy::LoopClosure),
            other => Err(WorkerError::config_error(format!("unknown selection strategy: {}", other))),
        }
    }
}

/// Parse `homography`, `center_of_mass` or `none`.
pub fn parse_alignment(s: &str, reference_index: usize) -> Result<AlignmentStrategy, WorkerError> {
    match s.trim().to_lowercase().as_str() {
        "homography" => Ok(AlignmentStrategy::Homography { reference_index }),
        "center_of_mass" | "com" => Ok(AlignmentStrategy::CenterOfMass),
        "none" | "off" => Ok(AlignmentStrategy::None),
        other => Err(WorkerError::config_error(format!("unknown alignment strategy: {}", other))),
    }
}

/// Knobs of the spin pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub stabilize: bool,
    pub selection: SelectionStrategy,
    /// Extra frames extracted for loop closure, as a ratio of the target
    pub oversample_ratio: f64,
    /// Extraction rate for angle selection
    pub extraction_fps: f64,
    pub extraction_width: u32,
    /// Rotation is estimated on every Nth frame
    pub rotation_stride: usize,
    pub expected_total_rotation: f64,
    /// Degrees covered by a drift of one frame width
    pub full_rotation_span: f64,
    pub alignment: AlignmentStrategy,
    pub smoothing_window: usize,
    pub normalize: NormalizeConfig,
    pub confidence_threshold: f64,
    pub loop_threshold: f64,
    pub loop_blend_frames: usize,
    pub frame_quality: u8,
    pub sprite_quality: u8,
    pub result_cache_ttl: Duration,
    /// Bound on concurrent per-frame requests (detection, upload)
    pub parallelism: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stabilize: true,
            selection: SelectionStrategy::Angle,
            oversample_ratio: 1.2,
            extraction_fps: 10.0,
            extraction_width: 800,
            rotation_stride: 1,
            expected_total_rotation: 360.0,
            full_rotation_span: 360.0,
            alignment: AlignmentStrategy::default(),
            smoothing_window: 5,
            normalize: NormalizeConfig::default(),
            confidence_threshold: 0.5,
            loop_threshold: DEFAULT_LOOP_THRESHOLD,
            loop_blend_frames: 0,
            frame_quality: FRAME_JPEG_QUALITY,
            sprite_quality: SPRITE_JPEG_QUALITY,
            result_cache_ttl: Duration::from_secs(24 * 3600),
            parallelism: 8,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, WorkerError> {
        let d = Self::default();

        let selection = match std::env::var("PIPELINE_SELECTION") {
            Ok(v) => v.parse()?,
            Err(_) => d.selection,
        };
        let reference_index = env_parse("PIPELINE_ALIGN_REFERENCE").unwrap_or(0);
        let alignment = match std::env::var("PIPELINE_ALIGNMENT") {
            Ok(v) => parse_alignment(&v, reference_index)?,
            Err(_) => AlignmentStrategy::Homography { reference_index },
        };

        let config = Self {
            stabilize: env_flag("PIPELINE_STABILIZE").unwrap_or(d.stabilize),
            selection,
            oversample_ratio: env_parse("PIPELINE_OVERSAMPLE_RATIO").unwrap_or(d.oversample_ratio),
            extraction_fps: env_parse("PIPELINE_EXTRACTION_FPS").unwrap_or(d.extraction_fps),
            extraction_width: env_parse("PIPELINE_EXTRACTION_WIDTH").unwrap_or(d.extraction_width),
            rotation_stride: env_parse("PIPELINE_ROTATION_STRIDE").unwrap_or(d.rotation_stride),
            expected_total_rotation: env_parse("PIPELINE_EXPECTED_ROTATION").unwrap_or(d.expected_total_rotation),
            full_rotation_span: env_parse("PIPELINE_ROTATION_SPAN").unwrap_or(d.full_rotation_span),
            alignment,
            smoothing_window: env_parse("PIPELINE_SMOOTHING_WINDOW").unwrap_or(d.smoothing_window),
            normalize: NormalizeConfig {
                width: env_parse("OUTPUT_WIDTH").unwrap_or(d.normalize.width),
                height: env_parse("OUTPUT_HEIGHT").unwrap_or(d.normalize.height),
                padding: env_parse("PIPELINE_CROP_PADDING").unwrap_or(d.normalize.padding),
            },
            confidence_threshold: env_parse("DETECTION_CONFIDENCE").unwrap_or(d.confidence_threshold),
            loop_threshold: env_parse("LOOP_THRESHOLD").unwrap_or(d.loop_threshold),
            loop_blend_frames: env_parse("LOOP_BLEND_FRAMES").unwrap_or(d.loop_blend_frames),
            frame_quality: env_parse("FRAME_QUALITY").unwrap_or(d.frame_quality),
            sprite_quality: env_parse("SPRITE_QUALITY").unwrap_or(d.sprite_quality),
            result_cache_ttl: env_parse("RESULT_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.result_cache_ttl),
            parallelism: env_parse("PIPELINE_PARALLELISM").unwrap_or(d.parallelism),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.oversample_ratio < 1.0 {
            return Err(WorkerError::config_error("oversample ratio must be at least 1.0"));
        }
        if self.extraction_fps <= 0.0 {
            return Err(WorkerError::config_error("extraction fps must be positive"));
        }
        if self.expected_total_rotation <= 0.0 || self.full_rotation_span <= 0.0 {
            return Err(WorkerError::config_error("rotation spans must be positive"));
        }
        if self.normalize.width == 0 || self.normalize.height == 0 {
            return Err(WorkerError::config_error("output size must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.loop_threshold) {
            return Err(WorkerError::config_error("loop threshold must be within [0, 1]"));
        }
        Ok(())
    }

    /// Frames extracted for a loop-closure run targeting `target`.
    pub fn oversampled_count(&self, target: usize) -> usize {
        ((target as f64 * self.oversample_ratio).ceil() as usize).max(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.selection, SelectionStrategy::Angle);
        assert_eq!(config.alignment, AlignmentStrategy::Homography { reference_index: 0 });
        assert_eq!(config.normalize.width, 800);
        assert_eq!(config.loop_blend_frames, 0);
    }

    #[test]
    fn test_oversampled_count() {
        let config = PipelineConfig::default();
        assert_eq!(config.oversampled_count(36), 44);
        assert_eq!(config.oversampled_count(24), 29);
        let exact = PipelineConfig {
            oversample_ratio: 1.0,
            ..Default::default()
        };
        assert_eq!(exact.oversampled_count(72), 72);
    }

    #[test]
    fn test_parse_strategies() {
        assert_eq!("loop_closure".parse::<SelectionStrategy>().unwrap(), SelectionStrategy::LoopClosure);
        assert!("random".parse::<SelectionStrategy>().is_err());
        assert_eq!(parse_alignment("center_of_mass", 0).unwrap(), AlignmentStrategy::CenterOfMass);
        assert_eq!(
            parse_alignment("homography", 3).unwrap(),
            AlignmentStrategy::Homography { reference_index: 3 }
        );
        assert!(parse_alignment("affine", 0).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = PipelineConfig {
            oversample_ratio: 0.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = PipelineConfig {
            loop_threshold: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
