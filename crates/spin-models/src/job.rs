//! Job identity, request parameters and the persisted job record.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ModelError, ModelResult};
use crate::result::ResultMetadata;
use crate::stage::{JobStatus, Stage};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of frames in the finished spin. Only a small set is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "u32", into = "u32")]
pub struct FrameCount(u32);

impl FrameCount {
    pub const ALLOWED: [u32; 3] = [24, 36, 72];

    pub fn new(count: u32) -> ModelResult<Self> {
        if Self::ALLOWED.contains(&count) {
            Ok(Self(count))
        } else {
            Err(ModelError::UnsupportedFrameCount(count))
        }
    }

    pub fn get(&self) -> usize {
        self.0 as usize
    }
}

impl Default for FrameCount {
    fn default() -> Self {
        Self(36)
    }
}

impl TryFrom<u32> for FrameCount {
    type Error = ModelError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FrameCount> for u32 {
    fn from(value: FrameCount) -> Self {
        value.0
    }
}

impl fmt::Display for FrameCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optional feature flags supplied at submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct JobOptions {
    /// Replace the background with transparency (PNG output)
    #[serde(default)]
    pub remove_background: bool,

    /// Override the loop similarity threshold used for the diagnostic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub loop_threshold: Option<f64>,
}

/// Flat job record persisted by the record store.
///
/// Only the orchestrator mutates a record; the transition helpers below
/// keep `status`, `progress` and `step` consistent with each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub step: Stage,
    pub frame_count: FrameCount,
    #[serde(default)]
    pub options: JobOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResultMetadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a record in the PENDING state.
    pub fn new(job_id: JobId, frame_count: FrameCount, options: JobOptions) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobStatus::Pending,
            progress: 0,
            step: Stage::Pending,
            frame_count,
            options,
            error: None,
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.step.is_terminal()
    }

    /// Move into a non-terminal processing stage.
    ///
    /// Progress never decreases while the job is running.
    pub fn advance(&mut self, stage: Stage) -> ModelResult<()> {
        if stage.is_terminal() {
            return Err(ModelError::IllegalTransition {
                from: self.step,
                to: stage,
            });
        }
        self.check_transition(stage)?;
        self.step = stage;
        self.status = stage.status();
        self.progress = self.progress.max(stage.progress());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the job successful and attach its result metadata.
    pub fn complete(&mut self, metadata: ResultMetadata) -> ModelResult<()> {
        self.check_transition(Stage::Completed)?;
        self.step = Stage::Completed;
        self.status = JobStatus::Success;
        self.progress = 100;
        self.error = None;
        self.metadata = Some(metadata);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the job failed. Progress resets to 0.
    pub fn fail(&mut self, error: impl Into<String>) -> ModelResult<()> {
        self.check_transition(Stage::Failed)?;
        self.step = Stage::Failed;
        self.status = JobStatus::Failure;
        self.progress = 0;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    fn check_transition(&self, next: Stage) -> ModelResult<()> {
        if self.step.is_terminal() {
            return Err(ModelError::Terminal(self.step));
        }
        if !self.step.can_transition_to(next) {
            return Err(ModelError::IllegalTransition {
                from: self.step,
                to: next,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::OutputFormat;

    fn metadata() -> ResultMetadata {
        ResultMetadata {
            total_frames: 36,
            frame_width: 800,
            frame_height: 600,
            processing_time_seconds: 12.5,
            format: OutputFormat::Jpeg,
            transparent: false,
            sprite_columns: 6,
            sprite_rows: 6,
            loop_valid: true,
            loop_similarity: 0.91,
        }
    }

    #[test]
    fn test_frame_count_validation() {
        assert!(FrameCount::new(36).is_ok());
        assert_eq!(
            FrameCount::new(30),
            Err(ModelError::UnsupportedFrameCount(30))
        );
        let parsed: Result<FrameCount, _> = serde_json::from_str("48");
        assert!(parsed.is_err());
        let parsed: FrameCount = serde_json::from_str("72").unwrap();
        assert_eq!(parsed.get(), 72);
    }

    #[test]
    fn test_job_options_validation() {
        let ok = JobOptions {
            remove_background: true,
            loop_threshold: Some(0.8),
        };
        assert!(ok.validate().is_ok());
        let bad = JobOptions {
            remove_background: false,
            loop_threshold: Some(1.5),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_record_lifecycle() {
        let mut record = JobRecord::new(JobId::new(), FrameCount::default(), JobOptions::default());
        assert_eq!(record.status, JobStatus::Pending);

        record.advance(Stage::Extracting).unwrap();
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.progress, 15);

        record.advance(Stage::Aligning).unwrap();
        assert!(record.advance(Stage::Detecting).is_err());
        assert_eq!(record.progress, 50);

        record.complete(metadata()).unwrap();
        assert_eq!(record.status, JobStatus::Success);
        assert_eq!(record.progress, 100);
        assert!(record.metadata.is_some());
    }

    #[test]
    fn test_terminal_record_is_immutable() {
        let mut record = JobRecord::new(JobId::new(), FrameCount::default(), JobOptions::default());
        record.advance(Stage::Building).unwrap();
        record.fail("boom").unwrap();

        assert_eq!(record.status, JobStatus::Failure);
        assert_eq!(record.progress, 0);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert!(matches!(
            record.advance(Stage::Uploading),
            Err(ModelError::Terminal(Stage::Failed))
        ));
        assert!(record.complete(metadata()).is_err());
    }

    #[test]
    fn test_record_json_shape() {
        let record = JobRecord::new(
            JobId::from_string("abc"),
            FrameCount::new(24).unwrap(),
            JobOptions::default(),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["job_id"], "abc");
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["step"], "pending");
        assert_eq!(json["frame_count"], 24);
        assert!(json.get("error").is_none());
    }
}
