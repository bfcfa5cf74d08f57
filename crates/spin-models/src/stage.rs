//! Job status and pipeline stage state machine.
//!
//! A job moves forward through [`Stage`]s in a fixed order. Stages may be
//! skipped (stabilization can be disabled) but never revisited. `Failed` is
//! absorbing and reachable from every non-terminal stage.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse job status exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Submitted, not yet picked up by a worker
    #[default]
    Pending,
    /// A worker is running the pipeline
    Processing,
    /// Pipeline finished and results are published
    Success,
    /// Pipeline aborted
    Failure,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named phase of the pipeline, persisted as the record's `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Pending,
    Stabilizing,
    Extracting,
    Detecting,
    Aligning,
    Normalizing,
    Optimizing,
    Building,
    Uploading,
    Completed,
    Failed,
}

impl Stage {
    /// Forward stages in execution order.
    pub const PIPELINE: [Stage; 10] = [
        Stage::Pending,
        Stage::Stabilizing,
        Stage::Extracting,
        Stage::Detecting,
        Stage::Aligning,
        Stage::Normalizing,
        Stage::Optimizing,
        Stage::Building,
        Stage::Uploading,
        Stage::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Stabilizing => "stabilizing",
            Stage::Extracting => "extracting",
            Stage::Detecting => "detecting",
            Stage::Aligning => "aligning",
            Stage::Normalizing => "normalizing",
            Stage::Optimizing => "optimizing",
            Stage::Building => "building",
            Stage::Uploading => "uploading",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }

    /// Progress checkpoint recorded when the stage is entered.
    pub fn progress(&self) -> u8 {
        match self {
            Stage::Pending => 0,
            Stage::Stabilizing => 5,
            Stage::Extracting => 15,
            Stage::Detecting => 35,
            Stage::Aligning => 50,
            Stage::Normalizing => 60,
            Stage::Optimizing => 70,
            Stage::Building => 80,
            Stage::Uploading => 90,
            Stage::Completed => 100,
            Stage::Failed => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    fn ordinal(&self) -> Option<usize> {
        Self::PIPELINE.iter().position(|s| s == self)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Stage::Failed {
            return true;
        }
        match (self.ordinal(), next.ordinal()) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }

    /// Status implied by being in this stage.
    pub fn status(&self) -> JobStatus {
        match self {
            Stage::Pending => JobStatus::Pending,
            Stage::Completed => JobStatus::Success,
            Stage::Failed => JobStatus::Failure,
            _ => JobStatus::Processing,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_only() {
        assert!(Stage::Pending.can_transition_to(Stage::Stabilizing));
        assert!(Stage::Pending.can_transition_to(Stage::Extracting));
        assert!(Stage::Aligning.can_transition_to(Stage::Normalizing));
        assert!(!Stage::Normalizing.can_transition_to(Stage::Aligning));
        assert!(!Stage::Building.can_transition_to(Stage::Building));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal() {
        for stage in Stage::PIPELINE.iter().filter(|s| !s.is_terminal()) {
            assert!(stage.can_transition_to(Stage::Failed), "{stage}");
        }
        assert!(!Stage::Completed.can_transition_to(Stage::Failed));
        assert!(!Stage::Failed.can_transition_to(Stage::Completed));
    }

    #[test]
    fn test_checkpoints_non_decreasing() {
        let progress: Vec<u8> = Stage::PIPELINE.iter().map(Stage::progress).collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&100));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&JobStatus::Failure).unwrap(), "\"FAILURE\"");
        assert_eq!(serde_json::to_string(&Stage::Normalizing).unwrap(), "\"normalizing\"");
    }
}
