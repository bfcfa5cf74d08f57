//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spin_models::{FrameCount, JobId, JobOptions};

/// Job to turn an uploaded walk-around video into a spin.
///
/// The video must already be stored under `{job_id}/original.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpinJob {
    pub job_id: JobId,
    pub frame_count: FrameCount,
    #[serde(default)]
    pub options: JobOptions,
    pub created_at: DateTime<Utc>,
}

impl ProcessSpinJob {
    pub fn new(job_id: JobId, frame_count: FrameCount) -> Self {
        Self {
            job_id,
            frame_count,
            options: JobOptions::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("process:{}", self.job_id)
    }
}

/// Job to delete every artifact and the record of a spin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSpinJob {
    pub job_id: JobId,
    pub created_at: DateTime<Utc>,
}

impl DeleteSpinJob {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            created_at: Utc::now(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("delete:{}", self.job_id)
    }
}

/// Generic job wrapper for queue storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    ProcessSpin(ProcessSpinJob),
    DeleteSpin(DeleteSpinJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::ProcessSpin(j) => &j.job_id,
            QueueJob::DeleteSpin(j) => &j.job_id,
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::ProcessSpin(j) => j.idempotency_key(),
            QueueJob::DeleteSpin(j) => j.idempotency_key(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueueJob::ProcessSpin(_) => "process_spin",
            QueueJob::DeleteSpin(_) => "delete_spin",
        }
    }
}
