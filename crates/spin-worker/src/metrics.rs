//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use spin_models::{JobStatus, Stage};

use crate::error::{WorkerError, WorkerResult};

pub mod names {
    pub const JOBS_TOTAL: &str = "spin_jobs_total";
    pub const STAGE_DURATION_SECONDS: &str = "spin_stage_duration_seconds";
    pub const JOB_DURATION_SECONDS: &str = "spin_job_duration_seconds";
    pub const FRAMES_PUBLISHED_TOTAL: &str = "spin_frames_published_total";
    pub const DEGRADED_FRAMES_TOTAL: &str = "spin_degraded_frames_total";
}

/// Serve `/metrics` on `0.0.0.0:{port}`.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()
        .map_err(|e| WorkerError::config_error(format!("Failed to install Prometheus exporter: {}", e)))
}

pub fn record_job(status: JobStatus, duration_secs: f64) {
    counter!(names::JOBS_TOTAL, "status" => status.as_str()).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "status" => status.as_str()).record(duration_secs);
}

pub fn record_stage(stage: Stage, duration_secs: f64) {
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage.as_str()).record(duration_secs);
}

pub fn record_frames_published(count: usize) {
    counter!(names::FRAMES_PUBLISHED_TOTAL).increment(count as u64);
}

/// Frames that fell back to a no-op (no alignment, no cut-out).
pub fn record_degraded_frames(stage: Stage, count: usize) {
    counter!(names::DEGRADED_FRAMES_TOTAL, "stage" => stage.as_str()).increment(count as u64);
}
