//! Spin worker.
//!
//! This crate provides:
//! - The stage orchestrator that turns an uploaded video into a published spin
//! - Model handle and TTL result caches
//! - Worker and pipeline configuration
//! - Queue executor with bounded concurrency, timeouts and graceful shutdown
//! - Structured job logging and Prometheus metrics

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod orchestrator;

pub use cache::{cache_key, video_fingerprint, HandleCache, ResultCache};
pub use config::{PipelineConfig, SelectionStrategy, WorkerConfig};
pub use context::WorkerContext;
pub use error::{ErrorKind, WorkerError, WorkerResult};
pub use executor::{run_job, JobExecutor};
pub use logging::JobLogger;
pub use orchestrator::{SpinOrchestrator, SpinServices};
