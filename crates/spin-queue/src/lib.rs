//! Redis Streams job queue and job record store.
//!
//! This crate provides:
//! - Job submission via Redis Streams
//! - Worker consumption with DLQ and pending-claim for crashed workers
//! - The flat job record store (`task:{id}`), Redis-backed or in-memory

pub mod error;
pub mod job;
pub mod queue;
pub mod record;

pub use error::{QueueError, QueueResult};
pub use job::{DeleteSpinJob, ProcessSpinJob, QueueJob};
pub use queue::{JobQueue, QueueConfig};
pub use record::{record_key, JobRecordStore, MemoryRecordStore, RedisRecordStore};
