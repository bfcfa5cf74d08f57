//! Object storage for spin jobs.
//!
//! This crate provides:
//! - The [`ObjectStore`] contract used by the worker
//! - An S3-compatible client (MinIO, R2, AWS)
//! - An in-memory store for tests and local runs
//! - The job-scoped key layout

pub mod error;
pub mod keys;
pub mod memory;
pub mod s3;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use s3::{S3Config, S3Store};
pub use store::ObjectStore;
