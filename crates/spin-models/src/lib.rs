//! Shared data models for the 360 spin pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Job records, statuses and pipeline stages
//! - Requested frame counts and job options
//! - Vehicle detections and bounding boxes
//! - Sprite sheet layout
//! - Result metadata published on success

pub mod detection;
pub mod error;
pub mod job;
pub mod result;
pub mod sprite;
pub mod stage;

// Re-export common types
pub use detection::{BoundingBox, Detection, Point};
pub use error::{ModelError, ModelResult};
pub use job::{FrameCount, JobId, JobOptions, JobRecord};
pub use result::{OutputFormat, ResultMetadata};
pub use sprite::SpriteLayout;
pub use stage::{JobStatus, Stage};
