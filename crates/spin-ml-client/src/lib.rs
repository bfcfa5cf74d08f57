//! Client for the external ML inference service.
//!
//! This crate provides:
//! - Vehicle detection (`POST /detect`) as a [`spin_media::VehicleDetector`]
//! - Background removal (`POST /remove-background`) as a [`spin_media::BackgroundRemover`]
//! - Retry with exponential backoff for transient failures

pub mod client;
pub mod error;
pub mod retry;
pub mod types;

pub use client::{MlClient, MlClientConfig};
pub use error::{MlClientError, MlClientResult};
pub use retry::RetryConfig;
pub use types::{DetectResponse, RawDetection};
