//! Result metadata published when a job succeeds.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Encoded image format of published frames and sprite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResultMetadata {
    pub total_frames: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub processing_time_seconds: f64,
    pub format: OutputFormat,
    pub transparent: bool,
    pub sprite_columns: u32,
    pub sprite_rows: u32,
    /// Loop diagnostic; a failed check does not fail the job
    pub loop_valid: bool,
    pub loop_similarity: f64,
}
