//! Frame processing for 360° vehicle spins.
//!
//! This crate provides:
//! - FFmpeg/FFprobe command building, probing, stabilization and frame extraction
//! - In-memory frames and parallel image I/O
//! - Feature matching, homography and similarity primitives behind traits
//! - Rotation estimation and angle-based frame selection
//! - Detection smoothing, alignment and vehicle-centered normalization
//! - Loop closure search and validation
//! - Sprite sheet assembly, image encoding and the HTML viewer
//!
//! Optional features:
//! - `opencv`: OpenCV ORB matcher and homography solver
//! - `onnx`: in-process YOLOv8 vehicle detector (`cuda` adds the CUDA provider)

pub mod align;
pub mod command;
pub mod detection;
pub mod encode;
pub mod error;
pub mod extract;
pub mod frame;
pub mod loop_closure;
pub mod normalize;
pub mod primitives;
pub mod probe;
pub mod rotation;
pub mod selection;
pub mod smoothing;
pub mod source;
pub mod sprite;
pub mod stabilize;
pub mod viewer;
pub mod warp;

#[cfg(feature = "onnx")]
pub mod onnx_detector;

#[cfg(test)]
pub(crate) mod testing;

pub use align::{align_to_center_mass, map_detections, AlignConfig, AlignedFrame, AlignmentStrategy, HomographyAligner};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use detection::{detect_sequence, remove_backgrounds, BackgroundRemover, VehicleDetector};
pub use encode::{encode_image, EncodeOptions};
pub use error::{MediaError, MediaResult};
pub use extract::{ExtractionMode, ExtractionRequest};
pub use frame::Frame;
pub use loop_closure::{blend_loop_transition, LoopCloser, LoopSelection, LoopValidation};
pub use normalize::{NormalizeConfig, Normalizer};
pub use primitives::{GeometryDegenerate, Primitives};
pub use probe::{probe_video, VideoInfo};
pub use rotation::{RotationConfig, RotationDirection, RotationEstimator};
pub use selection::FrameSelector;
pub use smoothing::smooth_detections;
pub use source::{FfmpegFrameSource, FrameSource};
pub use sprite::SpriteAssembler;
pub use stabilize::{Stabilizer, StabilizerConfig};
pub use viewer::{render_viewer, ViewerOptions};

#[cfg(feature = "onnx")]
pub use onnx_detector::{OnnxDetectorConfig, OnnxVehicleDetector};
