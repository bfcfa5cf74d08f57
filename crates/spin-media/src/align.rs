//! Frame alignment.
//!
//! Two strategies are available:
//! - **Homography**: every frame is registered onto a reference frame with a
//!   projective transform fitted to matched features.
//! - **Center of mass**: every frame is translated so its (smoothed) vehicle
//!   center lands on the mean center of the sequence.
//!
//! Failures never abort the sequence; the frame passes through unchanged.

use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use spin_models::{BoundingBox, Detection, Point};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::frame::Frame;
use crate::primitives::{FeatureMatcher, GeometryDegenerate, Homography, HomographySolver};
use crate::warp::{translate, warp_perspective};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AlignmentStrategy {
    Homography { reference_index: usize },
    CenterOfMass,
    None,
}

impl Default for AlignmentStrategy {
    fn default() -> Self {
        AlignmentStrategy::Homography { reference_index: 0 }
    }
}

impl AlignmentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlignmentStrategy::Homography { .. } => "homography",
            AlignmentStrategy::CenterOfMass => "center_of_mass",
            AlignmentStrategy::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlignConfig {
    pub min_keypoints: usize,
    pub min_matches: usize,
    /// Matches fed to the solver, best first
    pub top_matches: usize,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            min_keypoints: 4,
            min_matches: 10,
            top_matches: 50,
        }
    }
}

/// One aligned frame plus the transform applied to it.
///
/// `transform` is `None` for the reference and for pass-through frames.
#[derive(Debug, Clone)]
pub struct AlignedFrame {
    pub frame: Frame,
    pub transform: Option<Homography>,
}

impl AlignedFrame {
    fn unchanged(frame: &Frame) -> Self {
        Self {
            frame: frame.clone(),
            transform: None,
        }
    }
}

#[derive(Clone)]
pub struct HomographyAligner {
    matcher: Arc<dyn FeatureMatcher>,
    solver: Arc<dyn HomographySolver>,
    config: AlignConfig,
}

impl HomographyAligner {
    pub fn new(matcher: Arc<dyn FeatureMatcher>, solver: Arc<dyn HomographySolver>, config: AlignConfig) -> Self {
        Self {
            matcher,
            solver,
            config,
        }
    }

    /// Transform mapping `frame` pixel coordinates onto `reference`.
    pub fn compute_homography(&self, reference: &GrayImage, frame: &GrayImage) -> Result<Homography, GeometryDegenerate> {
        let matches = self
            .matcher
            .match_features(reference, frame)
            .require(self.config.min_keypoints, self.config.min_matches)?;

        let best = &matches[..matches.len().min(self.config.top_matches)];
        let src: Vec<(f64, f64)> = best.iter().map(|m| m.b).collect();
        let dst: Vec<(f64, f64)> = best.iter().map(|m| m.a).collect();
        self.solver.solve(&src, &dst)
    }

    /// Warp `frame` into the reference's coordinate system, sized like the reference.
    pub fn align_frame(&self, reference: &Frame, frame: &Frame) -> Result<AlignedFrame, GeometryDegenerate> {
        self.align_gray(&reference.to_gray(), reference.dimensions(), frame)
    }

    fn align_gray(
        &self,
        reference: &GrayImage,
        (width, height): (u32, u32),
        frame: &Frame,
    ) -> Result<AlignedFrame, GeometryDegenerate> {
        let h = self.compute_homography(reference, &frame.to_gray())?;
        let warped = warp_perspective(&frame.image, &h, width, height);
        Ok(AlignedFrame {
            frame: frame.with_image(warped),
            transform: Some(h),
        })
    }

    /// Align every frame to `frames[reference_index]`.
    ///
    /// The reference is copied as-is. Frames whose fit is degenerate pass
    /// through unchanged. An out-of-range reference falls back to frame 0.
    pub fn align_sequence(&self, frames: &[Frame], reference_index: usize) -> Vec<AlignedFrame> {
        if frames.is_empty() {
            return Vec::new();
        }
        let reference_index = if reference_index < frames.len() {
            reference_index
        } else {
            warn!(reference_index, len = frames.len(), "Reference index out of range, using frame 0");
            0
        };

        let reference = &frames[reference_index];
        let reference_gray = reference.to_gray();
        let size = reference.dimensions();

        let aligned: Vec<AlignedFrame> = frames
            .par_iter()
            .enumerate()
            .map(|(i, frame)| {
                if i == reference_index {
                    return AlignedFrame::unchanged(frame);
                }
                match self.align_gray(&reference_gray, size, frame) {
                    Ok(aligned) => aligned,
                    Err(reason) => {
                        debug!(frame = i, %reason, "Alignment degenerate, passing frame through");
                        AlignedFrame::unchanged(frame)
                    }
                }
            })
            .collect();

        let warped = aligned.iter().filter(|a| a.transform.is_some()).count();
        info!(
            frames = frames.len(),
            warped,
            passed_through = frames.len() - warped - 1,
            "Homography alignment complete"
        );
        aligned
    }
}

/// Translate each frame so its vehicle center sits on the sequence mean.
///
/// Returns the input unchanged when the detection list does not line up
/// with the frames or holds no detections. Frames without a detection pass
/// through. Detections are shifted along with their frames.
pub fn align_to_center_mass(
    frames: &[Frame],
    detections: &[Option<Detection>],
) -> (Vec<Frame>, Vec<Option<Detection>>) {
    let unchanged = || (frames.to_vec(), detections.to_vec());
    if detections.len() != frames.len() {
        warn!(
            frames = frames.len(),
            detections = detections.len(),
            "Detection count mismatch, skipping center alignment"
        );
        return unchanged();
    }
    let Some(target) = mean_center(detections) else {
        return unchanged();
    };

    frames
        .par_iter()
        .zip(detections.par_iter())
        .map(|(frame, det)| match det {
            Some(det) => {
                let dx = target.x - det.center.x;
                let dy = target.y - det.center.y;
                let moved = frame.with_image(translate(&frame.image, dx, dy));
                (moved, Some(map_detection(det, &Homography::translation(dx, dy))))
            }
            None => (frame.clone(), None),
        })
        .unzip()
}

fn mean_center(detections: &[Option<Detection>]) -> Option<Point> {
    let centers: Vec<Point> = detections.iter().flatten().map(|d| d.center).collect();
    if centers.is_empty() {
        return None;
    }
    let n = centers.len() as f64;
    Some(Point::new(
        centers.iter().map(|c| c.x).sum::<f64>() / n,
        centers.iter().map(|c| c.y).sum::<f64>() / n,
    ))
}

/// Carry a detection through a transform.
///
/// The box becomes the axis-aligned hull of its projected corners. A
/// transform that sends any corner to infinity leaves the detection as-is.
pub fn map_detection(det: &Detection, h: &Homography) -> Detection {
    let b = &det.bbox;
    let corners = [(b.x1, b.y1), (b.x2, b.y1), (b.x2, b.y2), (b.x1, b.y2)];
    let projected: Option<Vec<(f64, f64)>> = corners.iter().map(|&(x, y)| h.project(x, y)).collect();
    let (Some(projected), Some(center)) = (projected, h.project(det.center.x, det.center.y)) else {
        return det.clone();
    };

    let bbox = BoundingBox::new(
        projected.iter().map(|p| p.0).fold(f64::INFINITY, f64::min),
        projected.iter().map(|p| p.1).fold(f64::INFINITY, f64::min),
        projected.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max),
        projected.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max),
    );
    Detection {
        bbox,
        center: Point::new(center.0, center.1),
        ..det.clone()
    }
}

/// Carry detections through the transforms recorded by [`HomographyAligner::align_sequence`].
pub fn map_detections(aligned: &[AlignedFrame], detections: &[Option<Detection>]) -> Vec<Option<Detection>> {
    if aligned.len() != detections.len() {
        return detections.to_vec();
    }
    aligned
        .iter()
        .zip(detections)
        .map(|(a, det)| match (&a.transform, det) {
            (Some(h), Some(det)) => Some(map_detection(det, h)),
            _ => det.clone(),
        })
        .collect()
}
