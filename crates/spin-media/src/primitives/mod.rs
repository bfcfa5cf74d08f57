//! Feature matching, homography and similarity primitives.
//!
//! The geometry stages only see the traits below. A native implementation
//! ships by default; the `opencv` feature adds ORB + `findHomography`.

mod features;
mod homography;
mod similarity;

#[cfg(feature = "opencv")]
mod opencv_backend;

use image::GrayImage;
use std::sync::Arc;
use thiserror::Error;

pub use features::{BriefMatcher, BriefMatcherConfig};
pub use homography::{Homography, RansacConfig, RansacHomographySolver};
pub use similarity::SsimScorer;

#[cfg(feature = "opencv")]
pub use opencv_backend::{OpenCvHomographySolver, OrbMatcher};

/// Frame-level estimation failure. Callers fall back to a no-op.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryDegenerate {
    #[error("insufficient keypoints: found {found}, need {required}")]
    InsufficientKeypoints { found: usize, required: usize },

    #[error("insufficient matches: found {found}, need {required}")]
    InsufficientMatches { found: usize, required: usize },

    #[error("homography solve failed: {0}")]
    SolveFailed(String),
}

/// A matched point pair: `a` lies in the first image, `b` in the second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMatch {
    pub a: (f64, f64),
    pub b: (f64, f64),
    /// Descriptor distance, lower is better
    pub distance: f64,
}

/// Output of a matcher run. `matches` is sorted best-first.
#[derive(Debug, Clone, Default)]
pub struct FeatureMatches {
    pub keypoints_a: usize,
    pub keypoints_b: usize,
    pub matches: Vec<PointMatch>,
}

impl FeatureMatches {
    /// Enforce minimum keypoint and match counts.
    pub fn require(self, min_keypoints: usize, min_matches: usize) -> Result<Vec<PointMatch>, GeometryDegenerate> {
        let found = self.keypoints_a.min(self.keypoints_b);
        if found < min_keypoints {
            return Err(GeometryDegenerate::InsufficientKeypoints {
                found,
                required: min_keypoints,
            });
        }
        if self.matches.len() < min_matches {
            return Err(GeometryDegenerate::InsufficientMatches {
                found: self.matches.len(),
                required: min_matches,
            });
        }
        Ok(self.matches)
    }
}

/// Keypoint detection plus descriptor matching between two images.
pub trait FeatureMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    fn match_features(&self, a: &GrayImage, b: &GrayImage) -> FeatureMatches;
}

/// Robust projective fit with `dst ≈ H · src`.
pub trait HomographySolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn solve(&self, src: &[(f64, f64)], dst: &[(f64, f64)]) -> Result<Homography, GeometryDegenerate>;
}

/// Visual similarity in `[0, 1]`, 1 meaning identical.
pub trait SimilarityScorer: Send + Sync {
    fn name(&self) -> &'static str;

    fn similarity(&self, a: &GrayImage, b: &GrayImage) -> f64;
}

/// The primitive set wired into the geometry stages.
#[derive(Clone)]
pub struct Primitives {
    pub matcher: Arc<dyn FeatureMatcher>,
    pub solver: Arc<dyn HomographySolver>,
    pub scorer: Arc<dyn SimilarityScorer>,
}

impl Primitives {
    /// Pure-Rust primitives.
    pub fn native() -> Self {
        Self {
            matcher: Arc::new(BriefMatcher::default()),
            solver: Arc::new(RansacHomographySolver::default()),
            scorer: Arc::new(SsimScorer::default()),
        }
    }

    /// OpenCV ORB matching and homography with native SSIM.
    #[cfg(feature = "opencv")]
    pub fn opencv() -> Self {
        Self {
            matcher: Arc::new(OrbMatcher::default()),
            solver: Arc::new(OpenCvHomographySolver::default()),
            scorer: Arc::new(SsimScorer::default()),
        }
    }
}

impl Default for Primitives {
    fn default() -> Self {
        Self::native()
    }
}

impl std::fmt::Debug for Primitives {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Primitives")
            .field("matcher", &self.matcher.name())
            .field("solver", &self.solver.name())
            .field("scorer", &self.scorer.name())
            .finish()
    }
}
