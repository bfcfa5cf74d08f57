//! Camera rotation estimation from horizontal feature drift.

use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::frame::Frame;
use crate::primitives::FeatureMatcher;

#[derive(Debug, Clone, PartialEq)]
pub struct RotationConfig {
    /// Best matches averaged per pair
    pub top_matches: usize,
    pub min_keypoints: usize,
    pub min_matches: usize,
    /// Degrees corresponding to a drift of one full frame width
    pub full_rotation_span: f64,
    /// Estimate every Nth frame; the rest inherit the previous value
    pub sample_stride: usize,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            top_matches: 50,
            min_keypoints: 10,
            min_matches: 10,
            full_rotation_span: 360.0,
            sample_stride: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationDirection {
    #[serde(rename = "cw")]
    Clockwise,
    #[serde(rename = "ccw")]
    CounterClockwise,
}

impl RotationDirection {
    /// Direction implied by the sign of a total angle. Zero counts as counter-clockwise.
    pub fn from_total(total: f64) -> Self {
        if total > 0.0 {
            RotationDirection::Clockwise
        } else {
            RotationDirection::CounterClockwise
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RotationDirection::Clockwise => "cw",
            RotationDirection::CounterClockwise => "ccw",
        }
    }
}

#[derive(Clone)]
pub struct RotationEstimator {
    matcher: Arc<dyn FeatureMatcher>,
    config: RotationConfig,
}

impl RotationEstimator {
    pub fn new(matcher: Arc<dyn FeatureMatcher>, config: RotationConfig) -> Self {
        Self { matcher, config }
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Angular displacement from `a` to `b` in degrees.
    ///
    /// Sparse texture yields 0.0 rather than an error.
    pub fn estimate_angle(&self, a: &Frame, b: &Frame) -> f64 {
        self.estimate_angle_gray(&a.to_gray(), &b.to_gray())
    }

    pub fn estimate_angle_gray(&self, a: &GrayImage, b: &GrayImage) -> f64 {
        if a.width() == 0 {
            return 0.0;
        }
        let matches = match self
            .matcher
            .match_features(a, b)
            .require(self.config.min_keypoints, self.config.min_matches)
        {
            Ok(matches) => matches,
            Err(reason) => {
                debug!(%reason, "Rotation estimate degenerate, using 0");
                return 0.0;
            }
        };

        let best = &matches[..matches.len().min(self.config.top_matches)];
        let dx = best.iter().map(|m| m.b.0 - m.a.0).sum::<f64>() / best.len() as f64;
        dx / a.width() as f64 * self.config.full_rotation_span
    }

    /// Running sum of pairwise angles, anchored at 0 for frame 0.
    pub fn cumulative_angles(&self, frames: &[Frame]) -> Vec<f64> {
        if frames.len() < 2 {
            return vec![0.0; frames.len()];
        }
        let grays: Vec<GrayImage> = frames.par_iter().map(Frame::to_gray).collect();
        let pairs = sampled_pairs(frames.len(), self.config.sample_stride);

        let estimates: HashMap<usize, f64> = pairs
            .par_iter()
            .map(|&(prev, cur)| (cur, self.estimate_angle_gray(&grays[prev], &grays[cur])))
            .collect();

        accumulate(frames.len(), &estimates)
    }

    /// Sign of the summed angle over `sample_count` evenly spaced pairs.
    pub fn rotation_direction(&self, frames: &[Frame], sample_count: usize) -> RotationDirection {
        if frames.len() < 2 {
            return RotationDirection::Clockwise;
        }
        let step = (frames.len() / sample_count.max(1)).max(1);
        let total: f64 = (0..frames.len() - step)
            .step_by(step)
            .collect::<Vec<_>>()
            .par_iter()
            .map(|&i| self.estimate_angle(&frames[i], &frames[i + step]))
            .sum();
        RotationDirection::from_total(total)
    }

    /// Degrees of rotation covered by the whole sequence.
    pub fn estimate_coverage(&self, frames: &[Frame]) -> f64 {
        self.cumulative_angles(frames)
            .last()
            .map(|a| a.abs())
            .unwrap_or(0.0)
    }
}

/// `(previous sampled, current)` index pairs for a stride.
fn sampled_pairs(len: usize, stride: usize) -> Vec<(usize, usize)> {
    let stride = stride.max(1);
    let mut pairs = Vec::new();
    let mut prev = 0;
    for i in (1..len).filter(|i| i % stride == 0) {
        pairs.push((prev, i));
        prev = i;
    }
    pairs
}

/// Fold per-frame estimates; frames without one inherit the previous value.
fn accumulate(len: usize, estimates: &HashMap<usize, f64>) -> Vec<f64> {
    let mut cumulative = Vec::with_capacity(len);
    if len == 0 {
        return cumulative;
    }
    cumulative.push(0.0);
    for i in 1..len {
        let prev = cumulative[i - 1];
        cumulative.push(prev + estimates.get(&i).copied().unwrap_or(0.0));
    }
    cumulative
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{positioned, PositionMatcher};

    fn estimator(keypoints: usize, stride: usize) -> RotationEstimator {
        RotationEstimator::new(
            Arc::new(PositionMatcher { keypoints }),
            RotationConfig {
                sample_stride: stride,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_angle_from_drift() {
        let est = estimator(40, 1);
        // 25 px of a 100 px frame at 360° per width
        let angle = est.estimate_angle(&positioned(0, 10), &positioned(1, 35));
        assert!((angle - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_sparse_texture_gives_zero() {
        let est = estimator(5, 1);
        assert_eq!(est.estimate_angle(&positioned(0, 10), &positioned(1, 35)), 0.0);
    }

    #[test]
    fn test_cumulative_anchored_and_sized() {
        let est = estimator(40, 1);
        let frames: Vec<_> = (0..5).map(|i| positioned(i, (i * 5) as u8)).collect();
        let angles = est.cumulative_angles(&frames);
        assert_eq!(angles.len(), 5);
        assert_eq!(angles[0], 0.0);
        for (i, a) in angles.iter().enumerate() {
            assert!((a - i as f64 * 18.0).abs() < 1e-9);
        }
        assert!(est.cumulative_angles(&[]).is_empty());
        assert_eq!(est.cumulative_angles(&frames[..1]), vec![0.0]);
    }

    #[test]
    fn test_stride_inherits_previous() {
        let est = estimator(40, 2);
        let frames: Vec<_> = (0..5).map(|i| positioned(i, (i * 5) as u8)).collect();
        let angles = est.cumulative_angles(&frames);
        // Frames 1 and 3 inherit; 2 and 4 are estimated against the last sample
        let expected = [0.0, 0.0, 36.0, 36.0, 72.0];
        for (a, e) in angles.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{angles:?}");
        }
    }

    #[test]
    fn test_direction_and_coverage() {
        let est = estimator(40, 1);
        let forward: Vec<_> = (0..10).map(|i| positioned(i, (i * 5) as u8)).collect();
        let backward: Vec<_> = (0..10).map(|i| positioned(i, (100 - i * 5) as u8)).collect();
        assert_eq!(est.rotation_direction(&forward, 5), RotationDirection::Clockwise);
        assert_eq!(est.rotation_direction(&backward, 5), RotationDirection::CounterClockwise);
        assert!((est.estimate_coverage(&backward) - 162.0).abs() < 1e-9);
    }

    #[test]
    fn test_sampled_pairs() {
        assert_eq!(sampled_pairs(5, 1), vec![(0, 1), (1, 2), (2, 3), (3, 4)]);
        assert_eq!(sampled_pairs(7, 3), vec![(0, 3), (3, 6)]);
        assert_eq!(sampled_pairs(4, 0), sampled_pairs(4, 1));
    }
}
