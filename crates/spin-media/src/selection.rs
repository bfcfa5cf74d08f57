//! Angle-based frame selection.

use tracing::{debug, warn};

use crate::frame::Frame;
use crate::rotation::RotationEstimator;

/// Totals closer to zero than this are treated as "no rotation measured".
const DEGENERATE_TOTAL: f64 = 1e-6;

/// Rescale cumulative angles so the last value equals `expected_total`.
///
/// When the measured total is ~0 the angles are replaced by uniform spacing
/// over frame indices.
pub fn rescale_angles(cumulative: &[f64], expected_total: f64) -> Vec<f64> {
    let len = cumulative.len();
    match cumulative.last() {
        Some(&last) if last.abs() > DEGENERATE_TOTAL => {
            let scale = expected_total / last;
            cumulative.iter().map(|a| a * scale).collect()
        }
        _ => (0..len)
            .map(|i| i as f64 * expected_total / len as f64)
            .collect(),
    }
}

/// Indices of the frames nearest to `target_count` evenly spaced targets in
/// `[0, expected_total)`. Ties go to the lower index and repeats are kept.
pub fn select_indices_by_angle(cumulative: &[f64], target_count: usize, expected_total: f64) -> Vec<usize> {
    if cumulative.len() <= target_count {
        return (0..cumulative.len()).collect();
    }
    let scaled = rescale_angles(cumulative, expected_total);

    (0..target_count)
        .map(|k| {
            let target = k as f64 * expected_total / target_count as f64;
            let mut best = 0;
            let mut best_err = f64::INFINITY;
            for (i, angle) in scaled.iter().enumerate() {
                let err = (angle - target).abs();
                if err < best_err {
                    best = i;
                    best_err = err;
                }
            }
            best
        })
        .collect()
}

/// Number of different frames among `indices`, repeats anywhere in the list.
fn distinct_count(indices: &[usize]) -> usize {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.len()
}

pub struct FrameSelector {
    estimator: RotationEstimator,
}

impl FrameSelector {
    pub fn new(estimator: RotationEstimator) -> Self {
        Self { estimator }
    }

    pub fn estimator(&self) -> &RotationEstimator {
        &self.estimator
    }

    /// Pick `target_count` frames at equidistant angles.
    pub fn select_by_angle(&self, frames: &[Frame], target_count: usize, expected_total: f64) -> Vec<Frame> {
        if frames.len() <= target_count {
            return frames.to_vec();
        }
        let cumulative = self.estimator.cumulative_angles(frames);
        self.select_with_angles(frames, &cumulative, target_count, expected_total)
    }

    /// Selection over precomputed cumulative angles (e.g. from the result cache).
    pub fn select_with_angles(
        &self,
        frames: &[Frame],
        cumulative: &[f64],
        target_count: usize,
        expected_total: f64,
    ) -> Vec<Frame> {
        if frames.len() <= target_count {
            return frames.to_vec();
        }
        let indices = select_indices_by_angle(cumulative, target_count, expected_total);

        let distinct = distinct_count(&indices);
        if distinct < indices.len() {
            warn!(
                picks = indices.len(),
                distinct, "Angle selection repeated frames; rotation estimate may be degenerate"
            );
        }
        debug!(?indices, "Selected frames by angle");

        indices.into_iter().map(|i| frames[i].clone()).collect()
    }
}
