//! Temporal smoothing of per-frame vehicle detections.

use spin_models::{Detection, Point};

/// Replace each missing detection with the nearest present one.
///
/// Distance is measured in frame indices; ties resolve to the lower index.
/// A sequence with no detections at all is returned unchanged.
pub fn fill_gaps(detections: &[Option<Detection>]) -> Vec<Option<Detection>> {
    let present: Vec<usize> = detections
        .iter()
        .enumerate()
        .filter_map(|(i, d)| d.as_ref().map(|_| i))
        .collect();
    if present.is_empty() {
        return detections.to_vec();
    }

    detections
        .iter()
        .enumerate()
        .map(|(i, det)| {
            if det.is_some() {
                return det.clone();
            }
            // `present` is ascending, so min_by_key keeps the lower index on ties
            present
                .iter()
                .min_by_key(|&&j| j.abs_diff(i))
                .and_then(|&j| detections[j].clone())
        })
        .collect()
}

/// Centered moving average with the window clamped at the ends.
///
/// Sequences shorter than the window are returned as-is.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || values.len() < window {
        return values.to_vec();
    }
    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(values.len());
            values[start..end].iter().sum::<f64>() / (end - start) as f64
        })
        .collect()
}

/// Fill gaps, then smooth detection centers over `window` frames.
///
/// Boxes keep their original extent; only `center` moves.
pub fn smooth_detections(detections: &[Option<Detection>], window: usize) -> Vec<Option<Detection>> {
    let filled = fill_gaps(detections);
    if filled.iter().any(Option::is_none) {
        return filled;
    }

    let xs: Vec<f64> = filled.iter().flatten().map(|d| d.center.x).collect();
    let ys: Vec<f64> = filled.iter().flatten().map(|d| d.center.y).collect();
    let sx = moving_average(&xs, window);
    let sy = moving_average(&ys, window);

    filled
        .iter()
        .zip(sx.into_iter().zip(sy))
        .map(|(det, (x, y))| det.as_ref().map(|d| d.with_center(Point::new(x, y))))
        .collect()
}
