//! Loop closure: choose an end frame that matches the first one.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::frame::Frame;
use crate::primitives::SimilarityScorer;

/// Default similarity a first/last pair must reach to count as a loop.
pub const DEFAULT_LOOP_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopValidation {
    pub valid: bool,
    pub similarity: f64,
}

/// Outcome of [`LoopCloser::find_best_loop_point`].
#[derive(Debug, Clone)]
pub struct LoopSelection {
    pub frames: Vec<Frame>,
    /// Index into the input of the chosen end frame
    pub end_index: usize,
    /// Similarity of the chosen end frame to frame 0, if a search ran
    pub similarity: Option<f64>,
}

/// Inclusive range of candidate end indices around `target_count - 1`.
///
/// The half-width is `max(3, target_count / 10)`. Index 0 is never a
/// candidate and the range never runs past the input.
pub fn search_window(len: usize, target_count: usize) -> Option<(usize, usize)> {
    if len < 2 || target_count == 0 {
        return None;
    }
    let center = target_count - 1;
    let radius = (target_count / 10).max(3);
    let start = center.saturating_sub(radius).max(1);
    let end = (center + radius).min(len - 1);
    (start <= end).then_some((start, end))
}

/// `count` evenly spaced indices over `0..len`, first and last included.
pub fn linspace_indices(len: usize, count: usize) -> Vec<usize> {
    match (len, count) {
        (0, _) | (_, 0) => Vec::new(),
        (_, 1) => vec![0],
        _ => {
            let step = (len - 1) as f64 / (count - 1) as f64;
            (0..count).map(|i| (i as f64 * step).round() as usize).collect()
        }
    }
}

#[derive(Clone)]
pub struct LoopCloser {
    scorer: Arc<dyn SimilarityScorer>,
}

impl LoopCloser {
    pub fn new(scorer: Arc<dyn SimilarityScorer>) -> Self {
        Self { scorer }
    }

    pub fn similarity(&self, a: &Frame, b: &Frame) -> f64 {
        self.scorer.similarity(&a.to_gray(), &b.to_gray())
    }

    /// Truncate `frames` at the candidate end most similar to frame 0, then
    /// subsample to `target_count` if still too long.
    ///
    /// Ties keep the earliest candidate. When the best end lies before
    /// `target_count - 1` the result is shorter than `target_count`.
    pub fn find_best_loop_point(&self, frames: &[Frame], target_count: usize) -> LoopSelection {
        if frames.len() <= target_count {
            return LoopSelection {
                frames: frames.to_vec(),
                end_index: frames.len().saturating_sub(1),
                similarity: None,
            };
        }
        let Some((start, end)) = search_window(frames.len(), target_count) else {
            return LoopSelection {
                frames: frames[..target_count].to_vec(),
                end_index: target_count.saturating_sub(1),
                similarity: None,
            };
        };

        let first = frames[0].to_gray();
        let scores: Vec<(usize, f64)> = (start..=end)
            .into_par_iter()
            .map(|i| (i, self.scorer.similarity(&first, &frames[i].to_gray())))
            .collect();

        // A window where nothing scores above zero keeps the nominal end
        // `target_count - 1` rather than the earliest candidate.
        let mut best_end = target_count - 1;
        let mut best_similarity = 0.0;
        for &(i, score) in &scores {
            if score > best_similarity {
                best_similarity = score;
                best_end = i;
            }
        }
        debug!(start, end, best_end, best_similarity, "Loop point search");

        let truncated = &frames[..=best_end];
        let selected = if truncated.len() > target_count {
            linspace_indices(truncated.len(), target_count)
                .into_iter()
                .map(|i| truncated[i].clone())
                .collect()
        } else {
            truncated.to_vec()
        };

        info!(
            input = frames.len(),
            selected = selected.len(),
            end_index = best_end,
            similarity = best_similarity,
            "Loop point selected"
        );
        LoopSelection {
            frames: selected,
            end_index: best_end,
            similarity: Some(best_similarity),
        }
    }

    /// First/last similarity of a finished sequence. Diagnostic only.
    pub fn validate_loop(&self, frames: &[Frame], threshold: f64) -> LoopValidation {
        let (Some(first), Some(last)) = (frames.first(), frames.last()) else {
            return LoopValidation {
                valid: false,
                similarity: 0.0,
            };
        };
        if frames.len() < 2 {
            return LoopValidation {
                valid: false,
                similarity: 0.0,
            };
        }
        let similarity = self.similarity(first, last);
        LoopValidation {
            valid: similarity >= threshold,
            similarity,
        }
    }
}

/// Append `blend_count` cross-fades from the last frame back to the first.
///
/// Blend `i` (1-based) weights the first frame by `i / (blend_count + 1)`.
pub fn blend_loop_transition(frames: &[Frame], blend_count: usize) -> Vec<Frame> {
    let mut out = frames.to_vec();
    let (Some(first), Some(last)) = (frames.first(), frames.last()) else {
        return out;
    };
    if frames.len() < 2 || blend_count == 0 || first.dimensions() != last.dimensions() {
        return out;
    }

    let next_index = frames.iter().map(|f| f.index).max().unwrap_or(0) + 1;
    for i in 1..=blend_count {
        let alpha = i as f64 / (blend_count + 1) as f64;
        let blended = cross_fade(&last.image, &first.image, alpha);
        out.push(Frame::new(next_index + i - 1, blended));
    }
    out
}

fn cross_fade(from: &RgbaImage, to: &RgbaImage, alpha: f64) -> RgbaImage {
    RgbaImage::from_fn(from.width(), from.height(), |x, y| {
        let a = from.get_pixel(x, y);
        let b = to.get_pixel(x, y);
        let mut px = [0u8; 4];
        for c in 0..4 {
            px[c] = (a[c] as f64 * (1.0 - alpha) + b[c] as f64 * alpha).round() as u8;
        }
        Rgba(px)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::solid_frame;
    use image::GrayImage;

    /// Similarity falls off with the difference in mean gray level.
    struct LevelScorer;

    impl SimilarityScorer for LevelScorer {
        fn name(&self) -> &'static str {
            "level"
        }

        fn similarity(&self, a: &GrayImage, b: &GrayImage) -> f64 {
            let diff = (a.get_pixel(0, 0)[0] as f64 - b.get_pixel(0, 0)[0] as f64).abs();
            1.0 - diff / 255.0
        }
    }

    fn closer() -> LoopCloser {
        LoopCloser::new(Arc::new(LevelScorer))
    }

    fn frames(levels: &[u8]) -> Vec<Frame> {
        levels
            .iter()
            .enumerate()
            .map(|(i, &v)| solid_frame(i, 4, 4, v))
            .collect()
    }

    struct Unrelated;

    impl SimilarityScorer for Unrelated {
        fn name(&self) -> &'static str {
            "unrelated"
        }

        fn similarity(&self, _a: &GrayImage, _b: &GrayImage) -> f64 {
            0.0
        }
    }

    #[test]
    fn test_zero_scores_keep_nominal_end() {
        let input = frames(&[10; 14]);
        let sel = LoopCloser::new(Arc::new(Unrelated)).find_best_loop_point(&input, 8);
        assert_eq!(sel.end_index, 7);
        assert_eq!(sel.similarity, Some(0.0));
        assert_eq!(sel.frames.len(), 8);
    }

    #[test]
    fn test_window_bounds() {
        assert_eq!(search_window(50, 36), Some((32, 38)));
        assert_eq!(search_window(37, 36), Some((32, 36)));
        assert_eq!(search_window(100, 72), Some((64, 78)));
        assert_eq!(search_window(10, 2), Some((1, 4)));
        assert_eq!(search_window(1, 4), None);
    }

    #[test]
    fn test_linspace_includes_ends() {
        assert_eq!(linspace_indices(10, 4), vec![0, 3, 6, 9]);
        assert_eq!(linspace_indices(5, 5), vec![0, 1, 2, 3, 4]);
        assert_eq!(linspace_indices(7, 1), vec![0]);
        assert!(linspace_indices(0, 3).is_empty());
    }

    #[test]
    fn test_short_input_unchanged() {
        let input = frames(&[1, 2, 3]);
        let sel = closer().find_best_loop_point(&input, 3);
        assert_eq!(sel.frames.len(), 3);
        assert_eq!(sel.end_index, 2);
        assert!(sel.similarity.is_none());
    }

    #[test]
    fn test_best_end_subsampled_to_target() {
        // Target 8, window 4..=10; frame 10 matches frame 0 exactly
        let mut levels: Vec<u8> = (0..14).map(|i| 100 + i * 10).collect();
        levels[10] = 100;
        let input = frames(&levels);

        let sel = closer().find_best_loop_point(&input, 8);
        assert_eq!(sel.end_index, 10);
        assert_eq!(sel.similarity, Some(1.0));
        assert_eq!(sel.frames.len(), 8);
        assert_eq!(sel.frames[0].index, 0);
        assert_eq!(sel.frames.last().unwrap().index, 10);
    }

    #[test]
    fn test_ties_prefer_earliest_and_short_result() {
        // Target 8; frames 5 and 9 both match frame 0
        let mut levels: Vec<u8> = (0..14).map(|i| 100 + i * 10).collect();
        levels[5] = 100;
        levels[9] = 100;
        let sel = closer().find_best_loop_point(&frames(&levels), 8);
        assert_eq!(sel.end_index, 5);
        assert_eq!(sel.frames.len(), 6);
    }

    #[test]
    fn test_validate_loop() {
        let c = closer();
        assert_eq!(
            c.validate_loop(&frames(&[10]), 0.7),
            LoopValidation {
                valid: false,
                similarity: 0.0
            }
        );
        assert!(c.validate_loop(&frames(&[10, 200, 12]), 0.7).valid);

        let bad = c.validate_loop(&frames(&[0, 255]), 0.7);
        assert!(!bad.valid);
        assert_eq!(bad.similarity, 0.0);
    }

    #[test]
    fn test_blend_appends_cross_fades() {
        let input = frames(&[0, 90]);
        let out = blend_loop_transition(&input, 2);
        assert_eq!(out.len(), 4);
        // From last (90) toward first (0)
        assert_eq!(out[2].image.get_pixel(0, 0)[0], 60);
        assert_eq!(out[3].image.get_pixel(0, 0)[0], 30);
        assert_eq!(out[3].index, 3);
        assert_eq!(blend_loop_transition(&input, 0).len(), 2);
    }
}
