//! FAST corners with binary BRIEF descriptors and cross-checked Hamming matching.

use image::{GrayImage, ImageBuffer, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::{FeatureMatcher, FeatureMatches, PointMatch};

/// Bresenham circle of radius 3 used by the FAST segment test.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Contiguous arc length required for a FAST-9 corner.
const ARC: usize = 9;
const DESCRIPTOR_BITS: usize = 256;
const PATTERN_SEED: u64 = 0x0b21_ef5e;

#[derive(Debug, Clone, PartialEq)]
pub struct BriefMatcherConfig {
    /// Keep at most this many corners per image, strongest first
    pub max_features: usize,
    /// FAST intensity threshold
    pub fast_threshold: u8,
    /// Half size of the square descriptor patch
    pub patch_radius: i32,
    /// Gaussian blur applied before sampling descriptor pairs
    pub blur_sigma: f32,
    /// Keep only mutual nearest neighbours
    pub cross_check: bool,
}

impl Default for BriefMatcherConfig {
    fn default() -> Self {
        Self {
            max_features: 1000,
            fast_threshold: 20,
            patch_radius: 13,
            blur_sigma: 1.2,
            cross_check: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Keypoint {
    x: u32,
    y: u32,
    score: f32,
}

type Descriptor = [u64; DESCRIPTOR_BITS / 64];

/// Native replacement for ORB + brute-force Hamming matching.
#[derive(Debug, Clone)]
pub struct BriefMatcher {
    config: BriefMatcherConfig,
    pattern: Vec<((i32, i32), (i32, i32))>,
}

impl Default for BriefMatcher {
    fn default() -> Self {
        Self::new(BriefMatcherConfig::default())
    }
}

impl BriefMatcher {
    pub fn new(config: BriefMatcherConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let r = config.patch_radius;
        let pattern = (0..DESCRIPTOR_BITS)
            .map(|_| {
                (
                    (rng.random_range(-r..=r), rng.random_range(-r..=r)),
                    (rng.random_range(-r..=r), rng.random_range(-r..=r)),
                )
            })
            .collect();
        Self { config, pattern }
    }

    pub fn with_max_features(max_features: usize) -> Self {
        Self::new(BriefMatcherConfig {
            max_features,
            ..Default::default()
        })
    }

    fn border(&self) -> u32 {
        (self.config.patch_radius.max(3) + 1) as u32
    }

    fn detect(&self, image: &GrayImage) -> Vec<Keypoint> {
        let (w, h) = image.dimensions();
        let border = self.border();
        if w <= 2 * border || h <= 2 * border {
            return Vec::new();
        }

        let t = self.config.fast_threshold as i16;
        let rows: Vec<Vec<(u32, f32)>> = (border..h - border)
            .into_par_iter()
            .map(|y| {
                (border..w - border)
                    .filter_map(|x| fast_score(image, x, y, t).map(|s| (x, s)))
                    .collect()
            })
            .collect();

        let mut scores = vec![0.0f32; (w * h) as usize];
        for (row, hits) in rows.iter().enumerate() {
            let y = border + row as u32;
            for &(x, s) in hits {
                scores[(y * w + x) as usize] = s;
            }
        }

        let mut keypoints: Vec<Keypoint> = rows
            .iter()
            .enumerate()
            .flat_map(|(row, hits)| {
                let y = border + row as u32;
                hits.iter().map(move |&(x, score)| Keypoint { x, y, score })
            })
            .filter(|kp| is_local_max(&scores, w, kp))
            .collect();

        keypoints.sort_by(|a, b| b.score.total_cmp(&a.score));
        keypoints.truncate(self.config.max_features);
        keypoints
    }

    fn describe(&self, smoothed: &GrayImage, keypoints: &[Keypoint]) -> Vec<Descriptor> {
        keypoints
            .par_iter()
            .map(|kp| {
                let mut desc = [0u64; DESCRIPTOR_BITS / 64];
                for (bit, ((ax, ay), (bx, by))) in self.pattern.iter().enumerate() {
                    let pa = pixel(smoothed, kp.x as i32 + ax, kp.y as i32 + ay);
                    let pb = pixel(smoothed, kp.x as i32 + bx, kp.y as i32 + by);
                    if pa < pb {
                        desc[bit / 64] |= 1 << (bit % 64);
                    }
                }
                desc
            })
            .collect()
    }

    fn features(&self, image: &GrayImage) -> (Vec<Keypoint>, Vec<Descriptor>) {
        let keypoints = self.detect(image);
        let smoothed: ImageBuffer<Luma<u8>, Vec<u8>> = image::imageops::blur(image, self.config.blur_sigma);
        let descriptors = self.describe(&smoothed, &keypoints);
        (keypoints, descriptors)
    }
}

impl FeatureMatcher for BriefMatcher {
    fn name(&self) -> &'static str {
        "fast-brief"
    }

    fn match_features(&self, a: &GrayImage, b: &GrayImage) -> FeatureMatches {
        let ((kps_a, desc_a), (kps_b, desc_b)) = rayon::join(|| self.features(a), || self.features(b));

        let mut matches = Vec::new();
        if !desc_a.is_empty() && !desc_b.is_empty() {
            let forward: Vec<(usize, u32)> = desc_a.par_iter().map(|d| nearest(d, &desc_b)).collect();
            let backward: Vec<usize> = if self.config.cross_check {
                desc_b.par_iter().map(|d| nearest(d, &desc_a).0).collect()
            } else {
                Vec::new()
            };

            for (ia, &(ib, distance)) in forward.iter().enumerate() {
                if self.config.cross_check && backward[ib] != ia {
                    continue;
                }
                let (ka, kb) = (kps_a[ia], kps_b[ib]);
                matches.push(PointMatch {
                    a: (ka.x as f64, ka.y as f64),
                    b: (kb.x as f64, kb.y as f64),
                    distance: distance as f64,
                });
            }
            matches.sort_by(|x, y| x.distance.total_cmp(&y.distance));
        }

        FeatureMatches {
            keypoints_a: kps_a.len(),
            keypoints_b: kps_b.len(),
            matches,
        }
    }
}

fn pixel(image: &GrayImage, x: i32, y: i32) -> u8 {
    image.get_pixel(x as u32, y as u32)[0]
}

/// FAST-9 segment test. Returns the corner score when `(x, y)` is a corner.
fn fast_score(image: &GrayImage, x: u32, y: u32, t: i16) -> Option<f32> {
    let center = image.get_pixel(x, y)[0] as i16;
    let mut diffs = [0i16; 16];
    for (i, (dx, dy)) in CIRCLE.iter().enumerate() {
        diffs[i] = pixel(image, x as i32 + dx, y as i32 + dy) as i16 - center;
    }

    let brighter = longest_arc(&diffs, |d| d > t);
    let darker = longest_arc(&diffs, |d| d < -t);
    if brighter < ARC && darker < ARC {
        return None;
    }

    let score: i32 = diffs
        .iter()
        .map(|&d| {
            let excess = if brighter >= ARC { d - t } else { -d - t };
            excess.max(0) as i32
        })
        .sum();
    Some(score as f32)
}

fn longest_arc(diffs: &[i16; 16], pred: impl Fn(i16) -> bool) -> usize {
    let mut best = 0;
    let mut run = 0;
    // Walk the circle twice so arcs that wrap around are counted
    for i in 0..32 {
        if pred(diffs[i % 16]) {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best.min(16)
}

fn is_local_max(scores: &[f32], width: u32, kp: &Keypoint) -> bool {
    for dy in -1i32..=1 {
        for dx in -1i32..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let idx = ((kp.y as i32 + dy) as u32 * width + (kp.x as i32 + dx) as u32) as usize;
            let neighbour = scores[idx];
            // Ties go to the earlier pixel in scan order
            if neighbour > kp.score || (neighbour == kp.score && (dy < 0 || (dy == 0 && dx < 0))) {
                return false;
            }
        }
    }
    true
}

fn nearest(query: &Descriptor, candidates: &[Descriptor]) -> (usize, u32) {
    let mut best = (0, u32::MAX);
    for (i, c) in candidates.iter().enumerate() {
        let d: u32 = query.iter().zip(c).map(|(x, y)| (x ^ y).count_ones()).sum();
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{shifted, textured};

    #[test]
    fn test_flat_image_has_no_keypoints() {
        let flat = GrayImage::from_pixel(120, 90, Luma([90]));
        let result = BriefMatcher::default().match_features(&flat, &flat);
        assert_eq!(result.keypoints_a, 0);
        assert!(result.matches.is_empty());
    }

    #[test]
    fn test_identical_images_match_in_place() {
        let img = textured(200, 150, 7);
        let result = BriefMatcher::default().match_features(&img, &img);
        assert!(result.matches.len() > 20);
        let best = &result.matches[..20];
        assert!(best.iter().all(|m| m.a == m.b && m.distance == 0.0));
    }

    #[test]
    fn test_shift_is_recovered() {
        let a = textured(240, 160, 11);
        let b = shifted(&a, 12, 0);
        let result = BriefMatcher::default().match_features(&a, &b);
        let top: Vec<_> = result.matches.iter().take(50).collect();
        assert!(top.len() >= 20);
        let mean_dx = top.iter().map(|m| m.b.0 - m.a.0).sum::<f64>() / top.len() as f64;
        assert!((mean_dx - 12.0).abs() < 1.0, "mean dx {mean_dx}");
    }

    #[test]
    fn test_longest_arc_wraps() {
        let mut diffs = [0i16; 16];
        for i in [12, 13, 14, 15, 0, 1, 2, 3, 4] {
            diffs[i] = 50;
        }
        assert_eq!(longest_arc(&diffs, |d| d > 20), 9);
    }
}
