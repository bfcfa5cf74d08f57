//! Structural similarity (SSIM) on grayscale images.

use image::imageops::{self, FilterType};
use image::GrayImage;

use super::SimilarityScorer;

const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Mean SSIM over sliding square windows.
///
/// Inputs are downscaled so the long side is at most `max_side`; the second
/// image is resized to the first when their sizes differ.
#[derive(Debug, Clone)]
pub struct SsimScorer {
    pub max_side: u32,
    pub window: u32,
    pub stride: u32,
}

impl Default for SsimScorer {
    fn default() -> Self {
        Self {
            max_side: 256,
            window: 7,
            stride: 2,
        }
    }
}

impl SsimScorer {
    fn prepare(&self, a: &GrayImage, b: &GrayImage) -> (GrayImage, GrayImage) {
        let (w, h) = a.dimensions();
        let b = if b.dimensions() != (w, h) {
            imageops::resize(b, w, h, FilterType::Triangle)
        } else {
            b.clone()
        };

        let long = w.max(h);
        if long <= self.max_side {
            return (a.clone(), b);
        }
        let scale = self.max_side as f64 / long as f64;
        let (sw, sh) = (
            ((w as f64 * scale).round() as u32).max(1),
            ((h as f64 * scale).round() as u32).max(1),
        );
        (
            imageops::resize(a, sw, sh, FilterType::Triangle),
            imageops::resize(&b, sw, sh, FilterType::Triangle),
        )
    }
}

impl SimilarityScorer for SsimScorer {
    fn name(&self) -> &'static str {
        "ssim"
    }

    fn similarity(&self, a: &GrayImage, b: &GrayImage) -> f64 {
        if a.width() == 0 || a.height() == 0 || b.width() == 0 || b.height() == 0 {
            return 0.0;
        }
        let (a, b) = self.prepare(a, b);
        let (w, h) = a.dimensions();
        let win = self.window.min(w).min(h).max(1);
        let stride = self.stride.max(1);

        let mut total = 0.0;
        let mut count = 0usize;
        let mut y = 0;
        while y + win <= h {
            let mut x = 0;
            while x + win <= w {
                total += window_ssim(&a, &b, x, y, win);
                count += 1;
                x += stride;
            }
            y += stride;
        }

        if count == 0 {
            return 0.0;
        }
        (total / count as f64).clamp(0.0, 1.0)
    }
}

fn window_ssim(a: &GrayImage, b: &GrayImage, x0: u32, y0: u32, win: u32) -> f64 {
    let n = (win * win) as f64;
    let (mut sa, mut sb, mut saa, mut sbb, mut sab) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for y in y0..y0 + win {
        for x in x0..x0 + win {
            let pa = a.get_pixel(x, y)[0] as f64;
            let pb = b.get_pixel(x, y)[0] as f64;
            sa += pa;
            sb += pb;
            saa += pa * pa;
            sbb += pb * pb;
            sab += pa * pb;
        }
    }
    let (ma, mb) = (sa / n, sb / n);
    let var_a = (saa / n - ma * ma).max(0.0);
    let var_b = (sbb / n - mb * mb).max(0.0);
    let cov = sab / n - ma * mb;

    ((2.0 * ma * mb + C1) * (2.0 * cov + C2)) / ((ma * ma + mb * mb + C1) * (var_a + var_b + C2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{shifted, textured};
    use image::Luma;

    #[test]
    fn test_identical_images_score_one() {
        let img = textured(120, 80, 3);
        let score = SsimScorer::default().similarity(&img, &img);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_different_images_score_lower() {
        let a = textured(120, 80, 3);
        let near = shifted(&a, 1, 0);
        let far = textured(120, 80, 99);
        let scorer = SsimScorer::default();
        let s_near = scorer.similarity(&a, &near);
        let s_far = scorer.similarity(&a, &far);
        assert!(s_near > s_far, "{s_near} vs {s_far}");
    }

    #[test]
    fn test_mismatched_sizes_are_resized() {
        let a = GrayImage::from_pixel(100, 60, Luma([200]));
        let b = GrayImage::from_pixel(50, 30, Luma([200]));
        assert!((SsimScorer::default().similarity(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_large_images_are_downscaled() {
        let img = textured(640, 360, 5);
        let scorer = SsimScorer::default();
        let (a, _) = scorer.prepare(&img, &img);
        assert_eq!(a.dimensions(), (256, 144));
    }
}
