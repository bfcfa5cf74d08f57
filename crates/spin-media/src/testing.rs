//! Synthetic images and fake primitives shared by unit tests.

use image::{GrayImage, Luma, Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::frame::Frame;
use crate::primitives::{FeatureMatcher, FeatureMatches, PointMatch};

/// Blocky random texture with plenty of corners.
pub fn textured(width: u32, height: u32, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = GrayImage::from_pixel(width, height, Luma([128]));
    for _ in 0..(width * height / 150) {
        let x0 = rng.random_range(0..width);
        let y0 = rng.random_range(0..height);
        let w = rng.random_range(6..24);
        let h = rng.random_range(6..24);
        let v: u8 = rng.random_range(0..=255);
        for y in y0..(y0 + h).min(height) {
            for x in x0..(x0 + w).min(width) {
                img.put_pixel(x, y, Luma([v]));
            }
        }
    }
    img
}

/// Content moved by `(dx, dy)`; uncovered pixels are mid gray.
pub fn shifted(src: &GrayImage, dx: i32, dy: i32) -> GrayImage {
    let (w, h) = src.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let sx = x as i32 - dx;
        let sy = y as i32 - dy;
        if sx >= 0 && sy >= 0 && (sx as u32) < w && (sy as u32) < h {
            *src.get_pixel(sx as u32, sy as u32)
        } else {
            Luma([128])
        }
    })
}

pub fn to_rgba(gray: &GrayImage) -> RgbaImage {
    RgbaImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        Rgba([v, v, v, 255])
    })
}

pub fn solid_frame(index: usize, width: u32, height: u32, value: u8) -> Frame {
    Frame::new(index, RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255])))
}

/// Matcher that reads a horizontal "camera position" from pixel (0, 0).
pub struct PositionMatcher {
    pub keypoints: usize,
}

impl FeatureMatcher for PositionMatcher {
    fn name(&self) -> &'static str {
        "position"
    }

    fn match_features(&self, a: &GrayImage, b: &GrayImage) -> FeatureMatches {
        let xa = a.get_pixel(0, 0)[0] as f64;
        let xb = b.get_pixel(0, 0)[0] as f64;
        FeatureMatches {
            keypoints_a: self.keypoints,
            keypoints_b: self.keypoints,
            matches: (0..self.keypoints.min(60))
                .map(|i| PointMatch {
                    a: (10.0 + i as f64, 5.0),
                    b: (10.0 + i as f64 + (xb - xa), 5.0),
                    distance: i as f64,
                })
                .collect(),
        }
    }
}

/// 100 px wide frame whose encoded camera position is `pos` pixels.
pub fn positioned(index: usize, pos: u8) -> Frame {
    solid_frame(index, 100, 10, pos)
}
