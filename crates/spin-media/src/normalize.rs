//! Vehicle-centered crop and resize to a fixed output size.

use image::imageops::{self, FilterType};
use rayon::prelude::*;
use spin_models::Detection;

use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeConfig {
    pub width: u32,
    pub height: u32,
    /// Extra margin around the vehicle box, as a fraction of its size per side
    pub padding: f64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            padding: 0.15,
        }
    }
}

impl NormalizeConfig {
    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

/// Pixel rectangle `[x, x + width) × [y, y + height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Crop window for a `width × height` image.
///
/// Without a detection this is a centered crop to the output aspect ratio.
/// With one, the padded vehicle box is grown to the output aspect (and to at
/// least half the short image side), centered on the detection's center and
/// shifted back inside the image.
pub fn crop_box(width: u32, height: u32, detection: Option<&Detection>, config: &NormalizeConfig) -> CropBox {
    let aspect = config.aspect();
    let (w, h) = (width as f64, height as f64);

    let Some(det) = detection else {
        let (ow, oh) = (config.width.max(1) as u64, config.height.max(1) as u64);
        return if width as u64 * oh > height as u64 * ow {
            let cw = ((height as u64 * ow / oh) as u32).min(width);
            CropBox {
                x: (width - cw) / 2,
                y: 0,
                width: cw,
                height,
            }
        } else {
            let ch = ((width as u64 * oh / ow) as u32).min(height);
            CropBox {
                x: 0,
                y: (height - ch) / 2,
                width,
                height: ch,
            }
        };
    };

    let padded_w = det.bbox.width() * (1.0 + 2.0 * config.padding);
    let padded_h = det.bbox.height() * (1.0 + 2.0 * config.padding);
    let (mut cw, mut ch) = if padded_h > 0.0 && padded_w / padded_h > aspect {
        (padded_w, padded_w / aspect)
    } else {
        (padded_h * aspect, padded_h)
    };
    let min_crop = w.min(h) * 0.5;
    cw = cw.max(min_crop);
    ch = ch.max(min_crop / aspect);

    let (cx, cy) = (det.center.x, det.center.y);
    let mut x1 = (cx - cw / 2.0) as i64;
    let mut y1 = (cy - ch / 2.0) as i64;
    let mut x2 = (cx + cw / 2.0) as i64;
    let mut y2 = (cy + ch / 2.0) as i64;
    let (iw, ih) = (width as i64, height as i64);

    if x1 < 0 {
        x2 -= x1;
        x1 = 0;
    }
    if y1 < 0 {
        y2 -= y1;
        y1 = 0;
    }
    if x2 > iw {
        x1 -= x2 - iw;
        x2 = iw;
    }
    if y2 > ih {
        y1 -= y2 - ih;
        y2 = ih;
    }
    let x1 = x1.clamp(0, iw);
    let y1 = y1.clamp(0, ih);
    let x2 = x2.clamp(x1, iw);
    let y2 = y2.clamp(y1, ih);

    CropBox {
        x: x1 as u32,
        y: y1 as u32,
        width: (x2 - x1) as u32,
        height: (y2 - y1) as u32,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizeConfig,
}

impl Normalizer {
    pub fn new(config: NormalizeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizeConfig {
        &self.config
    }

    pub fn normalize_frame(&self, frame: &Frame, detection: Option<&Detection>) -> Frame {
        let (width, height) = frame.dimensions();
        let mut rect = crop_box(width, height, detection, &self.config);
        if rect.width == 0 || rect.height == 0 {
            rect = CropBox {
                x: 0,
                y: 0,
                width,
                height,
            };
        }

        let cropped = imageops::crop_imm(frame.image.as_ref(), rect.x, rect.y, rect.width, rect.height).to_image();
        let resized = imageops::resize(&cropped, self.config.width, self.config.height, FilterType::Lanczos3);
        frame.with_image(resized)
    }

    /// Normalize a sequence; `detections` shorter than `frames` count as missing.
    pub fn normalize_sequence(&self, frames: &[Frame], detections: &[Option<Detection>]) -> Vec<Frame> {
        frames
            .par_iter()
            .enumerate()
            .map(|(i, frame)| self.normalize_frame(frame, detections.get(i).and_then(Option::as_ref)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::solid_frame;
    use spin_models::{BoundingBox, Point};

    fn det(x1: f64, y1: f64, x2: f64, y2: f64) -> Detection {
        Detection::new(BoundingBox::new(x1, y1, x2, y2), 0.9, "car")
    }

    #[test]
    fn test_center_crop_wide_source() {
        // 1920x1080 to 4:3 keeps full height
        let rect = crop_box(1920, 1080, None, &NormalizeConfig::default());
        assert_eq!(
            rect,
            CropBox {
                x: 240,
                y: 0,
                width: 1440,
                height: 1080
            }
        );
    }

    #[test]
    fn test_center_crop_tall_source() {
        let rect = crop_box(600, 1000, None, &NormalizeConfig::default());
        assert_eq!(
            rect,
            CropBox {
                x: 0,
                y: 275,
                width: 600,
                height: 450
            }
        );
    }

    fn near(a: u32, b: u32) -> bool {
        a.abs_diff(b) <= 1
    }

    #[test]
    fn test_detection_crop_is_padded_and_centered() {
        // 800x400 box padded to 1040x520, then grown to 4:3 height-wise
        let d = det(500.0, 300.0, 1300.0, 700.0);
        let rect = crop_box(1920, 1080, Some(&d), &NormalizeConfig::default());
        assert!(near(rect.width, 1040) && near(rect.height, 780), "{rect:?}");
        assert!(near(rect.x, 380) && near(rect.y, 110), "{rect:?}");
    }

    #[test]
    fn test_small_detection_gets_minimum_crop() {
        let d = det(950.0, 530.0, 970.0, 550.0);
        let rect = crop_box(1920, 1080, Some(&d), &NormalizeConfig::default());
        assert!(near(rect.width, 540) && near(rect.height, 405), "{rect:?}");
    }

    #[test]
    fn test_crop_shifted_inside_image() {
        let d = det(0.0, 0.0, 200.0, 100.0).with_center(Point::new(10.0, 10.0));
        let rect = crop_box(1920, 1080, Some(&d), &NormalizeConfig::default());
        assert_eq!((rect.x, rect.y), (0, 0));
        assert!(rect.width >= 540);

        let d = det(1800.0, 1000.0, 1920.0, 1080.0);
        let rect = crop_box(1920, 1080, Some(&d), &NormalizeConfig::default());
        assert_eq!(rect.x + rect.width, 1920);
        assert_eq!(rect.y + rect.height, 1080);
    }

    #[test]
    fn test_output_size_is_uniform() {
        let normalizer = Normalizer::new(NormalizeConfig {
            width: 80,
            height: 60,
            padding: 0.15,
        });
        let frames = vec![solid_frame(0, 160, 90, 10), solid_frame(1, 160, 90, 20)];
        let detections = vec![Some(det(40.0, 20.0, 120.0, 70.0)), None];
        let out = normalizer.normalize_sequence(&frames, &detections);
        assert!(out.iter().all(|f| f.dimensions() == (80, 60)));
        assert_eq!(out[1].index, 1);
    }
}
