//! Vehicle detection and background removal seams.
//!
//! Both capabilities are external models. Per-frame failures are absorbed
//! here: a failed detection becomes `None`, a failed background removal
//! keeps the opaque frame.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use image::RgbaImage;
use spin_models::Detection;
use tracing::{debug, warn};

use crate::error::MediaResult;
use crate::frame::Frame;

/// COCO ids and names of the classes treated as vehicles.
pub const VEHICLE_CLASSES: [(usize, &str); 4] = [(2, "car"), (3, "motorcycle"), (5, "bus"), (7, "truck")];

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

pub fn is_vehicle_class(name: &str) -> bool {
    VEHICLE_CLASSES.iter().any(|(_, n)| *n == name)
}

pub fn vehicle_class_name(class_id: usize) -> Option<&'static str> {
    VEHICLE_CLASSES
        .iter()
        .find(|(id, _)| *id == class_id)
        .map(|(_, name)| *name)
}

/// Keep confident vehicle boxes, largest area first.
pub fn filter_vehicles(detections: Vec<Detection>, min_confidence: f64) -> Vec<Detection> {
    let mut kept: Vec<Detection> = detections
        .into_iter()
        .filter(|d| d.confidence >= min_confidence && is_vehicle_class(&d.class_name))
        .collect();
    kept.sort_by(|a, b| b.area().total_cmp(&a.area()));
    kept
}

/// Detects vehicles in a frame.
///
/// Implementations return boxes in frame pixel coordinates, vehicle classes
/// only, largest area first.
#[async_trait]
pub trait VehicleDetector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn detect(&self, frame: &Frame) -> MediaResult<Vec<Detection>>;

    /// The largest vehicle, if any.
    async fn main_detection(&self, frame: &Frame) -> MediaResult<Option<Detection>> {
        Ok(self.detect(frame).await?.into_iter().next())
    }
}

/// Produces a same-sized copy of a frame with the background made transparent.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    fn name(&self) -> &'static str;

    async fn remove(&self, frame: &Frame) -> MediaResult<RgbaImage>;
}

/// Main detection for each frame, in order. Failures become `None`.
///
/// Per-frame futures own their detector handle and frame so the returned
/// future stays `Send` when spawned.
pub async fn detect_sequence(
    detector: Arc<dyn VehicleDetector>,
    frames: &[Frame],
    concurrency: usize,
) -> Vec<Option<Detection>> {
    let tasks: Vec<BoxFuture<'static, Option<Detection>>> = frames
        .iter()
        .cloned()
        .map(|frame| {
            let detector = Arc::clone(&detector);
            async move {
                match detector.main_detection(&frame).await {
                    Ok(det) => det,
                    Err(e) => {
                        warn!(frame = frame.index, detector = detector.name(), error = %e, "Detection failed, treating as no vehicle");
                        None
                    }
                }
            }
            .boxed()
        })
        .collect();

    let results: Vec<Option<Detection>> = stream::iter(tasks).buffered(concurrency.max(1)).collect().await;

    let found = results.iter().filter(|d| d.is_some()).count();
    debug!(frames = frames.len(), found, "Detection pass complete");
    results
}

/// Cut out the background of every frame. Returns the frames and the number
/// that kept their original pixels because removal failed.
pub async fn remove_backgrounds(
    remover: Arc<dyn BackgroundRemover>,
    frames: &[Frame],
    concurrency: usize,
) -> (Vec<Frame>, usize) {
    let tasks: Vec<BoxFuture<'static, (Frame, bool)>> = frames
        .iter()
        .cloned()
        .map(|frame| {
            let remover = Arc::clone(&remover);
            async move {
                match remover.remove(&frame).await {
                    Ok(image) if image.dimensions() == frame.dimensions() => (frame.with_image(image), true),
                    Ok(image) => {
                        warn!(
                            frame = frame.index,
                            expected = ?frame.dimensions(),
                            got = ?image.dimensions(),
                            "Background remover changed frame size, keeping original"
                        );
                        (frame, false)
                    }
                    Err(e) => {
                        warn!(frame = frame.index, remover = remover.name(), error = %e, "Background removal failed, keeping original");
                        (frame, false)
                    }
                }
            }
            .boxed()
        })
        .collect();

    let results: Vec<(Frame, bool)> = stream::iter(tasks).buffered(concurrency.max(1)).collect().await;

    let failed = results.iter().filter(|(_, ok)| !ok).count();
    (results.into_iter().map(|(f, _)| f).collect(), failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;
    use crate::testing::solid_frame;
    use image::Rgba;
    use spin_models::BoundingBox;

    fn det(class: &str, conf: f64, size: f64) -> Detection {
        Detection::new(BoundingBox::new(0.0, 0.0, size, size), conf, class)
    }

    /// Detects a car on even frames and fails on frames divisible by 3.
    struct EvenFrames;

    #[async_trait]
    impl VehicleDetector for EvenFrames {
        fn name(&self) -> &'static str {
            "even"
        }

        async fn detect(&self, frame: &Frame) -> MediaResult<Vec<Detection>> {
            if frame.index % 3 == 0 && frame.index > 0 {
                return Err(MediaError::detection_failed("boom"));
            }
            if frame.index % 2 == 0 {
                Ok(filter_vehicles(vec![det("car", 0.9, 10.0), det("truck", 0.8, 30.0)], 0.5))
            } else {
                Ok(Vec::new())
            }
        }
    }

    struct Cutout {
        shrink: bool,
    }

    #[async_trait]
    impl BackgroundRemover for Cutout {
        fn name(&self) -> &'static str {
            "cutout"
        }

        async fn remove(&self, frame: &Frame) -> MediaResult<RgbaImage> {
            if frame.index == 1 {
                return Err(MediaError::internal("service down"));
            }
            let (w, h) = frame.dimensions();
            let w = if self.shrink { w - 1 } else { w };
            Ok(RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 0])))
        }
    }

    #[test]
    fn test_filter_vehicles() {
        let kept = filter_vehicles(
            vec![
                det("car", 0.9, 10.0),
                det("person", 0.99, 50.0),
                det("bus", 0.4, 60.0),
                det("truck", 0.6, 20.0),
            ],
            0.5,
        );
        let names: Vec<_> = kept.iter().map(|d| d.class_name.as_str()).collect();
        assert_eq!(names, vec!["truck", "car"]);
        assert_eq!(vehicle_class_name(7), Some("truck"));
        assert_eq!(vehicle_class_name(0), None);
    }

    #[tokio::test]
    async fn test_detect_sequence_absorbs_failures() {
        let frames: Vec<_> = (0..7).map(|i| solid_frame(i, 4, 4, 0)).collect();
        let dets = detect_sequence(Arc::new(EvenFrames), &frames, 3).await;

        assert_eq!(dets.len(), 7);
        assert_eq!(dets[0].as_ref().unwrap().class_name, "truck");
        assert!(dets[1].is_none());
        assert!(dets[3].is_none());
        assert!(dets[4].is_some());
        // Index 6 is even but fails
        assert!(dets[6].is_none());
    }

    #[tokio::test]
    async fn test_background_removal_keeps_failed_frames() {
        let frames: Vec<_> = (0..3).map(|i| solid_frame(i, 4, 4, 9)).collect();
        let (out, failed) = remove_backgrounds(Arc::new(Cutout { shrink: false }), &frames, 2).await;
        assert_eq!(failed, 1);
        assert!(out[0].has_transparency());
        assert!(!out[1].has_transparency());

        let (out, failed) = remove_backgrounds(Arc::new(Cutout { shrink: true }), &frames, 2).await;
        assert_eq!(failed, 3);
        assert!(out.iter().all(|f| f.dimensions() == (4, 4)));
    }
}
