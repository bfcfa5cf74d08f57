//! In-process YOLOv8 vehicle detection through ONNX Runtime.
//!
//! Execution provider selection:
//! - CUDA on Linux with NVIDIA GPU (when `cuda` feature enabled)
//! - CoreML on macOS
//! - CPU fallback on all platforms

use async_trait::async_trait;
use image::imageops::FilterType;
use image::RgbaImage;
use ndarray::Array;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use spin_models::{BoundingBox, Detection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::detection::{filter_vehicles, vehicle_class_name, VehicleDetector};
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;

const NUM_CLASSES: usize = 80;
const NUM_BOXES: usize = 8400;

#[derive(Debug, Clone)]
pub struct OnnxDetectorConfig {
    pub model_path: String,
    pub confidence_threshold: f32,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
    /// Square model input side
    pub input_size: u32,
}

impl Default for OnnxDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8n.onnx".to_string(),
            confidence_threshold: 0.5,
            nms_threshold: 0.45,
            input_size: 640,
        }
    }
}

struct Inner {
    session: Mutex<Session>,
    config: OnnxDetectorConfig,
}

/// YOLOv8 detector restricted to vehicle classes.
#[derive(Clone)]
pub struct OnnxVehicleDetector {
    inner: Arc<Inner>,
}

impl OnnxVehicleDetector {
    pub fn new(config: OnnxDetectorConfig) -> MediaResult<Self> {
        let model_path = Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(MediaError::model_not_found(&config.model_path));
        }

        let session = Mutex::new(create_session(model_path)?);
        info!(
            model_path = %config.model_path,
            input_size = config.input_size,
            "Vehicle detector initialized"
        );
        Ok(Self {
            inner: Arc::new(Inner { session, config }),
        })
    }

    pub fn config(&self) -> &OnnxDetectorConfig {
        &self.inner.config
    }

    /// Blocking detection on one image.
    pub fn detect_image(&self, image: &RgbaImage) -> MediaResult<Vec<Detection>> {
        self.inner.detect_image(image)
    }
}

impl Inner {
    fn detect_image(&self, image: &RgbaImage) -> MediaResult<Vec<Detection>> {
        let (width, height) = image.dimensions();
        let input = self.preprocess(image)?;
        let outputs = self.run_inference(input)?;
        let detections = self.postprocess(&outputs, width, height)?;
        debug!(count = detections.len(), "Vehicle detection completed");
        Ok(filter_vehicles(detections, self.config.confidence_threshold as f64))
    }

    /// Resize to the model input, scale to [0, 1], lay out as NCHW.
    fn preprocess(&self, image: &RgbaImage) -> MediaResult<Value> {
        let size = self.config.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
        let (w, h) = (size as usize, size as usize);

        let mut chw: Vec<f32> = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    chw.push(resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0);
                }
            }
        }

        Tensor::from_array((vec![1usize, 3, h, w], chw.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::internal(format!("Failed to create tensor: {}", e)))
    }

    fn run_inference(&self, input: Value) -> MediaResult<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| MediaError::detection_failed(format!("ONNX inference failed: {}", e)))?;

        // [1, 84, 8400]
        let output = outputs
            .get("output0")
            .ok_or_else(|| MediaError::internal("Missing output0 tensor"))?;
        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::internal(format!("Failed to extract tensor: {}", e)))?;

        Ok(tensor.1.iter().copied().collect())
    }

    /// Decode `[84, 8400]` rows of `cx, cy, w, h, scores…` into pixel boxes.
    fn postprocess(&self, outputs: &[f32], width: u32, height: u32) -> MediaResult<Vec<Detection>> {
        let features = 4 + NUM_CLASSES;
        let array = Array::from_shape_vec((features, NUM_BOXES), outputs.to_vec())
            .map_err(|e| MediaError::internal(format!("Unexpected detector output: {}", e)))?;
        let rows = array.t();

        let input = self.config.input_size as f32;
        let sx = width as f32 / input;
        let sy = height as f32 / input;

        let mut candidates = Vec::new();
        for i in 0..NUM_BOXES {
            let (best_class, best_score) = (0..NUM_CLASSES)
                .map(|c| (c, rows[[i, 4 + c]]))
                .fold((0, 0.0f32), |best, cur| if cur.1 > best.1 { cur } else { best });

            if best_score < self.config.confidence_threshold {
                continue;
            }
            let Some(class_name) = vehicle_class_name(best_class) else {
                continue;
            };

            let (cx, cy, w, h) = (rows[[i, 0]], rows[[i, 1]], rows[[i, 2]], rows[[i, 3]]);
            let bbox = BoundingBox::new(
                ((cx - w / 2.0) * sx) as f64,
                ((cy - h / 2.0) * sy) as f64,
                ((cx + w / 2.0) * sx) as f64,
                ((cy + h / 2.0) * sy) as f64,
            )
            .clamp(width as f64, height as f64);
            candidates.push(Detection::new(bbox, best_score as f64, class_name));
        }

        Ok(non_maximum_suppression(candidates, self.config.nms_threshold as f64))
    }
}

#[async_trait]
impl VehicleDetector for OnnxVehicleDetector {
    fn name(&self) -> &'static str {
        "onnx-yolov8"
    }

    async fn detect(&self, frame: &Frame) -> MediaResult<Vec<Detection>> {
        let inner = Arc::clone(&self.inner);
        let image = Arc::clone(&frame.image);
        tokio::task::spawn_blocking(move || inner.detect_image(&image))
            .await
            .map_err(|e| MediaError::internal(format!("Detection task failed: {}", e)))?
    }
}

/// Same-class NMS, highest confidence first.
fn non_maximum_suppression(mut detections: Vec<Detection>, iou_threshold: f64) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut suppressed = vec![false; detections.len()];
    let mut keep = Vec::new();
    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());
        for j in (i + 1)..detections.len() {
            if !suppressed[j]
                && detections[i].class_name == detections[j].class_name
                && iou(&detections[i].bbox, &detections[j].bbox) > iou_threshold
            {
                suppressed[j] = true;
            }
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let inter = BoundingBox::new(a.x1.max(b.x1), a.y1.max(b.y1), a.x2.min(b.x2), a.y2.min(b.y2)).area();
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

fn create_session(model_path: &Path) -> MediaResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| MediaError::internal(format!("Failed to read model file: {}", e)))?;

    let builder = Session::builder()
        .map_err(|e| MediaError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::internal(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for vehicle detection");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, trying alternatives");
    }

    #[cfg(target_os = "macos")]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        if let Ok(coreml_builder) = builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
        {
            if let Ok(session) = coreml_builder.commit_from_memory(&model_bytes) {
                info!("Using CoreML execution provider for vehicle detection");
                return Ok(session);
            }
        }
        debug!("CoreML execution provider not available, using CPU");
    }

    info!("Using CPU execution provider for vehicle detection");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::internal(format!("Failed to load ONNX model: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f64, conf: f64, class: &str) -> Detection {
        Detection::new(BoundingBox::new(x1, 0.0, x1 + 100.0, 50.0), conf, class)
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap() {
        let kept = non_maximum_suppression(
            vec![det(0.0, 0.7, "car"), det(5.0, 0.9, "car"), det(5.0, 0.8, "truck"), det(400.0, 0.6, "car")],
            0.45,
        );
        let summary: Vec<_> = kept.iter().map(|d| (d.class_name.as_str(), d.confidence)).collect();
        assert_eq!(summary, vec![("car", 0.9), ("truck", 0.8), ("car", 0.6)]);
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(iou(&a, &a), 1.0);
        assert_eq!(iou(&a, &BoundingBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn test_missing_model() {
        let config = OnnxDetectorConfig {
            model_path: "/nonexistent/yolov8n.onnx".into(),
            ..Default::default()
        };
        assert!(matches!(OnnxVehicleDetector::new(config), Err(MediaError::ModelNotFound(_))));
    }
}
