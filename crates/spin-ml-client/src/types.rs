//! Wire types of the inference service.

use serde::{Deserialize, Serialize};
use spin_media::detection::vehicle_class_name;
use spin_models::{BoundingBox, Detection};

/// One box as returned by `POST /detect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetection {
    /// `[x1, y1, x2, y2]` in pixels of the submitted image
    pub bbox: [f64; 4],
    pub confidence: f64,
    pub class_id: usize,
    #[serde(default)]
    pub class_name: Option<String>,
}

impl RawDetection {
    /// Class name reported by the service, else the COCO vehicle name for the id.
    pub fn resolved_class(&self) -> Option<String> {
        self.class_name
            .clone()
            .or_else(|| vehicle_class_name(self.class_id).map(str::to_string))
    }

    pub fn into_detection(self) -> Option<Detection> {
        let class = self.resolved_class()?;
        let [x1, y1, x2, y2] = self.bbox;
        Some(Detection::new(BoundingBox::new(x1, y1, x2, y2), self.confidence, class))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    #[serde(default)]
    pub detections: Vec<RawDetection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_name_falls_back_to_coco_id() {
        let raw: RawDetection = serde_json::from_str(r#"{"bbox":[1,2,11,22],"confidence":0.8,"class_id":7}"#).unwrap();
        let det = raw.into_detection().unwrap();
        assert_eq!(det.class_name, "truck");
        assert_eq!(det.bbox.width(), 10.0);

        let unknown: RawDetection = serde_json::from_str(r#"{"bbox":[0,0,1,1],"confidence":0.9,"class_id":0}"#).unwrap();
        assert!(unknown.into_detection().is_none());
    }
}
