//! Vehicle detection types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in corner form.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Clamp to image bounds.
    pub fn clamp(&self, width: f64, height: f64) -> Self {
        Self {
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
            x2: self.x2.clamp(0.0, width),
            y2: self.y2.clamp(0.0, height),
        }
    }
}

/// One detected object in a frame.
///
/// `center` starts as the box center. Temporal smoothing moves `center`
/// only; the box keeps its original extent so crop logic can rebuild a
/// window of the same size around the smoothed point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub class_name: String,
    pub center: Point,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f64, class_name: impl Into<String>) -> Self {
        Self {
            center: bbox.center(),
            bbox,
            confidence,
            class_name: class_name.into(),
        }
    }

    pub fn area(&self) -> f64 {
        self.bbox.area()
    }

    /// Copy with the reported center replaced.
    pub fn with_center(&self, center: Point) -> Self {
        Self {
            center,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_geometry() {
        let bbox = BoundingBox::new(10.0, 20.0, 110.0, 70.0);
        assert_eq!(bbox.width(), 100.0);
        assert_eq!(bbox.height(), 50.0);
        assert_eq!(bbox.area(), 5000.0);
        assert_eq!(bbox.center(), Point::new(60.0, 45.0));
    }

    #[test]
    fn test_with_center_keeps_box() {
        let det = Detection::new(BoundingBox::new(0.0, 0.0, 40.0, 20.0), 0.9, "car");
        let moved = det.with_center(Point::new(5.0, 5.0));
        assert_eq!(moved.bbox, det.bbox);
        assert_eq!(moved.center, Point::new(5.0, 5.0));
    }
}
