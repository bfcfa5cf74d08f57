//! Sprite sheet layout.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Grid geometry of a sprite sheet.
///
/// The layout is a pure function of frame count and frame size so a client
/// can rebuild it from the count alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SpriteLayout {
    pub frame_count: u32,
    pub columns: u32,
    pub rows: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub sprite_width: u32,
    pub sprite_height: u32,
}

impl SpriteLayout {
    /// Default column count: `ceil(sqrt(frames))`.
    pub fn default_columns(frames: u32) -> u32 {
        (frames as f64).sqrt().ceil().max(1.0) as u32
    }

    pub fn for_frame_count(frames: u32, frame_width: u32, frame_height: u32) -> Self {
        Self::with_columns(frames, Self::default_columns(frames), frame_width, frame_height)
    }

    pub fn with_columns(frames: u32, columns: u32, frame_width: u32, frame_height: u32) -> Self {
        let columns = columns.max(1);
        let rows = frames.div_ceil(columns);
        Self {
            frame_count: frames,
            columns,
            rows,
            frame_width,
            frame_height,
            sprite_width: columns * frame_width,
            sprite_height: rows * frame_height,
        }
    }

    /// Top-left pixel of cell `index`, row-major.
    pub fn cell_origin(&self, index: u32) -> (u32, u32) {
        let col = index % self.columns;
        let row = index / self.columns;
        (col * self.frame_width, row * self.frame_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_count() {
        let layout = SpriteLayout::for_frame_count(36, 800, 600);
        assert_eq!((layout.columns, layout.rows), (6, 6));
        assert_eq!((layout.sprite_width, layout.sprite_height), (4800, 3600));
    }

    #[test]
    fn test_partial_last_row() {
        let layout = SpriteLayout::for_frame_count(37, 10, 10);
        assert_eq!((layout.columns, layout.rows), (7, 6));
        assert_eq!(layout.cell_origin(36), (10, 50));
    }

    #[test]
    fn test_supported_counts() {
        assert_eq!(SpriteLayout::default_columns(24), 5);
        assert_eq!(SpriteLayout::for_frame_count(24, 1, 1).rows, 5);
        assert_eq!(SpriteLayout::default_columns(72), 9);
        assert_eq!(SpriteLayout::for_frame_count(72, 1, 1).rows, 8);
    }

    #[test]
    fn test_explicit_columns() {
        let layout = SpriteLayout::with_columns(10, 4, 2, 3);
        assert_eq!(layout.rows, 3);
        assert_eq!(layout.cell_origin(5), (2, 3));
    }

    #[test]
    fn test_serialized_field_names() {
        let value = serde_json::to_value(SpriteLayout::for_frame_count(24, 8, 6)).unwrap();
        assert_eq!(value["frame_count"], 24);
        assert!(value.get("frames").is_none());
    }
}
