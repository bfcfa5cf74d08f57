//! Sprite sheet assembly.

use image::{GenericImage, Rgba, RgbaImage};
use spin_models::SpriteLayout;
use tracing::debug;

use crate::error::MediaResult;
use crate::frame::{ensure_uniform_size, Frame};

/// Fill for opaque sheets.
pub const OPAQUE_FILL: Rgba<u8> = Rgba([255, 255, 255, 255]);
/// Fill for sheets that keep alpha.
pub const TRANSPARENT_FILL: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Tiles frames row-major into one image.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpriteAssembler {
    transparent: bool,
}

impl SpriteAssembler {
    pub fn new(transparent: bool) -> Self {
        Self { transparent }
    }

    pub fn fill(&self) -> Rgba<u8> {
        if self.transparent {
            TRANSPARENT_FILL
        } else {
            OPAQUE_FILL
        }
    }

    /// Build the sheet. `columns` defaults to `ceil(sqrt(n))`.
    ///
    /// Frames must already share one size; nothing is resized here.
    pub fn build(&self, frames: &[Frame], columns: Option<u32>) -> MediaResult<(RgbaImage, SpriteLayout)> {
        let (frame_width, frame_height) = ensure_uniform_size(frames)?;
        let count = frames.len() as u32;
        let layout = match columns {
            Some(columns) => SpriteLayout::with_columns(count, columns, frame_width, frame_height),
            None => SpriteLayout::for_frame_count(count, frame_width, frame_height),
        };

        let mut sheet = RgbaImage::from_pixel(layout.sprite_width, layout.sprite_height, self.fill());
        for (i, frame) in frames.iter().enumerate() {
            let (x, y) = layout.cell_origin(i as u32);
            sheet.copy_from(frame.image.as_ref(), x, y)?;
        }

        debug!(
            frames = count,
            columns = layout.columns,
            rows = layout.rows,
            width = layout.sprite_width,
            height = layout.sprite_height,
            "Sprite sheet assembled"
        );
        Ok((sheet, layout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;
    use crate::testing::solid_frame;

    #[test]
    fn test_row_major_placement() {
        let frames: Vec<_> = (0..5).map(|i| solid_frame(i, 4, 3, (i * 40) as u8)).collect();
        let (sheet, layout) = SpriteAssembler::default().build(&frames, None).unwrap();

        assert_eq!((layout.columns, layout.rows), (3, 2));
        assert_eq!(sheet.dimensions(), (12, 6));
        // Frame 4 sits at column 1 of row 1
        assert_eq!(sheet.get_pixel(4, 3)[0], 160);
        assert_eq!(sheet.get_pixel(8, 0)[0], 80);
    }

    #[test]
    fn test_trailing_cells_use_fill() {
        let frames: Vec<_> = (0..5).map(|i| solid_frame(i, 4, 3, 7)).collect();
        let (opaque, _) = SpriteAssembler::new(false).build(&frames, None).unwrap();
        assert_eq!(*opaque.get_pixel(11, 5), OPAQUE_FILL);

        let (clear, _) = SpriteAssembler::new(true).build(&frames, None).unwrap();
        assert_eq!(*clear.get_pixel(11, 5), TRANSPARENT_FILL);
    }

    #[test]
    fn test_explicit_columns() {
        let frames: Vec<_> = (0..6).map(|i| solid_frame(i, 2, 2, 1)).collect();
        let (sheet, layout) = SpriteAssembler::default().build(&frames, Some(6)).unwrap();
        assert_eq!((layout.columns, layout.rows), (6, 1));
        assert_eq!(sheet.dimensions(), (12, 2));
    }

    #[test]
    fn test_rejects_mixed_sizes_and_empty() {
        let frames = vec![solid_frame(0, 4, 3, 1), solid_frame(1, 4, 4, 1)];
        assert!(matches!(
            SpriteAssembler::default().build(&frames, None),
            Err(MediaError::FrameSizeMismatch { index: 1, .. })
        ));
        assert!(matches!(
            SpriteAssembler::default().build(&[], None),
            Err(MediaError::EmptySequence)
        ));
    }

    #[test]
    fn test_duplicate_frames_are_tiled() {
        let frame = solid_frame(3, 2, 2, 50);
        let frames = vec![frame.clone(), frame.clone(), frame];
        let (_, layout) = SpriteAssembler::default().build(&frames, None).unwrap();
        assert_eq!(layout.frame_count, 3);
    }
}
