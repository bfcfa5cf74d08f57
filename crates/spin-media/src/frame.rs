//! In-memory frames.
//!
//! A [`Frame`] is immutable: stages produce new frames instead of editing
//! pixels in place. The image sits behind an `Arc` so pass-through and
//! duplicate picks are free.

use image::{GrayImage, RgbaImage};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{MediaError, MediaResult};

#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in the sequence the frame was first produced in
    pub index: usize,
    pub image: Arc<RgbaImage>,
}

impl Frame {
    pub fn new(index: usize, image: RgbaImage) -> Self {
        Self {
            index,
            image: Arc::new(image),
        }
    }

    /// Same index, new pixels.
    pub fn with_image(&self, image: RgbaImage) -> Self {
        Self::new(self.index, image)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn to_gray(&self) -> GrayImage {
        image::imageops::grayscale(self.image.as_ref())
    }

    /// Whether any pixel is not fully opaque.
    pub fn has_transparency(&self) -> bool {
        self.image.pixels().any(|p| p[3] < 255)
    }
}

/// Decode frame files in parallel, keeping their order.
pub fn load_frames(paths: &[PathBuf]) -> MediaResult<Vec<Frame>> {
    paths
        .par_iter()
        .enumerate()
        .map(|(index, path)| load_frame(index, path))
        .collect()
}

pub fn load_frame(index: usize, path: &Path) -> MediaResult<Frame> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    let image = image::open(path)?.to_rgba8();
    Ok(Frame::new(index, image))
}

/// Check that every frame shares the first frame's dimensions.
pub fn ensure_uniform_size(frames: &[Frame]) -> MediaResult<(u32, u32)> {
    let first = frames.first().ok_or(MediaError::EmptySequence)?;
    let (width, height) = first.dimensions();
    for (i, frame) in frames.iter().enumerate() {
        let (fw, fh) = frame.dimensions();
        if (fw, fh) != (width, height) {
            return Err(MediaError::FrameSizeMismatch {
                index: i,
                width,
                height,
                found_width: fw,
                found_height: fh,
            });
        }
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_uniform_size_check() {
        let a = Frame::new(0, RgbaImage::new(4, 3));
        let b = Frame::new(1, RgbaImage::new(4, 3));
        let c = Frame::new(2, RgbaImage::new(5, 3));

        assert_eq!(ensure_uniform_size(&[a.clone(), b.clone()]).unwrap(), (4, 3));
        assert!(matches!(
            ensure_uniform_size(&[a, b, c]),
            Err(MediaError::FrameSizeMismatch { index: 2, .. })
        ));
        assert!(matches!(ensure_uniform_size(&[]), Err(MediaError::EmptySequence)));
    }

    #[test]
    fn test_load_frames_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut paths = Vec::new();
        for i in 0..3u8 {
            let path = dir.path().join(format!("frame_{i}.png"));
            RgbaImage::from_pixel(2, 2, Rgba([i * 50, 0, 0, 255]))
                .save(&path)
                .unwrap();
            paths.push(path);
        }

        let frames = load_frames(&paths).unwrap();
        assert_eq!(frames.len(), 3);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.index, i);
            assert_eq!(frame.image.get_pixel(0, 0)[0], i as u8 * 50);
        }
    }

    #[test]
    fn test_missing_file() {
        let err = load_frame(0, Path::new("/nonexistent/frame.jpg")).unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn test_transparency() {
        let mut img = RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255]));
        assert!(!Frame::new(0, img.clone()).has_transparency());
        img.put_pixel(1, 1, Rgba([0, 0, 0, 0]));
        assert!(Frame::new(0, img).has_transparency());
    }
}
