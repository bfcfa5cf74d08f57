//! Image encoding for published frames and sprite sheets.
//!
//! Opaque output is JPEG with alpha flattened onto white; transparent output
//! is PNG with alpha kept.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbImage, RgbaImage};
use spin_models::OutputFormat;
use std::io::Cursor;
use std::path::Path;

use crate::error::MediaResult;

/// Default JPEG quality for individual frames.
pub const FRAME_JPEG_QUALITY: u8 = 90;
/// Default JPEG quality for the sprite sheet.
pub const SPRITE_JPEG_QUALITY: u8 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub format: OutputFormat,
    /// JPEG quality 1-100; ignored for PNG
    pub quality: u8,
}

impl EncodeOptions {
    pub fn jpeg(quality: u8) -> Self {
        Self {
            format: OutputFormat::Jpeg,
            quality: quality.clamp(1, 100),
        }
    }

    pub fn png() -> Self {
        Self {
            format: OutputFormat::Png,
            quality: 100,
        }
    }

    /// PNG when alpha must survive, JPEG otherwise.
    pub fn for_output(transparent: bool, quality: u8) -> Self {
        if transparent {
            Self::png()
        } else {
            Self::jpeg(quality)
        }
    }
}

/// Composite onto a white background, dropping alpha.
pub fn flatten_on_white(image: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y);
        let a = p[3] as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
        image::Rgb([blend(p[0]), blend(p[1]), blend(p[2])])
    })
}

pub fn encode_image(image: &RgbaImage, options: EncodeOptions) -> MediaResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    match options.format {
        OutputFormat::Jpeg => {
            let rgb = flatten_on_white(image);
            let encoder = JpegEncoder::new_with_quality(&mut buf, options.quality);
            encoder.write_image(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)?;
        }
        OutputFormat::Png => {
            let encoder = PngEncoder::new(&mut buf);
            encoder.write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)?;
        }
    }
    Ok(buf.into_inner())
}

/// Encode and write to `path`, creating parent directories.
pub fn save_image(image: &RgbaImage, path: &Path, options: EncodeOptions) -> MediaResult<()> {
    let bytes = encode_image(image, options)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_flatten_on_white() {
        let mut img = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 0]));
        img.put_pixel(1, 0, Rgba([10, 20, 30, 255]));
        let flat = flatten_on_white(&img);
        assert_eq!(flat.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(flat.get_pixel(1, 0).0, [10, 20, 30]);
    }

    #[test]
    fn test_jpeg_and_png_signatures() {
        let img = RgbaImage::from_pixel(16, 8, Rgba([200, 100, 50, 128]));
        let jpeg = encode_image(&img, EncodeOptions::jpeg(85)).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let png = encode_image(&img, EncodeOptions::png()).unwrap();
        assert_eq!(&png[1..4], b"PNG");
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(3, 3)[3], 128);
    }

    #[test]
    fn test_format_choice() {
        assert_eq!(EncodeOptions::for_output(true, 85).format, OutputFormat::Png);
        assert_eq!(EncodeOptions::for_output(false, 85), EncodeOptions::jpeg(85));
        assert_eq!(EncodeOptions::jpeg(0).quality, 1);
    }

    #[test]
    fn test_save_creates_parent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("frames").join("frame_000.jpg");
        save_image(&RgbaImage::new(4, 4), &path, EncodeOptions::jpeg(90)).unwrap();
        assert!(path.exists());
    }
}
