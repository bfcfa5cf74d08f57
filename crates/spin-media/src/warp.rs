//! Perspective and translation warps for RGBA frames.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::primitives::Homography;

/// Fill for pixels that map outside the source.
pub const BORDER: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Warp `src` by `h` (source → destination coordinates) onto a
/// `width × height` canvas with bilinear sampling.
///
/// A non-invertible transform returns the source unchanged.
pub fn warp_perspective(src: &RgbaImage, h: &Homography, width: u32, height: u32) -> RgbaImage {
    let Some(inv) = h.inverse() else {
        return src.clone();
    };

    let row_len = width as usize * 4;
    let mut buf = vec![0u8; row_len * height as usize];
    buf.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
        for x in 0..width as usize {
            let px = inv
                .project(x as f64, y as f64)
                .and_then(|(sx, sy)| sample_bilinear(src, sx, sy))
                .unwrap_or(BORDER);
            row[x * 4..x * 4 + 4].copy_from_slice(&px.0);
        }
    });

    // Buffer length always matches width * height * 4
    RgbaImage::from_raw(width, height, buf).unwrap_or_else(|| src.clone())
}

/// Shift an image by `(dx, dy)` pixels, keeping its size.
pub fn translate(src: &RgbaImage, dx: f64, dy: f64) -> RgbaImage {
    warp_perspective(src, &Homography::translation(dx, dy), src.width(), src.height())
}

fn sample_bilinear(img: &RgbaImage, x: f64, y: f64) -> Option<Rgba<u8>> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || x < 0.0 || y < 0.0 || x > (w - 1) as f64 || y > (h - 1) as f64 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgba(out))
}
