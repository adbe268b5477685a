//! Image decoding and grayscale conversion.
//!
//! Scanned sheets arrive as encoded bytes (PNG, JPEG, BMP, WebP) and are
//! decoded to RGB. Grayscale uses the BT.601 luma weights
//! `0.299*R + 0.587*G + 0.114*B` that the intensity thresholds in this
//! crate are tuned against.

use image::{GrayImage, Luma, RgbImage};

use crate::types::PipelineError;

/// Decode raw image bytes to an RGB image.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyImage`] if `bytes` is empty or decodes
/// to a zero-sized image.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
#[must_use = "returns the decoded image"]
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyImage);
    }

    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(PipelineError::EmptyImage);
    }
    Ok(rgb)
}

/// BT.601 luma of one RGB pixel, rounded to the nearest integer.
#[must_use]
pub fn luma(pixel: image::Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    let y = 0.114f32.mul_add(
        f32::from(b),
        0.299f32.mul_add(f32::from(r), 0.587 * f32::from(g)),
    );
    // y is a convex combination of u8 values, so it fits in u8.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let y = y.round() as u8;
    y
}

/// Convert an RGB image to grayscale.
#[must_use]
pub fn to_gray(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([luma(*image.get_pixel(x, y))])
    })
}

/// Mean intensity of the pixels of row `y` in columns `x0..x1`.
///
/// Returns `0.0` for an empty range.
#[must_use]
pub fn row_mean(gray: &GrayImage, y: u32, x0: u32, x1: u32) -> f64 {
    let x1 = x1.min(gray.width());
    if x0 >= x1 || y >= gray.height() {
        return 0.0;
    }
    let sum: u64 = (x0..x1).map(|x| u64::from(gray.get_pixel(x, y).0[0])).sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = sum as f64 / f64::from(x1 - x0);
    mean
}

/// Mean intensity of the pixels of column `x` in rows `y0..y1`.
///
/// Returns `0.0` for an empty range.
#[must_use]
pub fn column_mean(gray: &GrayImage, x: u32, y0: u32, y1: u32) -> f64 {
    let y1 = y1.min(gray.height());
    if y0 >= y1 || x >= gray.width() {
        return 0.0;
    }
    let sum: u64 = (y0..y1).map(|y| u64::from(gray.get_pixel(x, y).0[0])).sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = sum as f64 / f64::from(y1 - y0);
    mean
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_returns_error() {
        let result = decode_rgb(&[]);
        assert!(matches!(result, Err(PipelineError::EmptyImage)));
    }

    #[test]
    fn corrupt_bytes_returns_image_decode_error() {
        let result = decode_rgb(&[0xFF, 0xFE, 0x00, 0x01]);
        assert!(matches!(result, Err(PipelineError::ImageDecode(_))));
    }

    #[test]
    fn valid_png_decodes_to_rgb() {
        let img = image::RgbImage::from_fn(3, 2, |x, _| image::Rgb([x as u8 * 100, 0, 0]));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();

        let rgb = decode_rgb(buf.get_ref()).unwrap();
        assert_eq!(rgb.dimensions(), (3, 2));
        assert_eq!(rgb.get_pixel(2, 1).0, [200, 0, 0]);
    }

    #[test]
    fn luma_weights() {
        assert_eq!(luma(image::Rgb([255, 255, 255])), 255);
        assert_eq!(luma(image::Rgb([0, 0, 0])), 0);
        assert_eq!(luma(image::Rgb([255, 0, 0])), 76);
        assert_eq!(luma(image::Rgb([0, 255, 0])), 150);
        assert_eq!(luma(image::Rgb([0, 0, 255])), 29);
    }

    #[test]
    fn row_and_column_means() {
        let gray = GrayImage::from_fn(4, 4, |x, y| Luma([if x < 2 && y < 2 { 100 } else { 0 }]));
        assert!((row_mean(&gray, 0, 0, 4) - 50.0).abs() < 1e-9);
        assert!((row_mean(&gray, 3, 0, 4)).abs() < 1e-9);
        assert!((column_mean(&gray, 1, 0, 2) - 100.0).abs() < 1e-9);
        assert!((column_mean(&gray, 1, 2, 2)).abs() < 1e-9);
    }
}
